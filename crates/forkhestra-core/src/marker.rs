//! Streaming detection of the completion marker over a bounded window of
//! child stdout.

/// The marker agents print to declare a looping step complete.
pub const COMPLETION_MARKER: &str = "FORKHESTRA_COMPLETE";

/// Older agent sets print this spelling; it is accepted on read so existing
/// chains keep completing.
pub const LEGACY_COMPLETION_MARKER: &str = "ORCHESTRA_COMPLETE";

/// Extra characters retained beyond the marker length so trimming can never
/// discard a partially-received marker.
const WINDOW_SLACK: usize = 1024;

/// Scans an append-only text stream for the completion marker while keeping
/// only a bounded tail of the stream in memory. The `seen` flag is sticky
/// across pushes, so one scanner can span several loop iterations.
#[derive(Debug, Default)]
pub struct MarkerScanner {
    buffer: String,
    seen: bool,
}

impl MarkerScanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn window() -> usize {
        COMPLETION_MARKER
            .len()
            .max(LEGACY_COMPLETION_MARKER.len())
            + WINDOW_SLACK
    }

    /// Feeds one decoded chunk; returns whether the marker has been seen so
    /// far.
    pub fn push(&mut self, chunk: &str) -> bool {
        if self.seen {
            return true;
        }
        self.buffer.push_str(chunk);
        if self.buffer.contains(COMPLETION_MARKER)
            || self.buffer.contains(LEGACY_COMPLETION_MARKER)
        {
            self.seen = true;
            self.buffer.clear();
            return true;
        }
        let window = Self::window();
        if self.buffer.len() > window {
            let mut cut = self.buffer.len() - window;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }
        false
    }

    pub fn seen(&self) -> bool {
        self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_in_the_middle_of_output_is_detected() {
        let mut scanner = MarkerScanner::new();
        assert!(!scanner.push("working on it...\n"));
        assert!(scanner.push(&format!("done. {COMPLETION_MARKER} shutting down\n")));
        assert!(scanner.seen());
    }

    #[test]
    fn marker_split_across_chunks_is_detected() {
        let mut scanner = MarkerScanner::new();
        let (head, tail) = COMPLETION_MARKER.split_at(7);
        assert!(!scanner.push(head));
        assert!(scanner.push(tail));
    }

    #[test]
    fn a_prefix_alone_never_completes() {
        let mut scanner = MarkerScanner::new();
        let prefix = &COMPLETION_MARKER[..COMPLETION_MARKER.len() - 1];
        scanner.push(prefix);
        scanner.push("\nand more unrelated output\n");
        assert!(!scanner.seen());
    }

    #[test]
    fn legacy_spelling_is_accepted() {
        let mut scanner = MarkerScanner::new();
        assert!(scanner.push(&format!("{LEGACY_COMPLETION_MARKER}\n")));
    }

    #[test]
    fn seen_is_sticky_across_iterations() {
        let mut scanner = MarkerScanner::new();
        scanner.push(COMPLETION_MARKER);
        assert!(scanner.push("later iteration output"));
    }

    #[test]
    fn buffer_stays_bounded_under_large_output() {
        let mut scanner = MarkerScanner::new();
        for _ in 0..10_000 {
            scanner.push("a long line of perfectly ordinary agent chatter\n");
        }
        assert!(!scanner.seen());
        assert!(scanner.buffer.len() <= MarkerScanner::window());
        // a marker arriving after heavy output still lands
        assert!(scanner.push(COMPLETION_MARKER));
    }

    #[test]
    fn marker_straddling_a_trim_boundary_is_detected() {
        let mut scanner = MarkerScanner::new();
        scanner.push(&"x".repeat(MarkerScanner::window() * 3));
        let (head, tail) = COMPLETION_MARKER.split_at(5);
        scanner.push(head);
        scanner.push(&"y".repeat(200));
        assert!(!scanner.seen());

        let mut scanner = MarkerScanner::new();
        scanner.push(&"x".repeat(MarkerScanner::window() * 3));
        scanner.push(head);
        assert!(scanner.push(tail));
    }
}
