//! Parser for chain expressions: `planner -> builder:5 -> reviewer`.

use forkhestra_types::Step;

use crate::error::{ChainError, Result};

/// Parses a chain expression into steps. `ident` runs the agent once;
/// `ident:N` loops it up to N iterations watching for the completion marker.
pub fn parse_chain_expr(input: &str) -> Result<Vec<Step>> {
    if input.trim().is_empty() {
        return Err(ChainError::parse("empty chain expression"));
    }
    let mut steps = Vec::new();
    for (index, fragment) in input.split("->").enumerate() {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Err(ChainError::parse_at(
                format!("empty step at position {} in '{}'", index + 1, input.trim()),
                index,
            ));
        }
        steps.push(parse_step(fragment, index)?);
    }
    Ok(steps)
}

/// In a step fragment the `:` always separates the agent identifier from
/// its iteration count.
fn parse_step(fragment: &str, index: usize) -> Result<Step> {
    let (ident, count) = match fragment.split_once(':') {
        Some((ident, count)) => (ident.trim(), Some(count.trim())),
        None => (fragment, None),
    };
    validate_ident(ident, fragment, index)?;
    match count {
        None => Ok(Step::single(ident)),
        Some(raw) => {
            let iterations: u32 = raw.parse().map_err(|_| {
                ChainError::parse_at(
                    format!("iteration count must be an integer in '{fragment}'"),
                    index,
                )
            })?;
            if iterations == 0 {
                return Err(ChainError::parse_at(
                    format!("iteration count must be at least 1 in '{fragment}'"),
                    index,
                ));
            }
            Ok(Step::looping(ident, iterations))
        }
    }
}

fn validate_ident(ident: &str, fragment: &str, index: usize) -> Result<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ChainError::parse_at(
            format!("invalid agent identifier in '{fragment}'"),
            index,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ident_is_a_single_run_step() {
        let steps = parse_chain_expr("planner").expect("parse");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].agent, "planner");
        assert!(!steps[0].loop_mode);
        assert_eq!(steps[0].max_iterations, 1);
    }

    #[test]
    fn count_suffix_enables_loop_mode() {
        let steps = parse_chain_expr("worker:1").expect("parse");
        assert!(steps[0].loop_mode);
        assert_eq!(steps[0].max_iterations, 1);

        let steps = parse_chain_expr("worker:25").expect("parse");
        assert_eq!(steps[0].max_iterations, 25);
    }

    #[test]
    fn arrows_compose_sequentially() {
        let steps = parse_chain_expr("plan->build:5 ->  review").expect("parse");
        assert_eq!(
            steps.iter().map(|s| s.agent.as_str()).collect::<Vec<_>>(),
            vec!["plan", "build", "review"]
        );
        assert_eq!(steps[1].max_iterations, 5);
    }

    #[test]
    fn parsed_steps_reserialize_to_normalized_input() {
        for (input, normalized) in [
            ("a", "a"),
            ("a:3", "a:3"),
            ("a ->b:2->  c", "a -> b:2 -> c"),
        ] {
            let steps = parse_chain_expr(input).expect("parse");
            let rendered = steps
                .iter()
                .map(|s| s.to_expr())
                .collect::<Vec<_>>()
                .join(" -> ");
            assert_eq!(rendered, normalized);
        }
    }

    #[test]
    fn bad_inputs_are_parse_errors() {
        for input in [
            "",
            "   ",
            "a -> -> b",
            "-> a",
            "a ->",
            "a:0",
            "a:x",
            "a:1.5",
            "a:-2",
            "9lives",
            "spaced out",
            "a::2",
        ] {
            let err = parse_chain_expr(input).expect_err(input);
            assert!(matches!(err, ChainError::Parse { .. }), "{input}: {err}");
        }
    }

    #[test]
    fn parse_errors_carry_the_step_index() {
        let err = parse_chain_expr("a -> b:0 -> c").expect_err("parse");
        match err {
            ChainError::Parse { step_index, .. } => assert_eq!(step_index, Some(1)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
