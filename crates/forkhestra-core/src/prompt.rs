//! Prompt precedence: CLI beats step beats chain beats agent default, and
//! within each scope an inline prompt beats a prompt file.

use std::fs;
use std::path::{Path, PathBuf};

use forkhestra_types::{AgentDefault, ChainSpec, Step};

use crate::error::{ChainError, Result};

/// Where a resolved prompt came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Inline(String),
    File(PathBuf),
}

/// The four scopes a prompt can be defined in, highest precedence first.
#[derive(Debug, Clone, Default)]
pub struct PromptScopes<'a> {
    pub cli_prompt: Option<&'a str>,
    pub cli_prompt_file: Option<&'a Path>,
    pub step: Option<&'a Step>,
    pub chain: Option<&'a ChainSpec>,
    pub agent_default: Option<&'a AgentDefault>,
}

/// First defined source wins; inline beats file within a scope.
pub fn resolve(scopes: &PromptScopes<'_>) -> Option<PromptSource> {
    let levels: [(Option<&str>, Option<&Path>); 4] = [
        (scopes.cli_prompt, scopes.cli_prompt_file),
        (
            scopes.step.and_then(|s| s.prompt.as_deref()),
            scopes.step.and_then(|s| s.prompt_file.as_deref()),
        ),
        (
            scopes.chain.and_then(|c| c.prompt.as_deref()),
            scopes.chain.and_then(|c| c.prompt_file.as_deref()),
        ),
        (
            scopes.agent_default.and_then(|a| a.default_prompt.as_deref()),
            scopes
                .agent_default
                .and_then(|a| a.default_prompt_file.as_deref()),
        ),
    ];
    for (inline, file) in levels {
        if let Some(text) = inline {
            return Some(PromptSource::Inline(text.to_string()));
        }
        if let Some(path) = file {
            return Some(PromptSource::File(path.to_path_buf()));
        }
    }
    None
}

/// Resolves to the final prompt text, reading a prompt file if that is what
/// won.
pub fn resolve_text(scopes: &PromptScopes<'_>, cwd: &Path) -> Result<Option<String>> {
    match resolve(scopes) {
        None => Ok(None),
        Some(PromptSource::Inline(text)) => Ok(Some(text)),
        Some(PromptSource::File(path)) => read_prompt_file(&path, cwd).map(Some),
    }
}

/// Reads a prompt file as UTF-8, resolving relative paths against `cwd`.
pub fn read_prompt_file(path: &Path, cwd: &Path) -> Result<String> {
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    if !resolved.exists() {
        return Err(ChainError::PromptFileNotFound(resolved));
    }
    fs::read_to_string(&resolved).map_err(|cause| ChainError::PromptFileUnreadable {
        path: resolved,
        cause,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn step_with(prompt: Option<&str>, file: Option<&str>) -> Step {
        let mut step = Step::single("worker");
        step.prompt = prompt.map(str::to_string);
        step.prompt_file = file.map(PathBuf::from);
        step
    }

    #[test]
    fn precedence_walks_cli_step_chain_agent() {
        let step = step_with(Some("S"), None);
        let chain = ChainSpec {
            prompt: Some("C".to_string()),
            ..ChainSpec::default()
        };
        let agent = AgentDefault {
            default_prompt: Some("A".to_string()),
            ..AgentDefault::default()
        };
        let mut scopes = PromptScopes {
            cli_prompt: Some("X"),
            cli_prompt_file: None,
            step: Some(&step),
            chain: Some(&chain),
            agent_default: Some(&agent),
        };

        assert_eq!(resolve(&scopes), Some(PromptSource::Inline("X".into())));
        scopes.cli_prompt = None;
        assert_eq!(resolve(&scopes), Some(PromptSource::Inline("S".into())));
        scopes.step = None;
        assert_eq!(resolve(&scopes), Some(PromptSource::Inline("C".into())));
        scopes.chain = None;
        assert_eq!(resolve(&scopes), Some(PromptSource::Inline("A".into())));
        scopes.agent_default = None;
        assert_eq!(resolve(&scopes), None);
    }

    #[test]
    fn inline_beats_file_within_a_scope() {
        let step = step_with(Some("inline"), Some("file.md"));
        let scopes = PromptScopes {
            step: Some(&step),
            ..PromptScopes::default()
        };
        assert_eq!(resolve(&scopes), Some(PromptSource::Inline("inline".into())));

        let step = step_with(None, Some("file.md"));
        let scopes = PromptScopes {
            step: Some(&step),
            ..PromptScopes::default()
        };
        assert_eq!(
            resolve(&scopes),
            Some(PromptSource::File(PathBuf::from("file.md")))
        );
    }

    #[test]
    fn cli_prompt_file_loses_to_cli_inline_but_beats_step() {
        let step = step_with(Some("S"), None);
        let scopes = PromptScopes {
            cli_prompt: None,
            cli_prompt_file: Some(Path::new("cli.md")),
            step: Some(&step),
            ..PromptScopes::default()
        };
        assert_eq!(
            resolve(&scopes),
            Some(PromptSource::File(PathBuf::from("cli.md")))
        );
    }

    #[test]
    fn prompt_files_read_relative_to_cwd() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join("prompt.md"), "from file").expect("write");
        let text = read_prompt_file(Path::new("prompt.md"), tmp.path()).expect("read");
        assert_eq!(text, "from file");

        let err = read_prompt_file(Path::new("missing.md"), tmp.path()).expect_err("missing");
        assert!(matches!(err, ChainError::PromptFileNotFound(_)));
    }

    #[test]
    fn resolve_text_reads_the_winning_file() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join("step.md"), "step text").expect("write");
        let step = step_with(None, Some("step.md"));
        let scopes = PromptScopes {
            step: Some(&step),
            ..PromptScopes::default()
        };
        let text = resolve_text(&scopes, tmp.path()).expect("resolve");
        assert_eq!(text.as_deref(), Some("step text"));
    }
}
