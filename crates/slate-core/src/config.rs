//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The kind of session the document is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Workbook-style session: cells can be re-evaluated and the agent state
    /// is reset when evaluation starts from the first cell.
    #[default]
    Workbook,
    /// Interactive console session: every cell is frozen after it runs once
    /// and `clear` wipes previous results.
    Console,
}

impl SessionKind {
    pub fn is_workbook(self) -> bool {
        matches!(self, Self::Workbook)
    }
}

/// Configuration for a notebook session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Session kind.
    pub session_kind: SessionKind,
    /// Language tag given to newly created code cells.
    pub language: String,
    /// Working directory handed to the compilation workspace.
    pub working_directory: PathBuf,
    /// Culture used when an event carries no usable culture tag.
    pub default_culture: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_kind: SessionKind::Workbook,
            language: "slate".to_string(),
            working_directory: PathBuf::from("."),
            default_culture: "en-US".to_string(),
        }
    }
}

impl EngineConfig {
    /// Configuration for a console session.
    pub fn console() -> Self {
        Self {
            session_kind: SessionKind::Console,
            ..Self::default()
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn with_default_culture(mut self, culture: impl Into<String>) -> Self {
        self.default_culture = culture.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.session_kind, SessionKind::Workbook);
        assert_eq!(config.default_culture, "en-US");
        assert_eq!(config.language, "slate");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"session_kind":"console"}"#).unwrap();
        assert_eq!(config.session_kind, SessionKind::Console);
        assert_eq!(config.default_culture, "en-US");
    }
}
