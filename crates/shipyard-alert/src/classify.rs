//! Log-line severity classification.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Warn,
    Error,
    Panic,
    Fatal,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warn => "WARN",
            AlertLevel::Error => "ERROR",
            AlertLevel::Panic => "PANIC",
            AlertLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checked in order; the first keyword found wins.
const RULES: &[(&str, AlertLevel)] = &[
    ("warn", AlertLevel::Warn),
    ("error", AlertLevel::Error),
    ("panic", AlertLevel::Panic),
    ("fatal", AlertLevel::Fatal),
];

/// Case-insensitive keyword classification. `None` means no alert.
pub fn classify(line: &str) -> Option<AlertLevel> {
    let lower = line.to_lowercase();
    RULES
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, level)| *level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_classify() {
        assert_eq!(classify("panic: nil pointer"), Some(AlertLevel::Panic));
        assert_eq!(classify("this is a WARNING"), Some(AlertLevel::Warn));
        assert_eq!(classify("Fatal: out of memory"), Some(AlertLevel::Fatal));
        assert_eq!(classify("request failed with Error 500"), Some(AlertLevel::Error));
        assert_eq!(classify("GET /healthz 200"), None);
    }

    #[test]
    fn first_rule_wins() {
        // Both "warn" and "error" appear; "warn" is checked first.
        assert_eq!(classify("error while handling warn"), Some(AlertLevel::Warn));
        assert_eq!(classify("fatal error"), Some(AlertLevel::Error));
    }
}
