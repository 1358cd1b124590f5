//! Text patterns that actions leave in their log objects.
//!
//! Matching is line-oriented and best-effort: a log object may be read
//! while its writer is still appending to it.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// `[<elapsed seconds>] [ERROR]` prefix written by an action's logger
static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[\d\.]+?\] \[ERROR\]").expect("constant regex pattern is valid")
});

/// Invocation marker naming the successor that was triggered
static INVOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Successfully invoked: ([A-Za-z][A-Za-z0-9_\-]*)")
        .expect("constant regex pattern is valid")
});

pub fn has_error_line(log_text: &str) -> bool {
    ERROR_LINE.is_match(log_text)
}

/// Names of every action the log claims to have invoked.
///
/// Invoked names may be qualified as `<workflow>-<action>`; the workflow
/// prefix is stripped.
pub fn invoked_actions(log_text: &str, workflow_name: &str) -> BTreeSet<String> {
    let prefix = format!("{}-", workflow_name);
    INVOCATION
        .captures_iter(log_text)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let name = m.as_str();
            match name.strip_prefix(&prefix) {
                Some(stripped) if !workflow_name.is_empty() && !stripped.is_empty() => {
                    stripped.to_string()
                }
                _ => name.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_line_detection() {
        assert!(has_error_line("[12.5] [INFO] start\n[13.02] [ERROR] boom"));
        assert!(!has_error_line("[12.5] [INFO] no errors here"));
        assert!(!has_error_line("ERROR without the timestamp prefix"));
    }

    #[test]
    fn test_invoked_actions_strip_workflow_prefix() {
        let log = "\
[1.0] [INFO] [scheduler.py] GitHub Action: Successfully invoked: weather-plot_data
[1.1] [INFO] [scheduler.py] GitHub Action: Successfully invoked: notify
[1.2] [INFO] unrelated line";

        let invoked = invoked_actions(log, "weather");
        assert_eq!(
            invoked.into_iter().collect::<Vec<_>>(),
            vec!["notify".to_string(), "plot_data".to_string()]
        );
    }

    #[test]
    fn test_invoked_actions_without_workflow_name() {
        let invoked = invoked_actions("Successfully invoked: -odd\nSuccessfully invoked: b", "");
        assert_eq!(invoked.len(), 1);
        assert!(invoked.contains("b"));
    }
}
