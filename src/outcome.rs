use std::fmt::Display;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::ops::git::CmdResult;

// -----------------------------------------------------------------------------
// OperationKind

/// The kind of branch operation an outcome records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Fetch,
    Pull,
    Push,
    Merge,
    Create,
    Switch,
    Status,
    CherryPick,
    StashSave,
    StashPop,
    TagCreate,
    TagDelete,
    TagPush,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Merge => "merge",
            Self::Create => "create",
            Self::Switch => "switch",
            Self::Status => "status",
            Self::CherryPick => "cherry-pick",
            Self::StashSave => "stash-save",
            Self::StashPop => "stash-pop",
            Self::TagCreate => "tag-create",
            Self::TagDelete => "tag-delete",
            Self::TagPush => "tag-push",
        };
        f.write_str(name)
    }
}

// -----------------------------------------------------------------------------
// OperationOutcome

/// Immutable record of one attempted branch operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    /// The branch (or branch pair, for merges) the operation targeted.
    pub branch: String,
    pub kind: OperationKind,
    pub success: bool,
    pub message: String,
    /// Raw error text from the external tool, present on failure.
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl OperationOutcome {
    pub fn success(branch: &str, kind: OperationKind, message: &str) -> Self {
        Self {
            branch: branch.to_string(),
            kind,
            success: true,
            message: message.to_string(),
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(branch: &str, kind: OperationKind, message: &str, error: &str) -> Self {
        Self {
            branch: branch.to_string(),
            kind,
            success: false,
            message: message.to_string(),
            error: Some(error.to_string()),
            completed_at: Utc::now(),
        }
    }

    /// Map a finished command to an outcome, keeping stderr verbatim on
    /// failure so downstream consumers can inspect the tool's own words.
    pub fn from_cmd(
        branch: &str,
        kind: OperationKind,
        result: &CmdResult,
        ok_message: &str,
        fail_message: &str,
    ) -> Self {
        if result.success {
            Self::success(branch, kind, ok_message)
        } else {
            Self::failure(branch, kind, fail_message, &result.stderr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_uses_tool_style_names() {
        assert_eq!(OperationKind::Fetch.to_string(), "fetch");
        assert_eq!(OperationKind::CherryPick.to_string(), "cherry-pick");
        assert_eq!(OperationKind::StashSave.to_string(), "stash-save");
        assert_eq!(OperationKind::TagPush.to_string(), "tag-push");
    }

    #[test]
    fn from_cmd_keeps_stderr_on_failure() {
        let result = CmdResult::failed("merge conflict in src/lib.rs", 1);
        let outcome = OperationOutcome::from_cmd(
            "feature/x",
            OperationKind::Merge,
            &result,
            "merged",
            "failed to merge",
        );

        assert!(!outcome.success);
        assert_eq!(outcome.message, "failed to merge");
        assert_eq!(outcome.error.as_deref(), Some("merge conflict in src/lib.rs"));
    }

    #[test]
    fn from_cmd_has_no_error_on_success() {
        let result = CmdResult::ok("Already up to date.");
        let outcome =
            OperationOutcome::from_cmd("main", OperationKind::Pull, &result, "pulled", "failed");

        assert!(outcome.success);
        assert_eq!(outcome.message, "pulled");
        assert!(outcome.error.is_none());
    }
}
