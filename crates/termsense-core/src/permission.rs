//! Glob-based tool permission rules.
//!
//! A [`PermissionRules`] value decides what happens when a confirmation
//! dialog names a tool: auto-approve, auto-deny, or leave it for a human.
//! Patterns are glob-style (`mcp_*`, `*_secret_get`). Deny wins over
//! allow; tools matching no list require confirmation.

use serde::{Deserialize, Serialize};

use crate::parser::ConfirmInfo;
use crate::pattern::glob_match;
use crate::session::{PermissionChecker, PermissionDecision};

/// Allow/confirm/deny lists of glob patterns over tool names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionRules {
    /// Tools approved without asking
    #[serde(default)]
    pub auto_allow: Vec<String>,
    /// Tools that always need a human answer
    #[serde(default)]
    pub require_confirm: Vec<String>,
    /// Tools denied without asking
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PermissionRules {
    /// Decide for a tool name. Deny wins, then explicit confirm, then
    /// allow; unmatched tools fall back to confirmation.
    pub fn decide(&self, tool_name: &str) -> PermissionDecision {
        if self.deny.iter().any(|p| glob_match(p, tool_name)) {
            return PermissionDecision::Deny;
        }
        if self.require_confirm.iter().any(|p| glob_match(p, tool_name)) {
            return PermissionDecision::Confirm;
        }
        if self.auto_allow.iter().any(|p| glob_match(p, tool_name)) {
            return PermissionDecision::Allow;
        }
        PermissionDecision::Confirm
    }

    /// Wrap the rules as a driver permission checker. Dialogs without a
    /// tool always require confirmation.
    pub fn into_checker(self) -> PermissionChecker {
        std::sync::Arc::new(move |info: &ConfirmInfo| match &info.tool {
            Some(tool) => self.decide(&tool.name),
            None => PermissionDecision::Confirm,
        })
    }
}
