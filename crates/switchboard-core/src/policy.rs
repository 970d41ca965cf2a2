//! Tool policy matching.
//!
//! A policy is a pair of pattern lists. A pattern is an exact tool name, a
//! wildcard pattern such as `web_*` or `*_get`, `*` alone (matches every
//! tool), or a `group:<name>` reference that expands to the tools in that
//! group. Matching is case-sensitive.
//!
//! Deny always wins: a name matched by any deny pattern is rejected even if
//! an allow pattern also matches. Otherwise the name must be matched by at
//! least one allow pattern, so an empty allow list rejects everything.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tool policy as it appears in configuration and on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicyConfig {
    /// Allow patterns.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Deny patterns.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicyConfig {
    /// A policy that allows every tool.
    pub fn allow_all() -> Self {
        Self {
            allow: vec!["*".to_string()],
            deny: Vec::new(),
        }
    }

    /// Compile into a [`ToolPolicy`].
    pub fn compile(&self) -> ToolPolicy {
        ToolPolicy::new(self)
    }
}

/// Tool groups usable as `group:<name>` in policy patterns.
pub mod groups {
    /// Memory tools.
    pub const MEMORY: &[&str] = &["memory_search", "memory_get"];

    /// Web tools.
    pub const WEB: &[&str] = &["web_search", "web_fetch"];

    /// Filesystem tools.
    pub const FS: &[&str] = &["read", "write", "edit", "apply_patch", "glob", "grep"];

    /// Runtime/execution tools.
    pub const RUNTIME: &[&str] = &["exec", "process"];

    /// Session tools.
    pub const SESSIONS: &[&str] = &[
        "sessions_list",
        "sessions_history",
        "sessions_send",
        "sessions_spawn",
        "session_status",
    ];

    /// Messaging tools.
    pub const MESSAGING: &[&str] = &["message"];

    /// Get tools in a group by its `group:<name>` reference.
    pub fn get_group(name: &str) -> Option<&'static [&'static str]> {
        match name {
            "group:memory" => Some(MEMORY),
            "group:web" => Some(WEB),
            "group:fs" => Some(FS),
            "group:runtime" => Some(RUNTIME),
            "group:sessions" => Some(SESSIONS),
            "group:messaging" => Some(MESSAGING),
            _ => None,
        }
    }
}

/// A single compiled pattern.
#[derive(Debug, Clone)]
pub enum ToolPattern {
    /// `*`: matches every name.
    Any,

    /// Exact, case-sensitive name.
    Exact(String),

    /// Pattern containing `*`, anchored at both ends.
    Wildcard(Regex),
}

impl ToolPattern {
    /// Parse a raw pattern. Blank patterns yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw == "*" {
            return Some(Self::Any);
        }
        if !raw.contains('*') {
            return Some(Self::Exact(raw.to_string()));
        }

        let body = raw
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        // Escaped literals joined by `.*` always form a valid expression.
        match Regex::new(&format!("^{}$", body)) {
            Ok(re) => Some(Self::Wildcard(re)),
            Err(e) => {
                tracing::warn!(pattern = raw, error = %e, "Ignoring unparseable tool pattern");
                None
            }
        }
    }

    /// Check whether `name` matches this pattern.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == name,
            Self::Wildcard(re) => re.is_match(name),
        }
    }
}

/// Compiled allow/deny policy.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    allow: Vec<ToolPattern>,
    deny: Vec<ToolPattern>,
}

impl ToolPolicy {
    /// Compile a policy from its configuration.
    pub fn new(config: &ToolPolicyConfig) -> Self {
        Self {
            allow: compile_patterns(&config.allow),
            deny: compile_patterns(&config.deny),
        }
    }

    /// Check whether a tool is allowed.
    pub fn is_allowed(&self, name: &str) -> bool {
        if self.deny.iter().any(|p| p.matches(name)) {
            return false;
        }
        self.allow.iter().any(|p| p.matches(name))
    }
}

impl From<&ToolPolicyConfig> for ToolPolicy {
    fn from(config: &ToolPolicyConfig) -> Self {
        Self::new(config)
    }
}

/// Evaluate `name` against an uncompiled policy.
///
/// Callers checking many names against the same policy should compile it
/// once with [`ToolPolicyConfig::compile`].
pub fn is_tool_allowed(policy: &ToolPolicyConfig, name: &str) -> bool {
    ToolPolicy::new(policy).is_allowed(name)
}

fn compile_patterns(raw: &[String]) -> Vec<ToolPattern> {
    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        match groups::get_group(entry.trim()) {
            Some(tools) => out.extend(tools.iter().map(|t| ToolPattern::Exact((*t).to_string()))),
            None => out.extend(ToolPattern::parse(entry)),
        }
    }
    out
}
