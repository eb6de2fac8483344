//! Glob-style matching and shared regex helpers.
//!
//! Parsers and permission rules match tool names and screen text against
//! simple glob patterns; anything beyond a single-`*` form is compiled to
//! an anchored regex.

use once_cell::sync::Lazy;
use regex::Regex;

/// Separator line: a run of horizontal rules.
pub static SEPARATOR_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[─━═]+$").unwrap());

/// Prompt at line start: `❯` or `>` optionally followed by text.
pub static PROMPT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[❯>]\s*").unwrap());

/// Match `text` against a glob `pattern`.
///
/// Supported forms:
/// - exact (`foo`)
/// - match-all (`*`)
/// - prefix (`foo*`)
/// - suffix (`*foo`)
/// - middle (`foo*bar`)
/// - arbitrary multi-`*` patterns, converted to an anchored regex
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == text;
    }

    let stars = pattern.matches('*').count();
    if stars == 1 {
        if let Some(prefix) = pattern.strip_suffix('*') {
            return text.starts_with(prefix);
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            return text.ends_with(suffix);
        }
        if let Some(idx) = pattern.find('*') {
            let (head, tail) = (&pattern[..idx], &pattern[idx + 1..]);
            return text.len() >= head.len() + tail.len()
                && text.starts_with(head)
                && text.ends_with(tail);
        }
    }

    glob_to_regex(pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Convert a glob pattern to an anchored regex (`*` becomes `.*`).
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        if ch == '*' {
            out.push_str(".*");
        } else {
            out.push_str(&regex::escape(&ch.to_string()));
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert!(glob_match("Bash", "Bash"));
        assert!(!glob_match("Bash", "bash"));
    }

    #[test]
    fn test_match_all() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn test_prefix() {
        assert!(glob_match("git_*", "git_status"));
        assert!(!glob_match("git_*", "npm_install"));
        // empty remainder still matches a prefix glob
        assert!(glob_match("git_*", "git_"));
    }

    #[test]
    fn test_suffix() {
        assert!(glob_match("*_secret", "vault_secret"));
        assert!(!glob_match("*_secret", "vault_secrets"));
    }

    #[test]
    fn test_middle() {
        assert!(glob_match("mcp_*_get", "mcp_secret_get"));
        assert!(!glob_match("mcp_*_get", "mcp_secret_put"));
        // head and tail may not overlap
        assert!(!glob_match("abc*bcd", "abcd"));
    }

    #[test]
    fn test_multi_star() {
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(glob_match("a*b*c", "abc"));
        assert!(!glob_match("a*b*c", "acb"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(glob_match("foo.bar*", "foo.bar.baz"));
        assert!(!glob_match("foo.bar*", "fooXbar.baz"));
        assert!(glob_match("a(b)*", "a(b)c"));
    }

    #[test]
    fn test_shared_regexes() {
        assert!(SEPARATOR_LINE.is_match("────────"));
        assert!(!SEPARATOR_LINE.is_match("── text ──"));
        assert!(PROMPT_LINE.is_match("❯ ls"));
        assert!(PROMPT_LINE.is_match("> "));
        assert!(!PROMPT_LINE.is_match("  ❯"));
    }
}
