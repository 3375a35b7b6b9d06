//! Maps Anthropic-style model identifiers onto the upstream's model ids.
//!
//! The table is hand-maintained (see the Open Questions in the accompanying
//! design notes: a discovery-based table would be more robust, but nothing
//! in scope here performs that discovery). Unknown inputs fall back to a
//! conservative default rather than failing the request outright.

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-5";
pub const FLASH_MODEL: &str = "gemini-2.5-flash";

const ALIASES: &[(&str, &str)] = &[
    ("claude-opus-4-1", "claude-opus-4-1"),
    ("claude-opus-4-5", "claude-opus-4-5"),
    ("claude-sonnet-4-5", "claude-sonnet-4-5"),
    ("claude-sonnet-4-20250514", "claude-sonnet-4-5"),
    ("claude-3-7-sonnet-latest", "claude-sonnet-4-5"),
    ("claude-3-5-sonnet-latest", "claude-sonnet-4-5"),
    ("claude-3-5-haiku-latest", "claude-sonnet-4-5"),
];

/// The full alias table, for callers that need to enumerate known client
/// model ids (e.g. `GET /v1/models`) rather than just resolve one.
pub fn aliases() -> &'static [(&'static str, &'static str)] {
    ALIASES
}

/// Resolves a client-supplied Claude model id to the upstream model id,
/// defaulting to [`DEFAULT_CLAUDE_MODEL`] for anything unrecognized.
pub fn resolve_upstream_model(client_model: &str) -> &'static str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == client_model)
        .map(|(_, upstream)| *upstream)
        .unwrap_or(DEFAULT_CLAUDE_MODEL)
}

/// `true` when the resolved model is the "pro" family, which the Google
/// translator must always stream from upstream regardless of the client's
/// requested method (see [`crate::request`] and the C9 streaming rule).
pub fn is_pro_variant(upstream_model: &str) -> bool {
    upstream_model.contains("-pro")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_alias_maps_through() {
        assert_eq!(resolve_upstream_model("claude-opus-4-1"), "claude-opus-4-1");
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(resolve_upstream_model("claude-nonexistent"), DEFAULT_CLAUDE_MODEL);
    }

    #[test]
    fn pro_variant_detection() {
        assert!(is_pro_variant("gemini-2.5-pro"));
        assert!(!is_pro_variant("gemini-2.5-flash"));
    }
}
