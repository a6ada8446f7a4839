//! The default system prompt for page generation.

/// Standing instructions sent with every generation unless the configuration
/// overrides them.
#[must_use]
pub fn system_prompt() -> &'static str {
    include_str!("system_prompt.md")
}
