//! Cleanup of raw model output.
//!
//! Some models do not follow "return plain HTML" instructions: they prepend a
//! `<think>...</think>` reasoning block or wrap the page in a markdown code
//! fence. [`sanitize`] strips those so the stored page is a bare document.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static REASONING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A.*?</think>").expect("valid reasoning pattern"));

static OPENING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A```html").expect("valid opening fence pattern"));

static CLOSING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```\z").expect("valid closing fence pattern"));

/// Errors from output cleanup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("no content generated")]
    EmptyOutput,
}

/// Clean raw model output, or pass it through unchanged when `enabled` is false.
///
/// Fails only when the model produced no output at all.
pub fn sanitize_output(raw: Option<&str>, enabled: bool) -> Result<String, SanitizeError> {
    let raw = raw.ok_or(SanitizeError::EmptyOutput)?;
    if enabled {
        Ok(sanitize(raw))
    } else {
        Ok(raw.to_string())
    }
}

/// Strip reasoning blocks, code fences and surrounding whitespace.
///
/// The rules are applied until the text stops changing, so
/// `sanitize(&sanitize(x)) == sanitize(x)` for every `x`.
pub fn sanitize(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn sanitize_once(text: &str) -> String {
    let text = REASONING.replace(text, "");
    let text = OPENING_FENCE.replace(&text, "");
    let text = CLOSING_FENCE.replace(&text, "");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_reasoning_and_fences() {
        assert_eq!(
            sanitize("<think>reasoning</think>```html<p>hi</p>```"),
            "<p>hi</p>"
        );
    }

    #[test]
    fn test_multiline_reasoning_and_fenced_document() {
        let raw = "<think>\nThe user wants a page.\nLet me plan.\n</think>\n\n```html\n<!DOCTYPE html>\n<html></html>\n```\n";
        assert_eq!(sanitize(raw), "<!DOCTYPE html>\n<html></html>");
    }

    #[test]
    fn test_clean_html_is_untouched() {
        let html = "<!DOCTYPE html>\n<html><body>```html is fine inside</body></html>";
        assert_eq!(sanitize(html), html);
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "",
            "   ",
            "<p>x</p>",
            "<think>a</think><think>b</think>```html ```html<p>x</p>``` ```",
            "  ```html\n<p>x</p>\n```  ",
            "</think>",
            "``````",
            "```html```",
            "text with ``` inside ``` and trailing ```",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_absent_output_is_an_error() {
        assert_eq!(
            sanitize_output(None, true),
            Err(SanitizeError::EmptyOutput)
        );
        assert_eq!(
            sanitize_output(None, false),
            Err(SanitizeError::EmptyOutput)
        );
    }

    #[test]
    fn test_disabled_passes_through() {
        let raw = "<think>x</think>```html<p>hi</p>```";
        assert_eq!(sanitize_output(Some(raw), false).unwrap(), raw);
        assert_eq!(sanitize_output(Some(raw), true).unwrap(), "<p>hi</p>");
    }
}
