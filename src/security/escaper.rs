//! Structural delimiters around user-supplied values.
//!
//! The delimiters are part of the default [`Blocklist`](super::Blocklist), so
//! the sanitizer has already removed any literal occurrence from a value by
//! the time it is wrapped here.

/// Opening delimiter for an escaped value.
pub const ESCAPE_START: &str = "<<<USER_INPUT>>>";

/// Closing delimiter for an escaped value.
pub const ESCAPE_END: &str = "<<<END_USER_INPUT>>>";

/// Wraps cleared values in [`ESCAPE_START`] / [`ESCAPE_END`].
///
/// # Example
///
/// ```
/// use prompt_assembler::security::Escaper;
///
/// let escaped = Escaper.escape("World");
/// assert_eq!(escaped, "<<<USER_INPUT>>>World<<<END_USER_INPUT>>>");
/// assert_eq!(Escaper::strip_delimiters(&format!("Hello {escaped}!")), "Hello World!");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Escaper;

impl Escaper {
    /// Wrap a value in delimiters.
    #[must_use]
    pub fn escape(self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + ESCAPE_START.len() + ESCAPE_END.len());
        out.push_str(ESCAPE_START);
        out.push_str(value);
        out.push_str(ESCAPE_END);
        out
    }

    /// Returns true if `text` is exactly one escaped value.
    #[must_use]
    pub fn is_escaped(text: &str) -> bool {
        text.len() >= ESCAPE_START.len() + ESCAPE_END.len()
            && text.starts_with(ESCAPE_START)
            && text.ends_with(ESCAPE_END)
    }

    /// Remove every delimiter, for human-readable display.
    #[must_use]
    pub fn strip_delimiters(text: &str) -> String {
        text.replace(ESCAPE_START, "").replace(ESCAPE_END, "")
    }
}
