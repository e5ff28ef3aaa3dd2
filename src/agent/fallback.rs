//! Deterministic reply used when the model cannot be reached.

/// Text placed before the echoed user input.
pub const FALLBACK_PREFIX: &str = "This is a mock response. You said: ";

/// Build the fallback reply from the latest raw user text.
pub fn fallback_text(latest_user_text: Option<&str>) -> String {
    format!("{}{}", FALLBACK_PREFIX, latest_user_text.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_echoes_user_text() {
        assert_eq!(
            fallback_text(Some("hello")),
            "This is a mock response. You said: hello"
        );
        assert_eq!(fallback_text(None), FALLBACK_PREFIX);
    }
}
