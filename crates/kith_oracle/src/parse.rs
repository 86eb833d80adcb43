//! Lenient parsing of oracle completions.
//!
//! Models wrap JSON in code fences or prose more often than not. Parsing
//! tries the raw text first, then the outermost `{...}` span, then the
//! outermost `[...]` span before declaring the response malformed.

use kith_core::{KithError, Result};
use serde::de::DeserializeOwned;

/// Reject empty completions up front, tagged with the stage that made the
/// call.
pub fn require_nonempty(text: &str, stage: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(KithError::OracleEmpty(stage.to_string()));
    }
    Ok(())
}

/// Parse a completion into `T`, tolerating code fences and surrounding prose.
pub fn lenient_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(200).collect();
    Err(KithError::OracleMalformed(preview))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    #[test]
    fn test_direct_parse() {
        let parsed: Sample = lenient_json(r#"{"name": "John"}"#).unwrap();
        assert_eq!(parsed.name, "John");
    }

    #[test]
    fn test_code_fence_wrapped() {
        let text = "Here you go:\n```json\n{\"name\": \"John\"}\n```\nLet me know!";
        let parsed: Sample = lenient_json::<Sample>(text).unwrap();
        assert_eq!(parsed.name, "John");
    }

    #[test]
    fn test_bare_array() {
        let parsed: Vec<Sample> = lenient_json("```[{\"name\": \"A\"}, {\"name\": \"B\"}]```").unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = lenient_json::<Sample>("I cannot answer that.").unwrap_err();
        assert!(matches!(err, KithError::OracleMalformed(_)));
    }

    #[test]
    fn test_empty_check() {
        assert!(require_nonempty("  \n ", "extraction").is_err());
        assert!(require_nonempty("ok", "extraction").is_ok());
    }
}
