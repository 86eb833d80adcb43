use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{KithError, Result};

pub const MIN_SCENARIO_UNITS: usize = 50;
pub const MAX_SCENARIO_UNITS: usize = 2500;

/// Language of submitted scenario text. Controls how its length is measured:
/// whitespace-separated words for English, non-whitespace characters for
/// Simplified Chinese.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    En,
    #[serde(rename = "zh-hans")]
    ZhHans,
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::En),
            "zh-hans" | "zh_hans" => Ok(Language::ZhHans),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

impl Language {
    /// Number of countable units in `text` under this language's rules.
    pub fn measure(&self, text: &str) -> usize {
        match self {
            Language::En => text.split_whitespace().count(),
            Language::ZhHans => text.chars().filter(|c| !c.is_whitespace()).count(),
        }
    }
}

/// Bounds check for scenario text. Runs before any persistence or oracle call.
pub fn validate_scenario_text(text: &str, language: Language) -> Result<()> {
    let units = language.measure(text);
    if units < MIN_SCENARIO_UNITS || units > MAX_SCENARIO_UNITS {
        let unit_name = match language {
            Language::En => "words",
            Language::ZhHans => "characters",
        };
        return Err(KithError::Validation(format!(
            "scenario text must be between {MIN_SCENARIO_UNITS} and {MAX_SCENARIO_UNITS} \
             {unit_name}, got {units}"
        )));
    }
    Ok(())
}

/// Simulation scenario descriptions are bounded by character count in every
/// language.
pub fn validate_simulation_text(text: &str) -> Result<()> {
    let chars = text.chars().filter(|c| !c.is_whitespace()).count();
    if chars < MIN_SCENARIO_UNITS || chars > MAX_SCENARIO_UNITS {
        return Err(KithError::Validation(format!(
            "simulation scenario must be between {MIN_SCENARIO_UNITS} and {MAX_SCENARIO_UNITS} \
             characters, got {chars}"
        )));
    }
    Ok(())
}

/// A simulation needs at least two distinct participants.
pub fn validate_actor_selection(actors: &[String]) -> Result<()> {
    let mut distinct: Vec<&str> = actors.iter().map(|a| a.trim()).collect();
    distinct.retain(|a| !a.is_empty());
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 2 {
        return Err(KithError::Validation(
            "select at least two distinct actors".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn test_english_word_bounds() {
        assert!(validate_scenario_text(&words(49), Language::En).is_err());
        assert!(validate_scenario_text(&words(50), Language::En).is_ok());
        assert!(validate_scenario_text(&words(2500), Language::En).is_ok());
        assert!(validate_scenario_text(&words(2501), Language::En).is_err());
    }

    #[test]
    fn test_chinese_counts_characters_not_words() {
        // One long run of CJK text with no whitespace is a single "word" but
        // many characters.
        let text = "事".repeat(60);
        assert!(validate_scenario_text(&text, Language::ZhHans).is_ok());
        assert!(validate_scenario_text(&text, Language::En).is_err());
    }

    #[test]
    fn test_simulation_text_is_char_bounded_even_in_english() {
        // 60 words of one letter each: 60 words but 60 chars, fine both ways.
        let short = vec!["a"; 60].join(" ");
        assert!(validate_simulation_text(&short).is_ok());
        assert!(validate_simulation_text("too short").is_err());
    }

    #[test]
    fn test_actor_selection() {
        assert!(validate_actor_selection(&["Me".into()]).is_err());
        assert!(validate_actor_selection(&["Me".into(), "Me".into()]).is_err());
        assert!(validate_actor_selection(&["Me".into(), "John".into()]).is_ok());
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("zh-hans".parse::<Language>().unwrap(), Language::ZhHans);
        assert!("fr".parse::<Language>().is_err());
    }
}
