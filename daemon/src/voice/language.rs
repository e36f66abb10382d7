//! Voice language selection
//!
//! The voice used for a reply is picked from the reply text itself, not from
//! the user's locale: text containing characters of a known script gets that
//! script's language tag.

use std::ops::RangeInclusive;

/// Picks a BCP-47 language tag for a piece of text
pub trait LanguagePolicy: Send + Sync {
    fn language_for(&self, text: &str) -> &str;
}

/// A script range and the tag it selects
#[derive(Debug, Clone)]
struct ScriptRule {
    range: RangeInclusive<char>,
    tag: String,
}

/// First matching script wins, otherwise the default tag
#[derive(Debug, Clone)]
pub struct ScriptHeuristic {
    rules: Vec<ScriptRule>,
    default_tag: String,
}

impl ScriptHeuristic {
    pub fn new(default_tag: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_tag: default_tag.into(),
        }
    }

    /// Add a script range, checked in insertion order
    pub fn with_script(mut self, range: RangeInclusive<char>, tag: impl Into<String>) -> Self {
        self.rules.push(ScriptRule {
            range,
            tag: tag.into(),
        });
        self
    }
}

impl Default for ScriptHeuristic {
    /// Devanagari selects Hindi, everything else English
    fn default() -> Self {
        Self::new("en-US").with_script('\u{0900}'..='\u{097F}', "hi-IN")
    }
}

impl LanguagePolicy for ScriptHeuristic {
    fn language_for(&self, text: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| text.chars().any(|c| rule.range.contains(&c)))
            .map(|rule| rule.tag.as_str())
            .unwrap_or(&self.default_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin_text_uses_default() {
        let policy = ScriptHeuristic::default();
        assert_eq!(policy.language_for("Hi there"), "en-US");
        assert_eq!(policy.language_for(""), "en-US");
    }

    #[test]
    fn test_devanagari_selects_hindi() {
        let policy = ScriptHeuristic::default();
        assert_eq!(policy.language_for("नमस्ते"), "hi-IN");
        // Mixed text still counts as Hindi
        assert_eq!(policy.language_for("RV400 की कीमत"), "hi-IN");
    }

    #[test]
    fn test_rules_checked_in_order() {
        let policy = ScriptHeuristic::new("en-GB")
            .with_script('\u{0400}'..='\u{04FF}', "ru-RU")
            .with_script('\u{0900}'..='\u{097F}', "hi-IN");
        assert_eq!(policy.language_for("привет नमस्ते"), "ru-RU");
        assert_eq!(policy.language_for("hello"), "en-GB");
    }
}
