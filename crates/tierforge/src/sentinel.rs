//! Input gatekeeper
//!
//! Cheap, deterministic checks run on free text before a workflow is
//! created. Gibberish is refused outright; vague input is accepted with a
//! warning. Nothing here touches the registry.

use serde::Serialize;

/// Verbs that make a request concrete enough to act on.
const ACTION_VERBS: &[&str] = &[
    "add", "analyze", "build", "check", "clean", "convert", "create", "debug", "define", "delete",
    "deploy", "design", "document", "explain", "extract", "find", "fix", "format", "generate",
    "implement", "improve", "list", "make", "merge", "migrate", "optimize", "parse", "port",
    "refactor", "remove", "rename", "review", "rewrite", "sort", "split", "summarize", "test",
    "translate", "update", "validate", "write",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Clear enough to run
    Actionable,
    /// Runnable, but likely to need clarification
    Vague,
    /// Not a request; refused
    Gibberish,
}

impl Verdict {
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Gibberish)
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::Actionable => "ok",
            Self::Vague => "request is vague; results may need another pass",
            Self::Gibberish => "input does not look like a request",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Actionable => write!(f, "actionable"),
            Self::Vague => write!(f, "vague"),
            Self::Gibberish => write!(f, "gibberish"),
        }
    }
}

/// Heuristic thresholds.
#[derive(Debug, Clone)]
pub struct Sentinel {
    /// Minimum share of letters among non-space characters
    pub min_alpha_ratio: f64,
    /// Requests shorter than this without an action verb are vague
    pub min_words: usize,
}

impl Default for Sentinel {
    fn default() -> Self {
        Self {
            min_alpha_ratio: 0.5,
            min_words: 4,
        }
    }
}

impl Sentinel {
    pub fn classify(&self, text: &str) -> Verdict {
        let text = text.trim();
        let visible: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        if visible.is_empty() {
            return Verdict::Gibberish;
        }

        let letters = visible.iter().filter(|c| c.is_alphabetic()).count();
        if (letters as f64) / (visible.len() as f64) < self.min_alpha_ratio {
            return Verdict::Gibberish;
        }

        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphabetic())
                    .flat_map(char::to_lowercase)
                    .collect::<String>()
            })
            .filter(|w| !w.is_empty())
            .collect();

        // Keyboard mashing: most ASCII words have no vowel at all.
        let ascii: Vec<&String> = words.iter().filter(|w| w.is_ascii()).collect();
        if !ascii.is_empty() {
            let voiceless = ascii.iter().filter(|w| !has_vowel(w)).count();
            if voiceless * 2 > ascii.len() {
                return Verdict::Gibberish;
            }
        }

        let has_action = words.iter().any(|w| ACTION_VERBS.contains(&w.as_str()));
        if has_action && words.len() >= 2 {
            Verdict::Actionable
        } else if words.len() >= self.min_words * 2 {
            // Long enough to carry its own context.
            Verdict::Actionable
        } else {
            Verdict::Vague
        }
    }
}

fn has_vowel(word: &str) -> bool {
    word.chars().any(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Verdict {
        Sentinel::default().classify(text)
    }

    #[test]
    fn actionable_requests() {
        assert_eq!(classify("validate email addresses"), Verdict::Actionable);
        assert_eq!(classify("Write a CSV parser in Rust"), Verdict::Actionable);
        assert_eq!(classify("make it better"), Verdict::Actionable);
        let long = "the importer should skip rows whose checksum column does not match the payload";
        assert_eq!(classify(long), Verdict::Actionable);
    }

    #[test]
    fn vague_requests() {
        assert_eq!(classify("the thing"), Verdict::Vague);
        assert_eq!(classify("something about dates"), Verdict::Vague);
        assert_eq!(classify("help"), Verdict::Vague);
    }

    #[test]
    fn gibberish_is_refused() {
        for input in ["", "   ", "!!!! ???? ####", "1234 5678", "sdfg hjkl qwrt", "zxcv"] {
            let verdict = classify(input);
            assert_eq!(verdict, Verdict::Gibberish, "{input:?}");
            assert!(verdict.is_refused());
        }
    }

    #[test]
    fn non_ascii_text_is_not_gibberish() {
        assert_ne!(classify("Überprüfe die Eingabe gründlich bitte"), Verdict::Gibberish);
    }
}
