//! Prompt complexity estimation.
//!
//! A pure classifier over the prompt text. The router uses the resulting
//! level as a capability-tier floor and the signals as feature requirements
//! (tools, thinking) when filtering the model catalog.

use serde::Serialize;

/// Keywords that pull a prompt toward the complex end.
const COMPLEXITY_KEYWORDS: &[&str] = &[
    "refactor",
    "architect",
    "redesign",
    "implement",
    "optimize",
    "migrate",
    "debug",
    "analyze",
    "integrate",
    "comprehensive",
    "algorithm",
    "concurrency",
    "distributed",
    "benchmark",
    "security",
];

/// Keywords that mark a prompt as a quick lookup.
const SIMPLE_KEYWORDS: &[&str] = &[
    "list", "show", "print", "display", "what is", "read", "get", "fetch", "status", "count",
];

/// Words whose presence suggests the model will need tools.
const TOOL_KEYWORDS: &[&str] = &["file", "code", "run", "execute", "create", "modify"];

/// Multi-step connective phrases.
const MULTI_STEP_PHRASES: &[&str] = &["then", "step", "first", "after that"];

/// Estimated task complexity, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl ComplexityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::Expert => "expert",
        }
    }

    /// The weakest capability tier allowed for this level (1 strongest).
    pub fn tier_floor(&self) -> u8 {
        match self {
            Self::Expert => 1,
            Self::Complex => 2,
            Self::Moderate => 3,
            Self::Simple => 4,
        }
    }
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The raw signals feeding the level decision.
#[derive(Debug, Clone, Serialize)]
pub struct ComplexitySignals {
    pub input_token_estimate: u32,
    pub complexity_keywords: u32,
    pub simple_keywords: u32,
    pub multi_step: bool,
    pub requires_tools: bool,
    pub requires_thinking: bool,
}

/// A classified prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ComplexityEstimate {
    pub level: ComplexityLevel,
    pub signals: ComplexitySignals,
}

/// Classify a prompt.
pub fn estimate_complexity(prompt: &str) -> ComplexityEstimate {
    let lower = prompt.to_lowercase();
    let len = prompt.len();

    let complexity_keywords = count_matches(&lower, COMPLEXITY_KEYWORDS);
    let simple_keywords = count_matches(&lower, SIMPLE_KEYWORDS);

    let multi_step = MULTI_STEP_PHRASES.iter().any(|p| lower.contains(p))
        || numbered_list_items(&lower) >= 2;

    let requires_tools = TOOL_KEYWORDS.iter().any(|k| lower.contains(k));

    let requires_thinking = complexity_keywords >= 3
        || multi_step
        || len > 2000
        || lower.contains("reason")
        || lower.contains("think");

    let level = if complexity_keywords >= 3 || (multi_step && requires_thinking) {
        ComplexityLevel::Expert
    } else if complexity_keywords >= 1 || multi_step || len > 1000 {
        ComplexityLevel::Complex
    } else if simple_keywords > complexity_keywords && len < 200 {
        ComplexityLevel::Simple
    } else {
        ComplexityLevel::Moderate
    };

    ComplexityEstimate {
        level,
        signals: ComplexitySignals {
            input_token_estimate: len.div_ceil(4) as u32,
            complexity_keywords,
            simple_keywords,
            multi_step,
            requires_tools,
            requires_thinking,
        },
    }
}

fn count_matches(haystack: &str, needles: &[&str]) -> u32 {
    needles.iter().filter(|n| haystack.contains(*n)).count() as u32
}

/// Count `<digit>.` occurrences, the shape of numbered list items.
fn numbered_list_items(text: &str) -> usize {
    let bytes = text.as_bytes();
    bytes
        .windows(2)
        .filter(|w| w[0].is_ascii_digit() && w[1] == b'.')
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lookup_is_simple() {
        let est = estimate_complexity("list files");
        assert_eq!(est.level, ComplexityLevel::Simple);
        assert_eq!(est.signals.simple_keywords, 1);
        assert_eq!(est.signals.complexity_keywords, 0);
        assert!(est.signals.requires_tools);
        assert!(!est.signals.requires_thinking);
    }

    #[test]
    fn keyword_heavy_prompt_is_expert() {
        let est = estimate_complexity(
            "Refactor the authentication system, migrate to JWT, and optimize database queries",
        );
        assert!(est.level >= ComplexityLevel::Complex);
        assert!(est.signals.complexity_keywords >= 3);
        assert!(est.signals.requires_thinking);
    }

    #[test]
    fn multi_step_prompt_is_at_least_complex() {
        let est = estimate_complexity("Do the setup, then install everything, then report back");
        assert!(est.signals.multi_step);
        assert!(est.level >= ComplexityLevel::Complex);
    }

    #[test]
    fn numbered_list_counts_as_multi_step() {
        let est = estimate_complexity("1. clone the repo 2. build it 3. ship it");
        assert!(est.signals.multi_step);
    }

    #[test]
    fn single_numbered_item_is_not_multi_step() {
        let est = estimate_complexity("ship version 2. tomorrow");
        assert!(!est.signals.multi_step);
    }

    #[test]
    fn long_prompt_is_at_least_complex() {
        let prompt = "a ".repeat(600);
        let est = estimate_complexity(&prompt);
        assert!(est.level >= ComplexityLevel::Complex);
    }

    #[test]
    fn bland_prompt_is_moderate() {
        let est = estimate_complexity("Summarize this paragraph for a newsletter audience");
        assert_eq!(est.level, ComplexityLevel::Moderate);
    }

    #[test]
    fn reasoning_words_require_thinking() {
        let est = estimate_complexity("Think carefully about the tradeoffs here");
        assert!(est.signals.requires_thinking);
    }

    #[test]
    fn token_estimate_is_quarter_length() {
        let est = estimate_complexity("abcdefgh");
        assert_eq!(est.signals.input_token_estimate, 2);

        let est = estimate_complexity("abcdefghi");
        assert_eq!(est.signals.input_token_estimate, 3);
    }

    #[test]
    fn tier_floors() {
        assert_eq!(ComplexityLevel::Expert.tier_floor(), 1);
        assert_eq!(ComplexityLevel::Complex.tier_floor(), 2);
        assert_eq!(ComplexityLevel::Moderate.tier_floor(), 3);
        assert_eq!(ComplexityLevel::Simple.tier_floor(), 4);
    }
}
