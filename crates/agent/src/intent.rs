//! Intent router: a cheap, synchronous classification of a raw request.
//!
//! The router never does I/O. It normalizes the text, matches it against
//! fixed token sets and resolves one [`Intent`] by priority:
//! diagnose > code_write > review > default hard-mode review > chat/research.
//!
//! Tokens match whole words and their common inflections, so "crash" matches
//! "crashes" and "debug" matches "debugging", but "fix" never matches
//! "prefix". Tokens shorter than three letters ("go", "ci") match exactly.
//! Multi-word tokens like "build failed" match as a phrase.

use serde::{Deserialize, Serialize};

/// Any of these forces a non-chat outcome.
const HARD_MODE_TOKENS: &[&str] = &[
    "code", "repo", "review", "improve", "architecture", "swift", "xcode", "auth", "service",
    "tests", "refactor", "bug", "error", "crash", "build", "compile", "lint", "ci", "workflow",
    "model", "view", "viewmodel", "screen", "firebase", "api", "networking", "concurrency",
    "actor", "mainactor", "performance", "memory", "leak", "ui", "ux", "beam", "feed", "cell",
    "python", "typescript", "javascript", "rust", "go", "kotlin", "java", "test", "pytest",
    "unittest", "jest", "debug", "fix", "implement", "create", "add", "update", "delete",
    "remove", "migrate", "deploy",
];

const DIAGNOSE_TRIGGERS: &[&str] = &[
    "error", "crash", "failing", "fails", "stack trace", "traceback", "exception",
    "build failed", "test failed", "compile", "broken", "not working", "doesn't work", "bug",
    "issue",
];

const CODE_WRITE_TRIGGERS: &[&str] = &[
    "create", "implement", "wire", "add", "generate", "refactor", "write", "build", "make",
    "update", "migrate", "delete", "remove", "modify", "change", "fix", "develop", "design",
    "construct",
];

const REVIEW_TRIGGERS: &[&str] = &[
    "review", "how is my code", "thoughts on", "quality", "improve", "architecture", "audit",
    "analyze", "assess", "evaluate", "check", "how are we doing", "what do you think",
];

const QUESTION_WORDS: &[&str] = &["what", "how", "why", "where", "when", "who"];

/// Endings accepted after a token's stem.
const INFLECTIONS: &[&str] = &["s", "es", "d", "ed", "ing", "r", "er", "ers", "rs"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Chat,
    CodeWrite,
    ReviewQuick,
    ReviewExhaustive,
    Diagnose,
    Research,
}

impl Intent {
    /// Every intent except plain chat needs the repository.
    pub fn requires_repo(self) -> bool {
        !matches!(self, Self::Chat)
    }

    pub fn requires_verification_loop(self) -> bool {
        matches!(self, Self::CodeWrite | Self::Diagnose)
    }

    /// Banner shown by the CLI.
    pub fn label(self) -> &'static str {
        match self {
            Self::Chat => "MODE: CHAT",
            Self::CodeWrite => "MODE: CODE_WRITE",
            Self::ReviewQuick => "MODE: REVIEW (Quick)",
            Self::ReviewExhaustive => "MODE: REVIEW (Deep)",
            Self::Diagnose => "MODE: DIAGNOSE",
            Self::Research => "MODE: RESEARCH",
        }
    }
}

/// The router's verdict for one request. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDecision {
    pub intent: Intent,
    pub confidence: f32,
    pub hard_mode_triggered: bool,
    /// Hard-mode tokens found, in table order
    pub matched_tokens: Vec<String>,
    pub rationale: String,
    pub requires_repo: bool,
    pub requires_verification_loop: bool,
}

impl IntentDecision {
    fn new(
        intent: Intent,
        confidence: f32,
        matched_tokens: Vec<String>,
        rationale: String,
    ) -> Self {
        Self {
            intent,
            confidence,
            hard_mode_triggered: !matched_tokens.is_empty(),
            matched_tokens,
            rationale,
            requires_repo: intent.requires_repo(),
            requires_verification_loop: intent.requires_verification_loop(),
        }
    }
}

/// Lowercase, trim and collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Split normalized text into words: punctuation other than apostrophes
/// separates.
fn split_words(normalized: &str) -> Vec<&str> {
    normalized
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect()
}

/// `word` is `base` or an inflected form of it ("errors", "compiler",
/// "debugging").
fn is_form_of(word: &str, base: &str) -> bool {
    if word == base {
        return true;
    }
    if base.chars().count() < 3 {
        return false;
    }

    let mut stems = vec![base.to_string()];
    if let Some(stem) = base.strip_suffix('e') {
        stems.push(stem.to_string());
    }
    if let Some(last) = base.chars().last() {
        stems.push(format!("{base}{last}"));
    }
    stems.iter().any(|stem| {
        word.strip_prefix(stem.as_str())
            .is_some_and(|rest| INFLECTIONS.contains(&rest))
    })
}

/// The token occurs in `words`: leading words of a phrase exactly, the
/// last one possibly inflected.
fn contains_token(words: &[&str], token: &str) -> bool {
    let parts: Vec<&str> = token.split(' ').collect();
    let Some((last, head)) = parts.split_last() else {
        return false;
    };
    words
        .windows(parts.len())
        .any(|window| &window[..head.len()] == head && is_form_of(window[head.len()], last))
}

fn matches<'a>(words: &[&str], table: &[&'a str]) -> Vec<&'a str> {
    table
        .iter()
        .copied()
        .filter(|token| contains_token(words, token))
        .collect()
}

fn confidence_for(hits: usize) -> f32 {
    if hits > 1 { 0.95 } else { 0.85 }
}

/// Classify a raw user request.
pub fn classify(text: &str) -> IntentDecision {
    let normalized = normalize(text);
    let words = split_words(&normalized);

    let matched: Vec<String> = matches(&words, HARD_MODE_TOKENS)
        .into_iter()
        .map(String::from)
        .collect();

    if !matched.is_empty() {
        let diagnose = matches(&words, DIAGNOSE_TRIGGERS);
        if !diagnose.is_empty() {
            return IntentDecision::new(
                Intent::Diagnose,
                confidence_for(diagnose.len()),
                matched,
                format!("Diagnose triggers detected: {diagnose:?}"),
            );
        }

        let write = matches(&words, CODE_WRITE_TRIGGERS);
        if !write.is_empty() {
            return IntentDecision::new(
                Intent::CodeWrite,
                confidence_for(write.len()),
                matched,
                format!("Code write triggers detected: {write:?}"),
            );
        }

        let review = matches(&words, REVIEW_TRIGGERS);
        if !review.is_empty() {
            return IntentDecision::new(
                Intent::ReviewExhaustive,
                confidence_for(review.len()),
                matched,
                format!("Review triggers detected: {review:?}"),
            );
        }

        return IntentDecision::new(
            Intent::ReviewExhaustive,
            0.80,
            matched,
            "Hard mode triggered, defaulting to exhaustive review".into(),
        );
    }

    if !matches(&words, REVIEW_TRIGGERS).is_empty() {
        return IntentDecision::new(
            Intent::ReviewQuick,
            0.75,
            Vec::new(),
            "Review keywords without hard mode tokens".into(),
        );
    }

    let first_word = words.first().copied().unwrap_or("");
    if normalized.ends_with('?') || QUESTION_WORDS.iter().any(|q| first_word.starts_with(q)) {
        return IntentDecision::new(
            Intent::Research,
            0.70,
            Vec::new(),
            "Question pattern detected".into(),
        );
    }

    IntentDecision::new(
        Intent::Chat,
        0.60,
        Vec::new(),
        "No special patterns detected, defaulting to chat".into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_greeting_is_chat() {
        let d = classify("hello there");
        assert_eq!(d.intent, Intent::Chat);
        assert!(!d.hard_mode_triggered);
        assert!(!d.requires_repo);
        assert!(!d.requires_verification_loop);
        assert!((d.confidence - 0.60).abs() < f32::EPSILON);
    }

    #[test]
    fn diagnose_beats_code_write() {
        let d = classify("Fix the crash in the login screen");
        assert_eq!(d.intent, Intent::Diagnose);
        assert!(d.hard_mode_triggered);
        assert!(d.requires_verification_loop);
        assert!(d.matched_tokens.contains(&"fix".to_string()));
        assert!(d.matched_tokens.contains(&"crash".to_string()));
    }

    #[test]
    fn diagnose_confidence_scales_with_hits() {
        assert!((classify("there is a bug").confidence - 0.85).abs() < f32::EPSILON);
        assert!((classify("the build failed with an error").confidence - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn code_write_from_action_verbs() {
        let d = classify("add a docstring to the api module");
        assert_eq!(d.intent, Intent::CodeWrite);
        assert!(d.requires_repo);
        assert!(d.requires_verification_loop);
    }

    #[test]
    fn hard_mode_review() {
        let d = classify("review the architecture of this repo");
        assert_eq!(d.intent, Intent::ReviewExhaustive);
        assert!((d.confidence - 0.95).abs() < f32::EPSILON);
        assert!(!d.requires_verification_loop);
    }

    #[test]
    fn hard_mode_token_alone_is_never_chat() {
        let d = classify("rust");
        assert_eq!(d.intent, Intent::ReviewExhaustive);
        assert!((d.confidence - 0.80).abs() < f32::EPSILON);
        assert_eq!(d.matched_tokens, vec!["rust"]);
    }

    #[test]
    fn soft_review_is_quick() {
        let d = classify("what do you think of this essay");
        assert_eq!(d.intent, Intent::ReviewQuick);
        assert!(!d.hard_mode_triggered);
        assert!(d.requires_repo);
    }

    #[test]
    fn questions_are_research() {
        assert_eq!(classify("Why is the sky blue").intent, Intent::Research);
        assert_eq!(classify("is it raining today?").intent, Intent::Research);
    }

    #[test]
    fn word_boundaries_respected() {
        // "prefix" contains "fix", "going" contains "go", "scissors" contains "ci"
        let d = classify("the prefix is going to the scissors");
        assert_eq!(d.intent, Intent::Chat);
        assert!(d.matched_tokens.is_empty());
    }

    #[test]
    fn inflected_triggers_route_like_their_base() {
        let d = classify("The app crashes on startup");
        assert_eq!(d.intent, Intent::Diagnose);
        assert!(d.hard_mode_triggered);

        let d = classify("Refactoring the login flow");
        assert_eq!(d.intent, Intent::CodeWrite);
        assert_eq!(d.matched_tokens, vec!["refactor"]);

        let d = classify("errors everywhere after upgrading");
        assert_eq!(d.intent, Intent::Diagnose);

        for text in ["the compiler is slow", "nightly builds", "I tested it", "debugging this"] {
            assert_ne!(classify(text).intent, Intent::Chat, "{text}");
        }
    }

    #[test]
    fn inflection_needs_a_known_ending() {
        // "report" starts with "repo", "address" with "add"
        assert!(!is_form_of("report", "repo"));
        assert!(!is_form_of("address", "add"));
        assert!(is_form_of("compiling", "compile"));
        assert!(is_form_of("fixes", "fix"));
        assert!(!is_form_of("goes", "go"));
    }

    #[test]
    fn punctuation_is_a_boundary() {
        let d = classify("tests: broken!");
        assert_eq!(d.intent, Intent::Diagnose);
    }

    #[test]
    fn phrases_match_across_collapsed_whitespace() {
        let d = classify("my   code\n doesn't   work");
        assert_eq!(d.intent, Intent::Diagnose);
        assert!(d.rationale.contains("doesn't work"));
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize("  Hello\t\tWORLD \n"), "hello world");
    }

    #[test]
    fn derived_flags_are_total() {
        for intent in [
            Intent::Chat,
            Intent::CodeWrite,
            Intent::ReviewQuick,
            Intent::ReviewExhaustive,
            Intent::Diagnose,
            Intent::Research,
        ] {
            assert_eq!(intent.requires_repo(), intent != Intent::Chat);
            assert_eq!(
                intent.requires_verification_loop(),
                matches!(intent, Intent::CodeWrite | Intent::Diagnose)
            );
            assert!(intent.label().starts_with("MODE: "));
        }
    }

    #[test]
    fn decision_serializes_snake_case() {
        let json = serde_json::to_string(&classify("implement auth")).unwrap();
        assert!(json.contains(r#""intent":"code_write""#));
    }
}
