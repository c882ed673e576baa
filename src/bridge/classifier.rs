//! Best-effort attribution of worker stderr text to pending requests.
//!
//! The worker's stderr carries free text and no request ID. When a line
//! matches one of a few not-found markers, one pending request is failed
//! with a canonical message. Which request is chosen is decided by an
//! `AttributionPolicy`:
//!
//! - `LatestPending` fails the most recently registered request. Under
//!   concurrent in-flight requests this can fail the wrong one.
//! - `SolePending` only acts when exactly one request is outstanding and
//!   otherwise ignores the line.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::RequestId;
use super::actor::PendingRequests;

/// Default markers, matched case-insensitively.
pub const DEFAULT_PATTERNS: &[&str] = &["not found", "does not exist", "status 404"];

/// Canonical message delivered to the attributed request.
pub const DEFAULT_MESSAGE: &str = "User not found";

/// Decides whether an stderr line signals a request failure.
pub trait ErrorClassifier: Send + Sync {
    /// Returns the failure message to deliver, or `None` if the line is noise.
    fn classify(&self, line: &str) -> Option<String>;
}

/// Substring matcher over a fixed set of markers.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    /// Lowercased markers
    patterns: Vec<String>,
    message: String,
}

impl PatternClassifier {
    pub fn new<I, S>(patterns: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            message: message.into(),
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERNS.iter().copied(), DEFAULT_MESSAGE)
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, line: &str) -> Option<String> {
        let lowered = line.to_lowercase();
        self.patterns
            .iter()
            .any(|pattern| lowered.contains(pattern.as_str()))
            .then(|| self.message.clone())
    }
}

/// Which pending request a classified stderr line is attributed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum AttributionPolicy {
    /// Most recently registered request.
    #[default]
    #[value(alias = "latest")]
    LatestPending,
    /// Only when exactly one request is pending.
    #[value(alias = "sole")]
    SolePending,
}

impl AttributionPolicy {
    pub(crate) fn select(self, pending: &PendingRequests) -> Option<RequestId> {
        match self {
            AttributionPolicy::LatestPending => pending.latest(),
            AttributionPolicy::SolePending => pending.sole(),
        }
    }
}

impl fmt::Display for AttributionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributionPolicy::LatestPending => f.write_str("latest-pending"),
            AttributionPolicy::SolePending => f.write_str("sole-pending"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::user_not_found("instagrapi.exceptions.UserNotFound: User not found")]
    #[case::does_not_exist("Target account does not exist")]
    #[case::status_404("HTTP Status 404 for url")]
    #[case::mixed_case("USER NOT FOUND")]
    fn matches_not_found_markers(#[case] line: &str) {
        let classifier = PatternClassifier::default();
        assert_eq!(classifier.classify(line).as_deref(), Some(DEFAULT_MESSAGE));
    }

    #[rstest]
    #[case::rate_limit("Please wait a few minutes before you try again")]
    #[case::traceback("Traceback (most recent call last):")]
    #[case::empty("")]
    fn ignores_other_text(#[case] line: &str) {
        assert_eq!(PatternClassifier::default().classify(line), None);
    }

    #[test]
    fn custom_patterns_and_message() {
        let classifier = PatternClassifier::new(["Challenge Required", ""], "Login challenge");
        assert_eq!(
            classifier.classify("challenge required by server").as_deref(),
            Some("Login challenge")
        );
        assert_eq!(classifier.classify("anything else"), None);
    }

    #[test]
    fn latest_policy_picks_last_registered() {
        let mut pending = PendingRequests::new();
        let _a = pending.register(RequestId::from("a"), "fetch");
        let _b = pending.register(RequestId::from("b"), "fetch");

        assert_eq!(
            AttributionPolicy::LatestPending.select(&pending),
            Some(RequestId::from("b"))
        );
    }

    #[test]
    fn sole_policy_declines_when_ambiguous() {
        let mut pending = PendingRequests::new();
        let _a = pending.register(RequestId::from("a"), "fetch");
        assert_eq!(
            AttributionPolicy::SolePending.select(&pending),
            Some(RequestId::from("a"))
        );

        let _b = pending.register(RequestId::from("b"), "fetch");
        assert_eq!(AttributionPolicy::SolePending.select(&pending), None);
    }

    #[rstest]
    #[case("latest-pending", AttributionPolicy::LatestPending)]
    #[case("latest", AttributionPolicy::LatestPending)]
    #[case("sole-pending", AttributionPolicy::SolePending)]
    #[case("sole", AttributionPolicy::SolePending)]
    fn policy_parses(#[case] text: &str, #[case] expected: AttributionPolicy) {
        assert_eq!(AttributionPolicy::from_str(text, false), Ok(expected));
    }

    #[test]
    fn policy_rejects_unknown_name() {
        assert!(AttributionPolicy::from_str("first", false).is_err());
    }

    #[test]
    fn policy_display_matches_value_names() {
        for policy in AttributionPolicy::value_variants() {
            let value = policy.to_possible_value().unwrap();
            assert_eq!(policy.to_string(), value.get_name());
        }
    }

    #[test]
    fn policy_names_agree_with_config_spelling() {
        let parsed: AttributionPolicy = serde_json::from_str("\"sole-pending\"").unwrap();
        assert_eq!(parsed, AttributionPolicy::SolePending);
        assert_eq!(
            serde_json::to_string(&AttributionPolicy::LatestPending).unwrap(),
            "\"latest-pending\""
        );
    }
}
