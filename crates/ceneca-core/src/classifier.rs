//! Trivial Classifier (C7): a single-token classification router deciding
//! the trivial vs. heavy path, independent of the heavy path's health.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::completion::{ChatMessage, CompletionParams, CompletionService};

/// The routing tier a question was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Short-circuit path: bypasses the full graph.
    Trivial,
    /// The full multi-phase workflow is required.
    DataAnalysis,
}

/// The classifier's decision, with enough detail for the orchestrator's
/// performance tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationDecision {
    /// The chosen tier.
    pub tier: Tier,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Why this tier was chosen (model output or heuristic match).
    pub reasoning: String,
    /// Rough estimate of how long the chosen path will take.
    pub estimated_time_ms: u64,
    /// A short operation-type tag for metrics (e.g. `"lookup"`,
    /// `"aggregation"`).
    pub operation_type: String,
}

/// Keywords that indicate a data-analysis question under the heuristic
/// fallback classifier. Used when the model call is ambiguous, empty, or
/// unavailable.
const HEURISTIC_KEYWORDS: &[&str] = &[
    "analyze", "chart", "database", "join", "aggregate", "compare", "trend",
    "correlat", "sum", "average", "count", "group by", "visuali",
];

fn heuristic_classify(question: &str) -> Tier {
    let lower = question.to_lowercase();
    if HEURISTIC_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        Tier::DataAnalysis
    } else {
        Tier::Trivial
    }
}

/// A very small, cheap model call that must return exactly `TRIVIAL` or
/// `DATA_ANALYSIS`.
pub struct TrivialClassifier {
    completion: Arc<CompletionService>,
}

impl TrivialClassifier {
    /// Construct a classifier over the given completion service. The
    /// classifier still functions (via the regex heuristic) even if every
    /// provider in `completion` is circuit-open.
    #[must_use]
    pub fn new(completion: Arc<CompletionService>) -> Self {
        Self { completion }
    }

    /// Classify `question` into a tier.
    pub async fn classify(&self, question: &str) -> ClassificationDecision {
        if question.trim().is_empty() {
            return ClassificationDecision {
                tier: Tier::Trivial,
                confidence: 1.0,
                reasoning: "empty question".to_string(),
                estimated_time_ms: 50,
                operation_type: "noop".to_string(),
            };
        }

        let params = CompletionParams {
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "Respond with exactly one token: TRIVIAL or DATA_ANALYSIS.".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: question.to_string(),
                },
            ],
            max_tokens: 4,
            temperature: 0.0,
        };

        match self.completion.complete(&params).await {
            Ok(raw) => {
                let token = raw.trim().to_uppercase();
                match token.as_str() {
                    "TRIVIAL" => ClassificationDecision {
                        tier: Tier::Trivial,
                        confidence: 0.95,
                        reasoning: "model classified as trivial".to_string(),
                        estimated_time_ms: 500,
                        operation_type: "single_shot".to_string(),
                    },
                    "DATA_ANALYSIS" => ClassificationDecision {
                        tier: Tier::DataAnalysis,
                        confidence: 0.95,
                        reasoning: "model classified as data analysis".to_string(),
                        estimated_time_ms: 5000,
                        operation_type: "workflow".to_string(),
                    },
                    _ => self.fallback(question, "model returned an ambiguous token"),
                }
            }
            Err(_) => self.fallback(question, "model call failed; falling back to heuristic"),
        }
    }

    fn fallback(&self, question: &str, reason: &str) -> ClassificationDecision {
        let tier = heuristic_classify(question);
        let (estimated_time_ms, operation_type) = match tier {
            Tier::Trivial => (500, "single_shot"),
            Tier::DataAnalysis => (5000, "workflow"),
        };
        ClassificationDecision {
            tier,
            confidence: 0.6,
            reasoning: reason.to_string(),
            estimated_time_ms,
            operation_type: operation_type.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{BreakerConfig, CompletionProvider, ProviderError};
    use async_trait::async_trait;

    struct Scripted(String);

    #[async_trait]
    impl CompletionProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _params: &CompletionParams) -> std::result::Result<String, ProviderError> {
            Ok(self.0.clone())
        }
        async fn stream(
            &self,
            _params: &CompletionParams,
        ) -> std::result::Result<Vec<crate::completion::CompletionChunk>, ProviderError> {
            Ok(vec![])
        }
    }

    fn classifier_with_response(resp: &str) -> TrivialClassifier {
        let mut service = CompletionService::new();
        service.register(Arc::new(Scripted(resp.to_string())), BreakerConfig::default());
        TrivialClassifier::new(Arc::new(service))
    }

    #[tokio::test]
    async fn empty_question_is_trivial() {
        let classifier = classifier_with_response("DATA_ANALYSIS");
        let decision = classifier.classify("").await;
        assert_eq!(decision.tier, Tier::Trivial);
    }

    #[tokio::test]
    async fn model_token_trivial_is_respected() {
        let classifier = classifier_with_response("TRIVIAL");
        let decision = classifier.classify("what's 2+2").await;
        assert_eq!(decision.tier, Tier::Trivial);
    }

    #[tokio::test]
    async fn ambiguous_model_response_falls_back_to_heuristic() {
        let classifier = classifier_with_response("uh, not sure");
        let decision = classifier.classify("please join the orders and customers tables").await;
        assert_eq!(decision.tier, Tier::DataAnalysis);
        assert!(decision.reasoning.contains("ambiguous"));
    }

    #[tokio::test]
    async fn all_providers_down_still_classifies_via_heuristic() {
        // No providers registered at all -> complete() always errors.
        let classifier = TrivialClassifier::new(Arc::new(CompletionService::new()));
        let decision = classifier.classify("chart monthly revenue trend").await;
        assert_eq!(decision.tier, Tier::DataAnalysis);
    }

    #[test]
    fn heuristic_matches_keywords_case_insensitively() {
        assert_eq!(heuristic_classify("Please AGGREGATE these rows"), Tier::DataAnalysis);
        assert_eq!(heuristic_classify("what's the weather"), Tier::Trivial);
    }
}
