//! Classification Node: decides the trivial/data-analysis tier and which
//! registered sources the question plausibly concerns.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::classifier::{ClassificationDecision, TrivialClassifier};
use crate::error::Result;
use crate::registry::{SchemaRegistry, SourceKind};
use crate::workflow_state::{StepRecord, WorkflowState};

/// Runs [`TrivialClassifier`] and a simple name-match source identification
/// pass, writing both into the workflow state.
pub struct ClassificationNode {
    classifier: Arc<TrivialClassifier>,
    registry: Arc<dyn SchemaRegistry>,
}

fn question_hash(question: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    question.hash(&mut hasher);
    hasher.finish()
}

impl ClassificationNode {
    /// Construct a node over the given classifier and registry.
    #[must_use]
    pub fn new(classifier: Arc<TrivialClassifier>, registry: Arc<dyn SchemaRegistry>) -> Self {
        Self { classifier, registry }
    }

    /// Classify `state.question`, identify candidate sources, and record a
    /// step. Returns the classification decision for the caller to route on.
    ///
    /// The decision is cached per `(session, hash(question))` (§4.11): a
    /// repeated identical question within the same session is a cache hit,
    /// so the classifier is not called twice for the same input.
    pub async fn run(&self, state: &mut WorkflowState) -> Result<ClassificationDecision> {
        let key = question_hash(&state.question);
        let decision = match state.classification_cache.get(&key) {
            Some(cached) => cached.clone(),
            None => {
                let decision = self.classifier.classify(&state.question).await;
                state.classification_cache.insert(key, decision.clone());
                decision
            }
        };
        let (identified, reasoning) = self.identify_sources(&state.question).await?;
        state.cross_source = self.spans_multiple_kinds(&identified).await?;
        state.identified_sources = identified;
        state.source_reasoning = reasoning;
        state.last_classification_confidence = decision.confidence;
        state.step_history.push(StepRecord {
            node_id: "classification".to_string(),
            summary: format!("tier={:?} confidence={:.2}", decision.tier, decision.confidence),
            timestamp: chrono::Utc::now(),
        });
        Ok(decision)
    }

    /// Sources whose id appears (case-insensitively) in the question; falls
    /// back to every registered source when nothing matches by name, since a
    /// question can plausibly reference a source only by its data rather
    /// than its id (e.g. "how many orders last week"). An empty question
    /// carries no intent to fall back from, so it always resolves to no
    /// sources. Returns the matched ids alongside a one-line reasoning
    /// string per id (§4.11 "per-source reasoning").
    async fn identify_sources(&self, question: &str) -> Result<(Vec<String>, std::collections::HashMap<String, String>)> {
        if question.trim().is_empty() {
            return Ok((Vec::new(), std::collections::HashMap::new()));
        }

        let lower = question.to_lowercase();
        let sources = self.registry.list_sources().await?;

        let mut matched: Vec<String> = sources
            .iter()
            .filter(|s| lower.contains(&s.id.to_lowercase()))
            .map(|s| s.id.clone())
            .collect();

        let named_by_id = !matched.is_empty();
        if !named_by_id {
            matched = sources.into_iter().map(|s| s.id).collect();
        }
        matched.sort();
        matched.dedup();

        let reason = if named_by_id {
            "named explicitly in the question"
        } else {
            "no source named explicitly; falling back to every registered source"
        };
        let reasoning = matched.iter().map(|id| (id.clone(), reason.to_string())).collect();
        Ok((matched, reasoning))
    }

    /// Whether the given source ids span more than one distinct source kind
    /// (§4.11 "cross-source flag").
    async fn spans_multiple_kinds(&self, source_ids: &[String]) -> Result<bool> {
        let mut kinds = std::collections::HashSet::new();
        for source_id in source_ids {
            let kind = self.registry.get_source(source_id).await?.map(|s| s.kind).unwrap_or(SourceKind::Other);
            kinds.insert(kind);
            if kinds.len() > 1 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{BreakerConfig, CompletionParams, CompletionProvider, CompletionService, ProviderError};
    use crate::registry::{InMemorySchemaRegistry, SourceKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider(Arc<AtomicUsize>);

    #[async_trait]
    impl CompletionProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }
        async fn complete(&self, _params: &CompletionParams) -> std::result::Result<String, ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("TRIVIAL".to_string())
        }
        async fn stream(
            &self,
            _params: &CompletionParams,
        ) -> std::result::Result<Vec<crate::completion::CompletionChunk>, ProviderError> {
            Ok(vec![])
        }
    }

    async fn node() -> (ClassificationNode, Arc<InMemorySchemaRegistry>) {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        registry.upsert_source("orders_db", "postgres://x", SourceKind::Relational).await.unwrap();
        registry.upsert_source("support_chat", "internal://x", SourceKind::ChatLog).await.unwrap();
        let classifier = Arc::new(TrivialClassifier::new(Arc::new(CompletionService::new())));
        (ClassificationNode::new(classifier, registry.clone()), registry)
    }

    #[tokio::test]
    async fn identifies_source_named_in_question() {
        let (node, _registry) = node().await;
        let mut state = WorkflowState::new("s1", "how many rows in orders_db", crate::workflow_state::WorkflowKind::DataAnalysis);
        node.run(&mut state).await.unwrap();
        assert_eq!(state.identified_sources, vec!["orders_db".to_string()]);
        assert!(!state.cross_source, "a single named source is not cross-source");
        assert!(state.source_reasoning["orders_db"].contains("named explicitly"));
    }

    #[tokio::test]
    async fn falls_back_to_all_sources_when_nothing_named() {
        let (node, _registry) = node().await;
        let mut state = WorkflowState::new("s1", "what's the weather", crate::workflow_state::WorkflowKind::DataAnalysis);
        node.run(&mut state).await.unwrap();
        assert_eq!(state.identified_sources.len(), 2);
        assert!(state.cross_source, "orders_db is relational, support_chat is chat-log");
        assert!(state.source_reasoning.values().all(|r| r.contains("falling back")));
    }

    #[tokio::test]
    async fn records_a_step() {
        let (node, _registry) = node().await;
        let mut state = WorkflowState::new("s1", "how many rows in orders_db", crate::workflow_state::WorkflowKind::DataAnalysis);
        node.run(&mut state).await.unwrap();
        assert_eq!(state.step_history.len(), 1);
        assert_eq!(state.step_history[0].node_id, "classification");
    }

    #[tokio::test]
    async fn empty_question_identifies_no_sources() {
        let (node, _registry) = node().await;
        let mut state = WorkflowState::new("s1", "", crate::workflow_state::WorkflowKind::DataAnalysis);
        node.run(&mut state).await.unwrap();
        assert!(state.identified_sources.is_empty());
    }

    #[tokio::test]
    async fn whitespace_only_question_identifies_no_sources() {
        let (node, _registry) = node().await;
        let mut state = WorkflowState::new("s1", "   ", crate::workflow_state::WorkflowKind::DataAnalysis);
        node.run(&mut state).await.unwrap();
        assert!(state.identified_sources.is_empty());
    }

    #[tokio::test]
    async fn repeated_question_within_session_is_a_cache_hit() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        registry.upsert_source("orders_db", "postgres://x", SourceKind::Relational).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut service = CompletionService::new();
        service.register(Arc::new(CountingProvider(calls.clone())), BreakerConfig::default());
        let node = ClassificationNode::new(Arc::new(TrivialClassifier::new(Arc::new(service))), registry);

        let mut state = WorkflowState::new("s1", "how many rows in orders_db", crate::workflow_state::WorkflowKind::DataAnalysis);
        node.run(&mut state).await.unwrap();
        node.run(&mut state).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "second run should be a cache hit, not a second model call");
        assert_eq!(state.classification_cache.len(), 1);
    }
}
