//! Sensitivity-driven routing between the local and remote providers.
//!
//! The router owns exactly two adapters and selects one per request from
//! the sensitivity analysis. A chosen provider that fails is a hard
//! failure: availability never overrides a routing decision, in either
//! direction.

use std::sync::Arc;

use tracing::debug;

use crate::error::ProviderError;
use crate::models::{ChatMessage, GenerationOutput, RetrievalResult, RoutingContext, RoutingDecision};
use crate::prompts::{rag_system_prompt, rag_user_prompt};
use crate::providers::InferenceProvider;
use crate::sensitivity;

pub struct InferenceRouter {
    local: Arc<dyn InferenceProvider>,
    remote: Arc<dyn InferenceProvider>,
}

impl InferenceRouter {
    pub fn new(local: Arc<dyn InferenceProvider>, remote: Arc<dyn InferenceProvider>) -> Self {
        Self { local, remote }
    }

    /// The adapter a decision maps to. `None` never reaches generation,
    /// so it resolves to the local adapter.
    pub fn provider(&self, decision: RoutingDecision) -> Arc<dyn InferenceProvider> {
        match decision {
            RoutingDecision::Remote => Arc::clone(&self.remote),
            RoutingDecision::Local | RoutingDecision::None => Arc::clone(&self.local),
        }
    }

    /// Analyze, route, and generate. Returns the provider output together
    /// with the routing record explaining the choice.
    pub async fn generate(
        &self,
        query: &str,
        context_text: &str,
        results: &[RetrievalResult],
        temperature: f32,
        max_tokens: u32,
        history: Option<&[ChatMessage]>,
    ) -> Result<(GenerationOutput, RoutingContext), ProviderError> {
        let analysis = sensitivity::analyze(query, results);
        let decision = if analysis.requires_local {
            RoutingDecision::Local
        } else {
            RoutingDecision::Remote
        };
        let provider = self.provider(decision);

        let routing = RoutingContext {
            max_sensitivity: analysis.max_sensitivity,
            has_restricted_content: analysis.has_restricted_content,
            complexity: analysis.complexity,
            decision,
            provider_name: provider.name().to_string(),
            reason: analysis.reason.to_string(),
        };

        debug!(
            decision = decision.as_str(),
            provider = %routing.provider_name,
            reason = %routing.reason,
            "routing decision"
        );

        let prompt = rag_user_prompt(query, context_text, history);
        let output = provider
            .generate(&prompt, Some(rag_system_prompt()), temperature, max_tokens)
            .await?;

        Ok((output, routing))
    }

    /// Availability snapshot of both adapters, for the status surface.
    pub async fn provider_status(&self) -> serde_json::Value {
        serde_json::json!({
            "local": {
                "name": self.local.name(),
                "model": self.local.model_id(),
                "available": self.local.is_available().await,
            },
            "remote": {
                "name": self.remote.name(),
                "model": self.remote.model_id(),
                "available": self.remote.is_available().await,
            },
        })
    }
}
