//! Inference provider adapters.
//!
//! One capability trait, two concrete adapters: a local Ollama daemon and
//! the remote Groq API. The router picks between them on sensitivity
//! grounds; nothing in this module ever falls back from one adapter to
//! the other.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{LocalProviderConfig, RemoteProviderConfig};
use crate::error::ProviderError;
use crate::models::GenerationOutput;

/// Uniform generation capability. Both adapters implement exactly this
/// and nothing more.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Short provider name, e.g. "ollama" or "groq".
    fn name(&self) -> &str;

    /// Model identifier requests will run against.
    fn model_id(&self) -> &str;

    /// True when inference never leaves the local machine.
    fn is_local(&self) -> bool;

    /// Whether the provider can serve a request right now.
    async fn is_available(&self) -> bool;

    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<GenerationOutput, ProviderError>;
}

// ============ Ollama (local) ============

/// Adapter for a local Ollama daemon. Sensitive context only ever flows
/// through this one.
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &LocalProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured {
                provider: "ollama".to_string(),
                reason: format!("failed to build http client: {e}"),
            })?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl InferenceProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn is_local(&self) -> bool {
        true
    }

    /// The daemon must respond and the configured model must be pulled.
    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "ollama availability check failed");
                return false;
            }
        };
        if !response.status().is_success() {
            return false;
        }
        let json: serde_json::Value = match response.json().await {
            Ok(j) => j,
            Err(_) => return false,
        };
        model_is_listed(&json, &self.model)
    }

    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<GenerationOutput, ProviderError> {
        let start = Instant::now();
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Unavailable {
                        provider: "ollama".to_string(),
                        reason: e.to_string(),
                    }
                } else {
                    ProviderError::RequestFailed {
                        provider: "ollama".to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            // 404 from the daemon means the model is not pulled.
            return Err(if status.as_u16() == 404 {
                ProviderError::NotConfigured {
                    provider: "ollama".to_string(),
                    reason: format!("model '{}' not found: {body_text}", self.model),
                }
            } else if status.as_u16() == 429 || status.is_server_error() {
                ProviderError::Unavailable {
                    provider: "ollama".to_string(),
                    reason: format!("HTTP {status}: {body_text}"),
                }
            } else {
                ProviderError::RequestFailed {
                    provider: "ollama".to_string(),
                    reason: format!("HTTP {status}: {body_text}"),
                }
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            ProviderError::RequestFailed {
                provider: "ollama".to_string(),
                reason: format!("invalid response body: {e}"),
            }
        })?;

        let output = parse_ollama_response(&json, &self.model, start.elapsed().as_millis() as u64)?;
        debug!(model = %output.model, tokens = ?output.tokens_used, "ollama generation complete");
        Ok(output)
    }
}

/// True when `/api/tags` lists the model, with or without a tag suffix.
fn model_is_listed(tags: &serde_json::Value, model: &str) -> bool {
    let Some(models) = tags.get("models").and_then(|m| m.as_array()) else {
        return false;
    };
    let prefix = format!("{model}:");
    models.iter().any(|m| {
        m.get("name")
            .and_then(|n| n.as_str())
            .map(|name| name == model || name.starts_with(&prefix))
            .unwrap_or(false)
    })
}

fn parse_ollama_response(
    json: &serde_json::Value,
    fallback_model: &str,
    elapsed_ms: u64,
) -> Result<GenerationOutput, ProviderError> {
    let text = json
        .get("response")
        .and_then(|r| r.as_str())
        .ok_or_else(|| ProviderError::RequestFailed {
            provider: "ollama".to_string(),
            reason: "response text missing from body".to_string(),
        })?;

    Ok(GenerationOutput {
        text: text.to_string(),
        model: json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(fallback_model)
            .to_string(),
        provider: "ollama".to_string(),
        tokens_used: json.get("eval_count").and_then(|c| c.as_u64()).map(|c| c as u32),
        duration_ms: json
            .get("total_duration")
            .and_then(|d| d.as_u64())
            .map(|ns| ns / 1_000_000)
            .unwrap_or(elapsed_ms),
    })
}

// ============ Groq (remote) ============

/// Adapter for the Groq API (OpenAI-compatible chat completions). Only
/// low-sensitivity context may ever reach it; the router enforces that.
pub struct GroqProvider {
    base_url: String,
    model: String,
    api_key_env: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GroqProvider {
    /// Reads the API key from the configured environment variable. A
    /// missing key is not a construction error: the adapter exists but
    /// reports itself unavailable until the key is provided.
    pub fn new(config: &RemoteProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured {
                provider: "groq".to_string(),
                reason: format!("failed to build http client: {e}"),
            })?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            api_key,
            client,
        })
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: "groq".to_string(),
                reason: format!("{} not set", self.api_key_env),
            })
    }
}

#[async_trait]
impl InferenceProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn is_local(&self) -> bool {
        false
    }

    /// Configured means available; no probe request is made.
    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<GenerationOutput, ProviderError> {
        let api_key = self.key()?;
        let start = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable {
                provider: "groq".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ProviderError::NotConfigured {
                    provider: "groq".to_string(),
                    reason: format!("API key rejected: {body_text}"),
                },
                429 => ProviderError::Unavailable {
                    provider: "groq".to_string(),
                    reason: format!("rate limited: {body_text}"),
                },
                _ if status.is_server_error() => ProviderError::Unavailable {
                    provider: "groq".to_string(),
                    reason: format!("HTTP {status}: {body_text}"),
                },
                _ => ProviderError::RequestFailed {
                    provider: "groq".to_string(),
                    reason: format!("HTTP {status}: {body_text}"),
                },
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            ProviderError::RequestFailed {
                provider: "groq".to_string(),
                reason: format!("invalid response body: {e}"),
            }
        })?;

        let output = parse_groq_response(&json, &self.model, start.elapsed().as_millis() as u64)?;
        debug!(model = %output.model, tokens = ?output.tokens_used, "groq generation complete");
        Ok(output)
    }
}

fn parse_groq_response(
    json: &serde_json::Value,
    fallback_model: &str,
    elapsed_ms: u64,
) -> Result<GenerationOutput, ProviderError> {
    let text = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| ProviderError::RequestFailed {
            provider: "groq".to_string(),
            reason: "no completion in response".to_string(),
        })?;

    Ok(GenerationOutput {
        text: text.to_string(),
        model: json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(fallback_model)
            .to_string(),
        provider: "groq".to_string(),
        tokens_used: json
            .pointer("/usage/total_tokens")
            .and_then(|t| t.as_u64())
            .map(|t| t as u32),
        duration_ms: elapsed_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_is_listed_matches_tag_suffix() {
        let tags = json!({"models": [
            {"name": "llama3.1:8b"},
            {"name": "mistral:latest"},
        ]});
        assert!(model_is_listed(&tags, "llama3.1:8b"));
        assert!(model_is_listed(&tags, "llama3.1"));
        assert!(model_is_listed(&tags, "mistral"));
        assert!(!model_is_listed(&tags, "llama3"));
        assert!(!model_is_listed(&json!({}), "llama3.1:8b"));
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = json!({
            "response": "You spent 412.50 on groceries.",
            "model": "llama3.1:8b",
            "eval_count": 42,
            "total_duration": 1_500_000_000u64,
            "done": true,
        });
        let out = parse_ollama_response(&json, "fallback", 9).unwrap();
        assert_eq!(out.text, "You spent 412.50 on groceries.");
        assert_eq!(out.model, "llama3.1:8b");
        assert_eq!(out.provider, "ollama");
        assert_eq!(out.tokens_used, Some(42));
        assert_eq!(out.duration_ms, 1500);
    }

    #[test]
    fn test_parse_ollama_response_missing_text_is_error() {
        let err = parse_ollama_response(&json!({"done": true}), "m", 0).unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed { .. }));
    }

    #[test]
    fn test_parse_groq_response() {
        let json = json!({
            "choices": [{"message": {"role": "assistant", "content": "Here is the trend."},
                         "finish_reason": "stop"}],
            "model": "llama-3.1-70b-versatile",
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120},
        });
        let out = parse_groq_response(&json, "fallback", 250).unwrap();
        assert_eq!(out.text, "Here is the trend.");
        assert_eq!(out.provider, "groq");
        assert_eq!(out.tokens_used, Some(120));
        assert_eq!(out.duration_ms, 250);
    }

    #[test]
    fn test_parse_groq_response_without_choices_is_error() {
        let err = parse_groq_response(&json!({"choices": []}), "m", 0).unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed { .. }));
    }

    #[tokio::test]
    async fn test_groq_without_key_is_not_configured() {
        let config = RemoteProviderConfig {
            api_key_env: "QH_TEST_MISSING_GROQ_KEY".to_string(),
            ..RemoteProviderConfig::default()
        };
        let provider = GroqProvider::new(&config).unwrap();
        assert!(!provider.is_available().await);

        let err = provider.generate("hi", None, 0.3, 100).await.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.provider(), "groq");
    }

    #[test]
    fn test_provider_identity() {
        let ollama = OllamaProvider::new(&LocalProviderConfig::default()).unwrap();
        assert_eq!(ollama.name(), "ollama");
        assert!(ollama.is_local());
        assert_eq!(ollama.model_id(), "llama3.1:8b");

        let groq = GroqProvider::new(&RemoteProviderConfig::default()).unwrap();
        assert_eq!(groq.name(), "groq");
        assert!(!groq.is_local());
    }
}
