//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El resto del pipeline sólo ve el trait [`LanguageModel`], de modo que los
//! tests sustituyen el servicio externo por respuestas deterministas.

use async_trait::async_trait;
use rig::completion::Prompt;

use crate::{
    config::{AppConfig, LlmProvider},
    error::LlmError,
};

/// Capacidad de generación de texto que consume el pipeline.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Completa `prompt` bajo las instrucciones de sistema `preamble`.
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, LlmError>;
}

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        }
    }

    async fn complete_with_openai(&self, preamble: &str, prompt: &str) -> Result<String, LlmError> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(preamble)
            .temperature(0.0)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))
    }
}

#[async_trait]
impl LanguageModel for LlmManager {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, LlmError> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(preamble, prompt).await,
            ref other => Err(LlmError::Unsupported(format!("{other:?}"))),
        }
    }
}

/// Limpia la respuesta del LLM de vallas markdown (```json, ```cypher, ```).
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Salta la etiqueta de lenguaje de la primera línea
    let rest = match rest.find('\n') {
        Some(idx) if !rest[..idx].contains(char::is_whitespace) => &rest[idx + 1..],
        _ => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_removed() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(
            strip_code_fences("```cypher\nMATCH (n) RETURN n.name\n```"),
            "MATCH (n) RETURN n.name"
        );
        assert_eq!(strip_code_fences("```\nRETURN 1```"), "RETURN 1");
        assert_eq!(strip_code_fences("  RETURN 1 "), "RETURN 1");
    }

    #[tokio::test]
    async fn unsupported_providers_fail_without_network() {
        let manager = LlmManager {
            provider: LlmProvider::Ollama,
            chat_model: String::new(),
        };
        let err = manager.complete("sys", "hola").await.unwrap_err();
        assert!(matches!(err, LlmError::Unsupported(_)));
    }
}
