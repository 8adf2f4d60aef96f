//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + pipeline).

use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,

    /// Fichero por defecto donde se persiste la lista de entidades extraídas.
    pub extract_output_file: String,
    /// Máximo de resúmenes en vuelo durante la extracción.
    pub summary_concurrency: usize,
    /// Máximo de sub-preguntas traducidas/ejecutadas a la vez.
    pub query_concurrency: usize,
    pub ask_timeout: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = llm_provider_str.parse::<LlmProvider>()?;

        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let extract_output_file =
            env::var("EXTRACT_OUTPUT_FILE").unwrap_or_else(|_| "code_parser.json".to_string());

        let summary_concurrency = parse_usize_var("SUMMARY_CONCURRENCY", 4)?.max(1);
        let query_concurrency = parse_usize_var("QUERY_CONCURRENCY", 4)?.max(1);
        let ask_timeout = Duration::from_secs(parse_usize_var("ASK_TIMEOUT_SECS", 120)? as u64);

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_chat_model,
            extract_output_file,
            summary_concurrency,
            query_concurrency,
            ask_timeout,
        })
    }
}

fn parse_usize_var(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|e| anyhow!("Valor inválido para {name} ('{raw}'): {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl AppConfig {
    /// Configuración mínima para los tests, sin tocar el entorno del proceso.
    pub fn for_tests() -> Self {
        Self {
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "test".to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            llm_provider: LlmProvider::OpenAI,
            llm_chat_model: "gpt-4o-mini".to_string(),
            extract_output_file: "code_parser.json".to_string(),
            summary_concurrency: 2,
            query_concurrency: 2,
            ask_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing_is_case_insensitive() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAI);
        assert_eq!("ollama".parse::<LlmProvider>().unwrap(), LlmProvider::Ollama);
        assert!("watsonx".parse::<LlmProvider>().is_err());
    }
}
