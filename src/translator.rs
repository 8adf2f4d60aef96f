//! Traducción de (sub-)preguntas a Cypher y ejecución contra el grafo.
//!
//! Cada sub-pregunta ocupa un hueco en el resultado; los fallos de una no
//! afectan a las demás y el orden de salida es el de entrada.

use futures::{future::BoxFuture, stream, FutureExt, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    classifier::has_placeholder,
    cypher,
    error::LlmError,
    llm::{strip_code_fences, LanguageModel},
    prompts,
    schema::SchemaSnapshot,
    store::{GraphStore, QueryRow},
};

static LOOKS_LIKE_CYPHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(MATCH|OPTIONAL\s+MATCH|WITH|CALL|UNWIND|RETURN)\b").unwrap());

/// Respuesta que se pide al modelo.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TranslatorReply {
    /// Una o dos sentencias Cypher de lectura separadas por `;`. Vacío si
    /// hace falta aclaración.
    pub cypher: String,
    /// Petición al usuario del dato que falta, si lo hay.
    pub clarification: Option<String>,
}

pub fn reply_schema() -> String {
    serde_json::to_string_pretty(&schemars::schema_for!(TranslatorReply)).unwrap_or_default()
}

/// Resultado de traducir una pregunta.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    /// Sentencias validadas, listas para ejecutar (una o dos).
    Statements(Vec<String>),
    Clarification(String),
    Rejected { reason: String, cypher: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementResult {
    pub cypher: String,
    pub rows: Vec<QueryRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubQueryOutcome {
    Answered { statements: Vec<StatementResult> },
    NeedsClarification { message: String },
    Rejected { reason: String, cypher: Vec<String> },
    Failed { error: String, cypher: Vec<String> },
}

/// Hueco de resultado de una sub-pregunta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubQueryResult {
    pub index: usize,
    pub question: String,
    #[serde(flatten)]
    pub outcome: SubQueryOutcome,
}

pub async fn translate(
    llm: &dyn LanguageModel,
    question: &str,
    schema: &SchemaSnapshot,
) -> Result<Translation, LlmError> {
    let preamble = prompts::cypher_preamble(&schema.to_string(), &reply_schema());
    let reply = llm.complete(&preamble, &prompts::cypher_prompt(question)).await?;
    debug!("Respuesta del traductor: {reply}");
    Ok(interpret(&reply, schema))
}

/// Valida la respuesta del modelo: número de sentencias, sólo lectura,
/// referencias al esquema y valores concretos. Añade a la proyección los
/// literales de filtro que falten.
pub fn interpret(reply: &str, schema: &SchemaSnapshot) -> Translation {
    let text = strip_code_fences(reply);
    let parsed = match serde_json::from_str::<TranslatorReply>(text) {
        Ok(parsed) => parsed,
        // Algunos modelos contestan sólo con la sentencia
        Err(_) if LOOKS_LIKE_CYPHER.is_match(text) => TranslatorReply {
            cypher: text.to_string(),
            clarification: None,
        },
        Err(_) => {
            return Translation::Clarification(
                "No se pudo generar una consulta para esta pregunta; reformúlala indicando los nombres concretos."
                    .to_string(),
            )
        }
    };

    // Si el modelo duda, se pregunta al usuario aunque haya propuesto consulta
    if let Some(clarification) = parsed
        .clarification
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
    {
        return Translation::Clarification(clarification);
    }
    let statements = cypher::split_statements(strip_code_fences(&parsed.cypher));

    if statements.is_empty() {
        return Translation::Clarification(
            "Esta pregunta no se puede responder con ninguna consulta; añade más detalle.".to_string(),
        );
    }
    if statements.len() > 2 {
        return Translation::Clarification(format!(
            "Responder requiere {} consultas; divide la pregunta o concreta qué necesitas.",
            statements.len()
        ));
    }

    for statement in &statements {
        if let Some(clause) = cypher::write_clause(statement) {
            return Translation::Rejected {
                reason: format!("la consulta generada no es de sólo lectura ({clause})"),
                cypher: statements.clone(),
            };
        }
        let violations = cypher::schema_violations(statement, schema);
        if !violations.is_empty() {
            return Translation::Rejected {
                reason: violations.join("; "),
                cypher: statements.clone(),
            };
        }
        if cypher::return_columns(statement).is_none() {
            return Translation::Rejected {
                reason: "la consulta no tiene un RETURN con columnas explícitas".to_string(),
                cypher: statements.clone(),
            };
        }
        if let Some(filter) = cypher::filter_literals(statement)
            .into_iter()
            .find(|f| has_placeholder(&f.literal))
        {
            return Translation::Clarification(match &filter.property {
                Some(property) => format!(
                    "Falta el valor concreto de `{property}` (la consulta usaba {}).",
                    filter.literal
                ),
                None => format!("Falta un valor concreto (la consulta usaba {}).", filter.literal),
            });
        }
    }

    Translation::Statements(
        statements
            .iter()
            .map(|s| cypher::ensure_filter_projection(s))
            .collect(),
    )
}

/// Traduce y ejecuta cada pregunta con un máximo de `concurrency` en vuelo.
/// El resultado conserva el orden de `questions`.
pub async fn answer_all(
    store: &dyn GraphStore,
    llm: &dyn LanguageModel,
    schema: &SchemaSnapshot,
    questions: &[String],
    concurrency: usize,
) -> Vec<SubQueryResult> {
    // Cada hueco va en una `BoxFuture` para que el futuro siga siendo `Send`
    // dentro de los manejadores de axum
    let slots: Vec<BoxFuture<'_, SubQueryResult>> = questions
        .iter()
        .enumerate()
        .map(|(index, question)| answer_slot(store, llm, schema, index, question).boxed())
        .collect();

    stream::iter(slots)
        .buffered(concurrency.max(1))
        .collect()
        .await
}

async fn answer_slot(
    store: &dyn GraphStore,
    llm: &dyn LanguageModel,
    schema: &SchemaSnapshot,
    index: usize,
    question: &str,
) -> SubQueryResult {
    let outcome = answer_one(store, llm, schema, question).await;
    SubQueryResult {
        index,
        question: question.to_string(),
        outcome,
    }
}

async fn answer_one(
    store: &dyn GraphStore,
    llm: &dyn LanguageModel,
    schema: &SchemaSnapshot,
    question: &str,
) -> SubQueryOutcome {
    let statements = match translate(llm, question, schema).await {
        Ok(Translation::Statements(statements)) => statements,
        Ok(Translation::Clarification(message)) => {
            info!("Se pide aclaración para '{question}': {message}");
            return SubQueryOutcome::NeedsClarification { message };
        }
        Ok(Translation::Rejected { reason, cypher }) => {
            warn!("Consulta rechazada para '{question}': {reason}");
            return SubQueryOutcome::Rejected { reason, cypher };
        }
        Err(e) => {
            warn!("No se pudo traducir '{question}': {e}");
            return SubQueryOutcome::Failed {
                error: e.to_string(),
                cypher: Vec::new(),
            };
        }
    };

    let mut results = Vec::with_capacity(statements.len());
    for statement in &statements {
        let columns = cypher::return_columns(statement).unwrap_or_default();
        match store.run_read(statement, &columns).await {
            Ok(rows) => results.push(StatementResult {
                cypher: statement.clone(),
                rows,
            }),
            Err(e) => {
                warn!("Fallo ejecutando la consulta de '{question}': {e}");
                return SubQueryOutcome::Failed {
                    error: e.to_string(),
                    cypher: statements.clone(),
                };
            }
        }
    }
    SubQueryOutcome::Answered { statements: results }
}
