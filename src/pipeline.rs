//! Ciclo de pregunta: esquema -> clasificación -> traducción/ejecución y,
//! opcionalmente, redacción de la respuesta final.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    classifier::{self, Classification},
    error::{LlmError, PipelineError, PipelineResult},
    llm::LanguageModel,
    prompts,
    schema,
    store::GraphStore,
    translator::{self, SubQueryOutcome, SubQueryResult},
};

#[derive(Debug, Clone, Copy)]
pub struct AskOptions {
    pub query_concurrency: usize,
    /// Pide al modelo una respuesta redactada a partir de los resultados.
    pub compose: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AskOutcome {
    Irrelevant {
        reason: String,
        examples: Vec<String>,
        message: String,
    },
    Answered {
        question: String,
        sub_questions: Vec<String>,
        results: Vec<SubQueryResult>,
        answer: Option<String>,
    },
}

impl fmt::Display for AskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Irrelevant { message, .. } => write!(f, "{message}"),
            Self::Answered { results, answer, .. } => {
                if let Some(answer) = answer {
                    writeln!(f, "{answer}")?;
                    writeln!(f)?;
                }
                for result in results {
                    writeln!(f, "[{}] {}", result.index + 1, result.question)?;
                    match &result.outcome {
                        SubQueryOutcome::Answered { statements } => {
                            for statement in statements {
                                if statement.rows.is_empty() {
                                    writeln!(f, "  (sin resultados)")?;
                                }
                                for row in &statement.rows {
                                    writeln!(f, "  {}", Value::Object(row.clone()))?;
                                }
                            }
                        }
                        SubQueryOutcome::NeedsClarification { message } => {
                            writeln!(f, "  Se necesita más información: {message}")?
                        }
                        SubQueryOutcome::Rejected { reason, .. } => {
                            writeln!(f, "  Consulta descartada: {reason}")?
                        }
                        SubQueryOutcome::Failed { error, .. } => writeln!(f, "  Error: {error}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Responde una pregunta en lenguaje natural contra el grafo actual.
///
/// El esquema se lee de nuevo en cada llamada; si el almacén no responde el
/// ciclo se aborta sin llamar al modelo.
pub async fn ask(
    store: &dyn GraphStore,
    llm: &dyn LanguageModel,
    question: &str,
    opts: AskOptions,
) -> PipelineResult<AskOutcome> {
    let question = question.trim();
    if question.is_empty() {
        return Err(PipelineError::invalid_input("La pregunta está vacía"));
    }

    let request_id = Uuid::new_v4();
    async move {
        info!("Pregunta recibida: {question}");
        let schema = schema::introspect(store).await?;
        if schema.is_empty() {
            return Ok(irrelevant(
                "El grafo está vacío: extrae y carga un código fuente antes de preguntar.".to_string(),
                schema.example_questions(),
            ));
        }

        let classification = classifier::classify(llm, question, &schema).await?;
        let sub_questions = match classification {
            Classification::Irrelevant { reason, examples } => {
                return Ok(irrelevant(reason, examples));
            }
            other => other.queries(),
        };

        let results = translator::answer_all(
            store,
            llm,
            &schema,
            &sub_questions,
            opts.query_concurrency,
        )
        .await;

        let answer = if opts.compose {
            match compose_answer(llm, question, &results).await {
                Ok(answer) => Some(answer),
                Err(e) => {
                    warn!("No se pudo redactar la respuesta: {e}");
                    None
                }
            }
        } else {
            None
        };

        info!("Pregunta resuelta con {} sub-preguntas", results.len());
        Ok(AskOutcome::Answered {
            question: question.to_string(),
            sub_questions,
            results,
            answer,
        })
    }
    .instrument(info_span!("ask", request_id = %request_id))
    .await
}

fn irrelevant(reason: String, examples: Vec<String>) -> AskOutcome {
    let message = format!(
        "{reason}\n\nPreguntas que sí puedes hacer:\n- {}",
        examples.join("\n- ")
    );
    AskOutcome::Irrelevant {
        reason,
        examples,
        message,
    }
}

/// Redacta una respuesta usando sólo los resultados obtenidos.
pub async fn compose_answer(
    llm: &dyn LanguageModel,
    question: &str,
    results: &[SubQueryResult],
) -> Result<String, LlmError> {
    let results_json = serde_json::to_string_pretty(results).unwrap_or_default();
    let answer = llm
        .complete(
            prompts::ANSWER_PREAMBLE,
            &prompts::answer_prompt(question, &results_json),
        )
        .await?;
    Ok(answer.trim().to_string())
}
