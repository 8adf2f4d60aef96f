//! Pasarela de resúmenes: convierte fragmentos de código en descripciones
//! breves usando el modelo de lenguaje.

use futures::{future::BoxFuture, stream, FutureExt, StreamExt};
use tracing::{debug, warn};

use crate::{
    error::LlmError,
    llm::LanguageModel,
    models::EntityRecord,
    prompts,
};

/// Resumen pendiente para la entidad en la posición `index`.
#[derive(Debug, Clone)]
pub struct SummaryJob {
    pub index: usize,
    pub code: String,
}

pub async fn summarize(llm: &dyn LanguageModel, code: &str) -> Result<String, LlmError> {
    let summary = llm
        .complete(prompts::SUMMARY_PREAMBLE, &prompts::summary_prompt(code))
        .await?;
    Ok(summary.trim().to_string())
}

async fn summarize_job(llm: &dyn LanguageModel, job: SummaryJob) -> (usize, Result<String, LlmError>) {
    let result = summarize(llm, &job.code).await;
    (job.index, result)
}

/// Ejecuta los resúmenes con un máximo de `concurrency` llamadas en vuelo y
/// rellena `code_summary` en las entidades correspondientes.
///
/// Un resumen fallido deja el campo vacío; devuelve cuántos se generaron.
pub async fn fill_summaries(
    llm: &dyn LanguageModel,
    entities: &mut [EntityRecord],
    jobs: Vec<SummaryJob>,
    concurrency: usize,
) -> usize {
    let total = jobs.len();
    let pending: Vec<BoxFuture<'_, (usize, Result<String, LlmError>)>> = jobs
        .into_iter()
        .map(|job| summarize_job(llm, job).boxed())
        .collect();
    let results: Vec<(usize, Result<String, LlmError>)> = stream::iter(pending)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut generated = 0;
    for (index, result) in results {
        let Some(entity) = entities.get_mut(index) else {
            continue;
        };
        match result {
            Ok(summary) if !summary.is_empty() => {
                entity.code_summary = Some(summary);
                generated += 1;
            }
            Ok(_) => debug!("Resumen vacío para {}", entity.name),
            Err(e) => warn!("No se pudo resumir {}: {e}", entity.name),
        }
    }

    debug!("Resúmenes generados: {generated}/{total}");
    generated
}
