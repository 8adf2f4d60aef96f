//! Taxonomía de errores del pipeline.
//!
//! Los fallos locales (un fichero, una entidad, una sub-pregunta) se absorben
//! donde ocurren y se registran; aquí sólo viven los que viajan con `?`.

use thiserror::Error;

/// Fallo al analizar un fichero concreto. Nunca aborta la extracción.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("no se pudo leer el fichero como UTF-8: {0}")]
    Read(#[from] std::io::Error),

    #[error("error de sintaxis cerca de la línea {line}")]
    Syntax { line: usize },

    #[error("tree-sitter: {0}")]
    TreeSitter(String),
}

/// Errores devueltos por el almacén de grafos.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("no se pudo contactar con el almacén de grafos: {0}")]
    Connectivity(String),

    #[error("la consulta falló en el almacén de grafos: {0}")]
    Query(String),
}

/// Errores del servicio de lenguaje externo.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("proveedor LLM {0} aún no implementado")]
    Unsupported(String),

    #[error("la llamada al modelo falló: {0}")]
    Provider(String),
}

/// Errores que abortan un ciclo completo (extracción, carga o pregunta).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("almacén de grafos inaccesible, ciclo abortado: {0}")]
    StoreConnectivity(#[source] StoreError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("documento de entidades inválido: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no se pudo inicializar el analizador: {0}")]
    Analyzer(#[from] ParseError),

    #[error("{0}")]
    InvalidInput(String),

    #[error("la operación se canceló tras {0} segundos")]
    Cancelled(u64),
}

impl PipelineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connectivity(_) => Self::StoreConnectivity(err),
            StoreError::Query(_) => Self::Store(err),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_store_errors_become_cycle_fatal() {
        let err: PipelineError = StoreError::Connectivity("refused".into()).into();
        assert!(matches!(err, PipelineError::StoreConnectivity(_)));

        let err: PipelineError = StoreError::Query("syntax".into()).into();
        assert!(matches!(err, PipelineError::Store(_)));
    }
}
