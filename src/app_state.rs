use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, llm::LanguageModel, store::GraphStore};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn GraphStore>,
    pub llm: Arc<dyn LanguageModel>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

impl Status {
    /// Actualiza mensaje y progreso. Un mutex envenenado no debe tumbar una
    /// operación larga sólo por el indicador de estado.
    pub fn report(status: &Mutex<Status>, message: impl Into<String>, progress: f32) {
        let mut guard = status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.message = message.into();
        guard.progress = progress.clamp(0.0, 1.0);
    }

    /// Marca el inicio de una operación; devuelve `false` si ya había otra.
    pub fn begin(status: &Mutex<Status>, message: impl Into<String>) -> bool {
        let mut guard = status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_busy {
            return false;
        }
        guard.is_busy = true;
        guard.message = message.into();
        guard.progress = 0.0;
        true
    }

    pub fn finish(status: &Mutex<Status>, message: impl Into<String>) {
        let mut guard = status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.is_busy = false;
        guard.message = message.into();
        guard.progress = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_operation_at_a_time() {
        let status = Mutex::new(Status::default());
        assert!(Status::begin(&status, "extrayendo"));
        assert!(!Status::begin(&status, "cargando"));

        Status::report(&status, "mitad", 1.7);
        assert_eq!(status.lock().unwrap().progress, 1.0);

        Status::finish(&status, "listo");
        assert!(Status::begin(&status, "cargando"));
    }
}
