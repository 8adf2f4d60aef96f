use std::{collections::BTreeMap, path::PathBuf};

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use url::Url;

use crate::{
    app_state::{AppState, Status},
    error::PipelineError,
    extract::{self, ExtractOptions, ExtractReport},
    loader::{self, LoadReport},
    models::{read_entity_document, IncludeLevel},
    pipeline::{self, AskOptions, AskOutcome},
    schema,
    store::ContainmentEdge,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ExtractPayload {
    code_dir: String,
    allowed_extensions: String,
    #[serde(default)]
    summary_flag: bool,
    #[serde(default)]
    include_levels: Option<Vec<IncludeLevel>>,
    #[serde(default)]
    output_file: Option<String>,
}

#[derive(Deserialize)]
pub struct IngestPayload {
    file_location: String,
}

#[derive(Serialize)]
pub struct IngestResponse {
    message: String,
    report: LoadReport,
}

#[derive(Deserialize)]
pub struct AskPayload {
    user_input: String,
    #[serde(default)]
    compose: bool,
}

#[derive(Serialize)]
pub struct AskResponse {
    answer: String,
    outcome: AskOutcome,
}

// Estructuras para la visualización del grafo.
#[derive(Serialize, Clone)]
pub struct GraphNode {
    id: String,
    label: String,
    group: String,
}

#[derive(Serialize)]
pub struct GraphEdge {
    source: String,
    target: String,
    label: String,
}

#[derive(Serialize)]
pub struct GraphData {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/extract", post(extract_handler))
        .route("/api/ingest", post(ingest_handler))
        .route("/api/ask", post(ask_handler))
        .route("/api/status", get(status_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/schema", get(schema_handler))
        .route("/api/graph-data", get(graph_data_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

fn error_response(err: PipelineError) -> ApiError {
    let status = match &err {
        PipelineError::StoreConnectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PipelineError::Cancelled(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("{err}");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

fn busy_response() -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(json!({"error": "Ya hay una extracción o carga en curso."})),
    )
}

// --- Handlers ---

#[axum::debug_handler]
async fn extract_handler(
    State(state): State<AppState>,
    Json(payload): Json<ExtractPayload>,
) -> Result<Json<ExtractReport>, ApiError> {
    let root = PathBuf::from(&payload.code_dir);
    let extensions = ExtractOptions::parse_extensions(&payload.allowed_extensions);
    if extensions.is_empty() {
        return Err(error_response(PipelineError::invalid_input(
            "Indica al menos una extensión en allowed_extensions.",
        )));
    }
    let levels = payload.include_levels.unwrap_or_else(IncludeLevel::defaults);
    let output = PathBuf::from(
        payload
            .output_file
            .unwrap_or_else(|| state.config.extract_output_file.clone()),
    );

    if !Status::begin(&state.status, format!("Extrayendo {}...", root.display())) {
        return Err(busy_response());
    }
    let opts = ExtractOptions::new(root, extensions, levels, payload.summary_flag);
    let result = extract::run_extraction(
        opts,
        state.llm.as_ref(),
        state.config.summary_concurrency,
        &output,
    )
    .await;

    match result {
        Ok(report) => {
            Status::finish(&state.status, format!("¡Extracción completada! {}", report.summary));
            Ok(Json(report))
        }
        Err(err) => {
            Status::finish(&state.status, format!("Error en la extracción: {err}"));
            Err(error_response(err))
        }
    }
}

#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
    Json(payload): Json<IngestPayload>,
) -> Result<Json<IngestResponse>, ApiError> {
    let location = PathBuf::from(&payload.file_location);
    let entities = tokio::task::spawn_blocking(move || read_entity_document(&location))
        .await
        .map_err(|e| error_response(PipelineError::Io(std::io::Error::other(e))))?
        .map_err(error_response)?;

    if !Status::begin(&state.status, "Iniciando carga en el grafo...") {
        return Err(busy_response());
    }
    let report = loader::load_entities(state.store.as_ref(), &entities, Some(state.status.clone())).await;
    Status::finish(&state.status, format!("¡Carga completada! {report}"));

    Ok(Json(IngestResponse {
        message: "Successfully ingested".to_string(),
        report,
    }))
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<AskResponse>, ApiError> {
    let opts = AskOptions {
        query_concurrency: state.config.query_concurrency,
        compose: payload.compose,
    };
    let deadline = state.config.ask_timeout;
    let outcome = tokio::time::timeout(
        deadline,
        pipeline::ask(state.store.as_ref(), state.llm.as_ref(), &payload.user_input, opts),
    )
    .await
    .map_err(|_| error_response(PipelineError::Cancelled(deadline.as_secs())))?
    .map_err(error_response)?;

    Ok(Json(AskResponse {
        answer: outcome.to_string(),
        outcome,
    }))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    let status = state.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    Json(status.clone())
}

#[axum::debug_handler]
async fn neo4j_info_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let browser_url = match Url::parse(&state.config.neo4j_uri) {
        Ok(mut url) => {
            let _ = url.set_scheme("http");
            let _ = url.set_port(Some(7474));
            url.to_string()
        }
        Err(_) => "http://localhost:7474".to_string(),
    };

    match state.store.ping().await {
        Ok(_) => Ok(Json(json!({ "status": "ok", "browser_url": browser_url }))),
        Err(e) => {
            error!("Error en el health check de Neo4j: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

#[axum::debug_handler]
async fn schema_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = schema::introspect(state.store.as_ref())
        .await
        .map_err(error_response)?;
    Ok(Json(json!({
        "text": snapshot.to_string(),
        "schema": snapshot,
        "examples": snapshot.example_questions(),
    })))
}

#[axum::debug_handler]
async fn graph_data_handler(State(state): State<AppState>) -> Result<Json<GraphData>, ApiError> {
    let edges = state
        .store
        .containment_edges(200)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(graph_data(&edges)))
}

/// Nodos únicos y aristas para el visor del frontend.
fn graph_data(edges: &[ContainmentEdge]) -> GraphData {
    let mut nodes = BTreeMap::new();
    let mut out_edges = Vec::with_capacity(edges.len());

    for edge in edges {
        let source = node_id(&edge.parent_label, &edge.parent_name, edge.parent_path.as_deref());
        let target = node_id(&edge.child_label, &edge.child_name, edge.child_path.as_deref());

        nodes.entry(source.clone()).or_insert_with(|| GraphNode {
            id: source.clone(),
            label: edge.parent_name.clone(),
            group: edge.parent_label.clone(),
        });
        nodes.entry(target.clone()).or_insert_with(|| GraphNode {
            id: target.clone(),
            label: edge.child_name.clone(),
            group: edge.child_label.clone(),
        });
        out_edges.push(GraphEdge {
            source,
            target,
            label: "CONTAINS".to_string(),
        });
    }

    GraphData {
        nodes: nodes.into_values().collect(),
        edges: out_edges,
    }
}

fn node_id(label: &str, name: &str, path: Option<&str>) -> String {
    format!("{label}:{}:{name}", path.unwrap_or_default())
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        config::AppConfig,
        error::StoreError,
        store::GraphStore,
        testing::{InMemoryGraphStore, ScriptedModel},
    };

    fn state_with(store: Arc<dyn GraphStore>) -> AppState {
        AppState {
            config: AppConfig::for_tests(),
            store,
            llm: Arc::new(ScriptedModel::unreachable()),
            status: Arc::new(Mutex::new(Status::default())),
            shutdown_sender: Arc::new(Mutex::new(None)),
        }
    }

    #[test]
    fn pipeline_errors_map_to_http_status() {
        let cases = [
            (
                PipelineError::StoreConnectivity(StoreError::Connectivity("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (PipelineError::invalid_input("vacía"), StatusCode::BAD_REQUEST),
            (PipelineError::Cancelled(120), StatusCode::GATEWAY_TIMEOUT),
            (
                PipelineError::Store(StoreError::Query("syntax".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(err).0, expected);
        }
    }

    #[tokio::test]
    async fn router_mounts_every_route() {
        let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let state = state_with(store);
        let router: Router = create_router(state.clone());
        drop(router);

        // El manejador de /api/ask se puede lanzar en otra tarea
        let payload = AskPayload {
            user_input: "  ".into(),
            compose: false,
        };
        let handle = tokio::spawn(ask_handler(State(state), Json(payload)));
        let Err((status, _)) = handle.await.unwrap() else {
            panic!("una pregunta vacía debe fallar");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ask_with_store_down_is_service_unavailable() {
        let store = InMemoryGraphStore::new();
        store.set_schema_failure(Some(StoreError::Connectivity("refused".into())));
        let state = state_with(Arc::new(store));

        let payload = AskPayload {
            user_input: "how many files?".into(),
            compose: false,
        };
        let Err((status, body)) = ask_handler(State(state), Json(payload)).await else {
            panic!("se esperaba un error");
        };
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.0["error"].as_str().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn extract_then_ingest_through_the_handlers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def foo():\n    pass\n").unwrap();
        let output = dir.path().join("out").join("entities.json");
        let store = Arc::new(InMemoryGraphStore::new());
        let state = state_with(store.clone());

        let Json(report) = extract_handler(
            State(state.clone()),
            Json(ExtractPayload {
                code_dir: dir.path().to_string_lossy().to_string(),
                allowed_extensions: "py".into(),
                summary_flag: false,
                include_levels: None,
                output_file: Some(output.to_string_lossy().to_string()),
            }),
        )
        .await
        .unwrap();
        assert!(report.entities_extracted > 0);

        let Json(ingested) = ingest_handler(
            State(state.clone()),
            Json(IngestPayload {
                file_location: report.output_location.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(ingested.message, "Successfully ingested");
        assert_eq!(ingested.report.nodes_upserted, report.entities_extracted);
        assert_eq!(store.node_count(), report.entities_extracted);
        assert!(!state.status.lock().unwrap().is_busy);
    }

    #[test]
    fn graph_data_deduplicates_nodes() {
        let edge = |child: &str| ContainmentEdge {
            parent_label: "file".into(),
            parent_name: "a.py".into(),
            parent_path: Some("/p/a.py".into()),
            child_label: "function".into(),
            child_name: child.into(),
            child_path: Some("/p/a.py".into()),
        };
        let data = graph_data(&[edge("foo"), edge("bar")]);
        assert_eq!(data.nodes.len(), 3);
        assert_eq!(data.edges.len(), 2);
        assert_eq!(data.edges[0].source, "file:/p/a.py:a.py");
    }
}
