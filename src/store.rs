//! Interfaz del almacén de grafos que consume el pipeline.
//!
//! La implementación real vive en `neo4j_client`; los tests usan un
//! almacén en memoria con la misma semántica de MERGE.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::{error::StoreError, models::EntityRecord, schema::SchemaSnapshot};

/// Una fila de resultado, columna -> valor.
pub type QueryRow = serde_json::Map<String, Value>;

/// Arista `(parent)-[:CONTAINS]->(child)` tal como se devuelve para visualizar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainmentEdge {
    pub parent_label: String,
    pub parent_name: String,
    pub parent_path: Option<String>,
    pub child_label: String,
    pub child_name: String,
    pub child_path: Option<String>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Comprobación de salud.
    async fn ping(&self) -> Result<(), StoreError>;

    /// MERGE idempotente del nodo `(:tipo {name, path})`, sobrescribiendo los
    /// campos mutables tanto al crear como al encontrarlo.
    async fn upsert_entity(&self, entity: &EntityRecord) -> Result<(), StoreError>;

    /// Crea la arista de contención desde el padre. Si falta algún extremo no
    /// hace nada.
    async fn link_to_parent(&self, entity: &EntityRecord) -> Result<(), StoreError>;

    async fn fetch_schema(&self) -> Result<SchemaSnapshot, StoreError>;

    /// Ejecuta una consulta de lectura y devuelve las `columns` de cada fila.
    async fn run_read(&self, cypher: &str, columns: &[String]) -> Result<Vec<QueryRow>, StoreError>;

    async fn containment_edges(&self, limit: usize) -> Result<Vec<ContainmentEdge>, StoreError>;
}
