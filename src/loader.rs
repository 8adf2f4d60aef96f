//! Carga de la lista de entidades en el almacén de grafos: un MERGE por
//! entidad seguido de su arista de contención.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{app_state::Status, models::EntityRecord, store::GraphStore};

/// Resumen de una pasada de carga.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub entities_processed: usize,
    pub nodes_upserted: usize,
    pub edges_requested: usize,
    pub skipped_missing_path: usize,
    pub failures: usize,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resumen: {} entidades procesadas, {} nodos, {} aristas solicitadas, {} sin ruta, {} fallos.",
            self.entities_processed,
            self.nodes_upserted,
            self.edges_requested,
            self.skipped_missing_path,
            self.failures
        )
    }
}

/// Inserta o actualiza cada entidad y la enlaza con su padre.
///
/// Los padres preceden a sus hijos en la lista, así que el enlace se hace justo
/// después del upsert. Ningún fallo individual interrumpe la pasada.
pub async fn load_entities(
    store: &dyn GraphStore,
    entities: &[EntityRecord],
    status: Option<Arc<Mutex<Status>>>,
) -> LoadReport {
    let mut report = LoadReport::default();
    let total = entities.len().max(1) as f32;

    for (index, entity) in entities.iter().enumerate() {
        report.entities_processed += 1;
        if let Some(status) = &status {
            Status::report(
                status,
                format!("[{}/{}] Cargando: {}", index + 1, entities.len(), entity.name),
                (index + 1) as f32 / total,
            );
        }

        if entity.identity().is_none() {
            warn!("Entidad sin ruta, se omite: {} ({})", entity.name, entity.kind);
            report.skipped_missing_path += 1;
            continue;
        }

        if let Err(e) = store.upsert_entity(entity).await {
            warn!("No se pudo guardar {} ({}): {e}", entity.name, entity.kind);
            report.failures += 1;
            continue;
        }
        report.nodes_upserted += 1;

        if entity.parent_name.is_some() && entity.parent_type.is_some() {
            report.edges_requested += 1;
            if let Err(e) = store.link_to_parent(entity).await {
                warn!("No se pudo enlazar {} con su padre: {e}", entity.name);
                report.failures += 1;
            }
        }
    }

    info!("{report}");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::EntityType, testing::InMemoryGraphStore};

    fn batch() -> Vec<EntityRecord> {
        vec![
            EntityRecord::new(EntityType::Folder, "proj", "/proj"),
            EntityRecord::new(EntityType::Folder, "pkg", "/proj/pkg")
                .with_parent(EntityType::Folder, "proj", "/proj"),
            EntityRecord::new(EntityType::File, "a.py", "/proj/a.py")
                .with_parent(EntityType::Folder, "proj", "/proj"),
            EntityRecord::new(EntityType::Function, "foo", "/proj/a.py")
                .with_parent(EntityType::File, "a.py", "/proj/a.py")
                .with_args(vec!["x".into()]),
            EntityRecord::new(EntityType::FunctionCode, "code-foo", "/proj/a.py")
                .with_parent(EntityType::Function, "foo", "/proj/a.py")
                .with_code(Some("def foo(x):\n    return x".into())),
            // Mismo nombre en otra carpeta
            EntityRecord::new(EntityType::File, "a.py", "/proj/pkg/a.py")
                .with_parent(EntityType::Folder, "pkg", "/proj/pkg"),
            EntityRecord::new(EntityType::Function, "foo", "/proj/pkg/a.py")
                .with_parent(EntityType::File, "a.py", "/proj/pkg/a.py"),
        ]
    }

    fn key(kind: EntityType, name: &str, path: &str) -> (EntityType, String, String) {
        (kind, name.to_string(), path.to_string())
    }

    #[tokio::test]
    async fn loading_twice_converges() {
        let store = InMemoryGraphStore::new();
        let entities = batch();

        load_entities(&store, &entities, None).await;
        let (nodes, edges) = (store.node_count(), store.edge_count());
        let report = load_entities(&store, &entities, None).await;

        assert_eq!(store.node_count(), nodes);
        assert_eq!(store.edge_count(), edges);
        assert_eq!(nodes, 7);
        assert_eq!(edges, 6);
        assert_eq!(report.failures, 0);
    }

    #[tokio::test]
    async fn reloading_mutated_code_touches_only_that_node() {
        let store = InMemoryGraphStore::new();
        let mut entities = batch();
        load_entities(&store, &entities, None).await;
        let untouched = store.node(EntityType::Function, "foo", "/proj/a.py");

        entities[4].code = Some("def foo(x):\n    return x * 2".into());
        load_entities(&store, &entities, None).await;

        let code = store
            .node(EntityType::FunctionCode, "code-foo", "/proj/a.py")
            .and_then(|n| n.code);
        assert_eq!(code.as_deref(), Some("def foo(x):\n    return x * 2"));
        assert_eq!(store.node(EntityType::Function, "foo", "/proj/a.py"), untouched);
        assert_eq!(store.node_count(), 7);
    }

    #[tokio::test]
    async fn every_child_is_linked_to_its_own_parent() {
        let store = InMemoryGraphStore::new();
        let entities = batch();
        load_entities(&store, &entities, None).await;

        for entity in entities.iter().filter(|e| e.parent_name.is_some()) {
            let parent = key(
                entity.parent_type.unwrap(),
                entity.parent_name.as_deref().unwrap(),
                entity.parent_path.as_deref().unwrap(),
            );
            let child = key(entity.kind, &entity.name, entity.path.as_deref().unwrap());
            assert!(store.has_edge(&parent, &child), "{} sin arista", entity.name);
        }
        // Las dos `a.py` no se cruzan
        assert!(!store.has_edge(
            &key(EntityType::File, "a.py", "/proj/a.py"),
            &key(EntityType::Function, "foo", "/proj/pkg/a.py"),
        ));
    }

    #[tokio::test]
    async fn missing_path_and_failures_are_counted_not_fatal() {
        let store = InMemoryGraphStore::new();
        store.fail_writes_for("pkg");
        let mut entities = batch();
        entities[3].path = None;

        let status = Arc::new(Mutex::new(Status::default()));
        let report = load_entities(&store, &entities, Some(status.clone())).await;

        assert_eq!(report.entities_processed, 7);
        assert_eq!(report.skipped_missing_path, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(report.nodes_upserted, 5);
        assert_eq!(status.lock().unwrap().progress, 1.0);
        // `pkg` no existe, así que su hijo queda sin arista pero sí como nodo
        assert!(store.node(EntityType::File, "a.py", "/proj/pkg/a.py").is_some());
    }

    #[tokio::test]
    async fn legacy_records_link_by_parent_name() {
        let store = InMemoryGraphStore::new();
        let mut child = EntityRecord::new(EntityType::File, "a.py", "/proj/a.py");
        child.parent_type = Some(EntityType::Folder);
        child.parent_name = Some("proj".into());
        let entities = vec![EntityRecord::new(EntityType::Folder, "proj", "/proj"), child];

        load_entities(&store, &entities, None).await;
        assert!(store.has_edge(
            &key(EntityType::Folder, "proj", "/proj"),
            &key(EntityType::File, "a.py", "/proj/a.py"),
        ));
    }
}
