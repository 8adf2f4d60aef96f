//! Dobles deterministas para los tests: almacén en memoria con semántica de
//! MERGE y un modelo de lenguaje guionizado.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, RwLock,
    },
};

use async_trait::async_trait;

use crate::{
    error::{LlmError, StoreError},
    llm::LanguageModel,
    models::{EntityRecord, EntityType},
    schema::SchemaSnapshot,
    store::{ContainmentEdge, GraphStore, QueryRow},
};

pub type NodeKey = (EntityType, String, String);

/// Vista de sólo lectura del grafo que reciben los manejadores de consultas.
#[derive(Debug, Clone, Default)]
pub struct GraphView {
    pub nodes: BTreeMap<NodeKey, EntityRecord>,
    pub edges: BTreeSet<(NodeKey, NodeKey)>,
}

impl GraphView {
    /// Hijos directos de `parent` con la etiqueta indicada.
    pub fn children(&self, parent: &NodeKey, kind: EntityType) -> Vec<&EntityRecord> {
        self.edges
            .iter()
            .filter(|(p, c)| p == parent && c.0 == kind)
            .filter_map(|(_, c)| self.nodes.get(c))
            .collect()
    }

    pub fn find(&self, kind: EntityType, name: &str) -> Vec<&NodeKey> {
        self.nodes
            .keys()
            .filter(|(k, n, _)| *k == kind && n == name)
            .collect()
    }
}

type QueryHandler = Box<dyn Fn(&str, &GraphView) -> Result<Vec<QueryRow>, StoreError> + Send + Sync>;

pub struct InMemoryGraphStore {
    graph: RwLock<GraphView>,
    schema_failure: RwLock<Option<StoreError>>,
    write_failures: RwLock<BTreeSet<String>>,
    query_handler: Option<QueryHandler>,
    executed: Mutex<Vec<String>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(GraphView::default()),
            schema_failure: RwLock::new(None),
            write_failures: RwLock::new(BTreeSet::new()),
            query_handler: None,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_query_handler(
        mut self,
        handler: impl Fn(&str, &GraphView) -> Result<Vec<QueryRow>, StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.query_handler = Some(Box::new(handler));
        self
    }

    pub fn set_schema_failure(&self, failure: Option<StoreError>) {
        *self.schema_failure.write().unwrap() = failure;
    }

    /// Hace fallar la escritura de cualquier entidad con ese nombre.
    pub fn fail_writes_for(&self, name: &str) {
        self.write_failures.write().unwrap().insert(name.to_string());
    }

    pub fn node_count(&self) -> usize {
        self.graph.read().unwrap().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.read().unwrap().edges.len()
    }

    pub fn node(&self, kind: EntityType, name: &str, path: &str) -> Option<EntityRecord> {
        self.graph
            .read()
            .unwrap()
            .nodes
            .get(&(kind, name.to_string(), path.to_string()))
            .cloned()
    }

    pub fn has_edge(&self, parent: &NodeKey, child: &NodeKey) -> bool {
        self.graph
            .read()
            .unwrap()
            .edges
            .contains(&(parent.clone(), child.clone()))
    }

    pub fn view(&self) -> GraphView {
        self.graph.read().unwrap().clone()
    }

    /// Sentencias recibidas por `run_read`, en orden de llegada.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn check_write(&self, entity: &EntityRecord) -> Result<(), StoreError> {
        if self.write_failures.read().unwrap().contains(&entity.name) {
            return Err(StoreError::Query(format!("escritura rechazada: {}", entity.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn ping(&self) -> Result<(), StoreError> {
        match self.schema_failure.read().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn upsert_entity(&self, entity: &EntityRecord) -> Result<(), StoreError> {
        self.check_write(entity)?;
        let Some((kind, name, path)) = entity.identity() else {
            return Err(StoreError::Query(format!("entidad sin ruta: {}", entity.name)));
        };
        let key = (kind, name.to_string(), path.to_string());
        let mut graph = self.graph.write().unwrap();
        // Igual que el ON CREATE / ON MATCH SET: los campos mutables se pisan
        graph.nodes.insert(key, entity.clone());
        Ok(())
    }

    async fn link_to_parent(&self, entity: &EntityRecord) -> Result<(), StoreError> {
        self.check_write(entity)?;
        let (Some(parent_type), Some(parent_name), Some((kind, name, path))) =
            (entity.parent_type, entity.parent_name.as_deref(), entity.identity())
        else {
            return Ok(());
        };
        let child = (kind, name.to_string(), path.to_string());

        let mut graph = self.graph.write().unwrap();
        if !graph.nodes.contains_key(&child) {
            return Ok(());
        }
        let parents: Vec<NodeKey> = graph
            .nodes
            .keys()
            .filter(|(k, n, p)| {
                *k == parent_type
                    && n == parent_name
                    && entity.parent_path.as_deref().map_or(true, |pp| pp == p)
            })
            .cloned()
            .collect();
        for parent in parents {
            graph.edges.insert((parent, child.clone()));
        }
        Ok(())
    }

    async fn fetch_schema(&self) -> Result<SchemaSnapshot, StoreError> {
        if let Some(err) = self.schema_failure.read().unwrap().clone() {
            return Err(err);
        }
        let graph = self.graph.read().unwrap();
        let mut schema = SchemaSnapshot::default();
        for ((kind, _, _), record) in &graph.nodes {
            let label = kind.as_label();
            schema.add_node_property(label, "name");
            schema.add_node_property(label, "path");
            let optional = [
                ("parent_name", record.parent_name.is_some()),
                ("parent_type", record.parent_type.is_some()),
                ("code", record.code.is_some()),
                ("docstring", record.docstring.is_some()),
                ("code_summary", record.code_summary.is_some()),
                ("args", record.args.is_some()),
            ];
            for (prop, present) in optional {
                if present {
                    schema.add_node_property(label, prop);
                }
            }
        }
        for (parent, child) in &graph.edges {
            schema.add_pattern(parent.0.as_label(), "CONTAINS", child.0.as_label());
        }
        Ok(schema)
    }

    async fn run_read(&self, cypher: &str, _columns: &[String]) -> Result<Vec<QueryRow>, StoreError> {
        self.executed.lock().unwrap().push(cypher.to_string());
        let view = self.view();
        match &self.query_handler {
            Some(handler) => handler(cypher, &view),
            None => Ok(Vec::new()),
        }
    }

    async fn containment_edges(&self, limit: usize) -> Result<Vec<ContainmentEdge>, StoreError> {
        let graph = self.graph.read().unwrap();
        Ok(graph
            .edges
            .iter()
            .take(limit)
            .map(|(p, c)| ContainmentEdge {
                parent_label: p.0.as_label().to_string(),
                parent_name: p.1.clone(),
                parent_path: Some(p.2.clone()),
                child_label: c.0.as_label().to_string(),
                child_name: c.1.clone(),
                child_path: Some(c.2.clone()),
            })
            .collect())
    }
}

type Script = Box<dyn Fn(&str, &str) -> Result<String, LlmError> + Send + Sync>;

/// Modelo que responde con una función fija de (preámbulo, prompt).
pub struct ScriptedModel {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(script: impl Fn(&str, &str) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Modelo que falla si alguien lo llama.
    pub fn unreachable() -> Self {
        Self::new(|_, _| Err(LlmError::Provider("no se esperaba ninguna llamada".into())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(preamble, prompt)
    }
}

/// Fila de resultado a partir de pares (columna, valor).
pub fn row(pairs: &[(&str, serde_json::Value)]) -> QueryRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
