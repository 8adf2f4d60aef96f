//! Instantánea del esquema del grafo (etiquetas, relaciones y propiedades).
//!
//! Se pide de nuevo al almacén al inicio de cada pregunta y es el único
//! contrato en el que se apoyan el clasificador y el traductor.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::Serialize;
use tracing::{error, info};

use crate::{
    error::{PipelineError, PipelineResult},
    store::GraphStore,
};

/// `(:source)-[:rel_type]->(:target)` observado en el grafo.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RelationshipPattern {
    pub source: String,
    pub rel_type: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaSnapshot {
    /// Etiqueta -> propiedades conocidas (puede estar vacío).
    pub node_properties: BTreeMap<String, BTreeSet<String>>,
    /// Tipo de relación -> propiedades conocidas.
    pub relationship_properties: BTreeMap<String, BTreeSet<String>>,
    pub patterns: BTreeSet<RelationshipPattern>,
}

impl SchemaSnapshot {
    pub fn add_label(&mut self, label: impl Into<String>) {
        self.node_properties.entry(label.into()).or_default();
    }

    pub fn add_node_property(&mut self, label: impl Into<String>, property: impl Into<String>) {
        self.node_properties
            .entry(label.into())
            .or_default()
            .insert(property.into());
    }

    pub fn add_relationship_type(&mut self, rel_type: impl Into<String>) {
        self.relationship_properties.entry(rel_type.into()).or_default();
    }

    pub fn add_relationship_property(&mut self, rel_type: impl Into<String>, property: impl Into<String>) {
        self.relationship_properties
            .entry(rel_type.into())
            .or_default()
            .insert(property.into());
    }

    pub fn add_pattern(&mut self, source: impl Into<String>, rel_type: impl Into<String>, target: impl Into<String>) {
        let pattern = RelationshipPattern {
            source: source.into(),
            rel_type: rel_type.into(),
            target: target.into(),
        };
        self.add_relationship_type(pattern.rel_type.clone());
        self.patterns.insert(pattern);
    }

    pub fn is_empty(&self) -> bool {
        self.node_properties.is_empty() && self.relationship_properties.is_empty()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.node_properties.contains_key(label)
    }

    pub fn has_relationship_type(&self, rel_type: &str) -> bool {
        self.relationship_properties.contains_key(rel_type)
    }

    /// Propiedad presente en alguna etiqueta o relación.
    pub fn has_property(&self, property: &str) -> bool {
        self.node_properties
            .values()
            .chain(self.relationship_properties.values())
            .any(|props| props.contains(property))
    }

    /// Preguntas de ejemplo construidas sólo con lo que contiene el esquema.
    pub fn example_questions(&self) -> Vec<String> {
        let mut examples: Vec<String> = Vec::new();

        for p in &self.patterns {
            if p.rel_type == "CONTAINS" {
                push_unique(&mut examples, format!("How many {} nodes does each {} contain?", p.target, p.source));
            } else {
                push_unique(&mut examples, format!(
                    "Which {} nodes are linked to each {} through {}?",
                    p.target, p.source, p.rel_type
                ));
            }
        }
        for (label, props) in &self.node_properties {
            if props.contains("name") {
                push_unique(&mut examples, format!("List the name of every {label}."));
            }
        }
        for (label, props) in &self.node_properties {
            for prop in props.iter().filter(|p| !matches!(p.as_str(), "name" | "path")) {
                push_unique(&mut examples, format!("Show the {prop} of each {label} together with its name."));
            }
        }
        for label in self.node_properties.keys() {
            push_unique(&mut examples, format!("How many {label} nodes are in the graph?"));
        }

        if examples.len() < 3 {
            for fallback in [
                "How many file nodes are in the graph? (extract and load a code base first)",
                "List the name of every folder.",
                "How many function nodes does each file contain?",
            ] {
                push_unique(&mut examples, fallback.to_string());
            }
        }
        examples.truncate(5);
        examples
    }
}

fn push_unique(examples: &mut Vec<String>, question: String) {
    if !examples.contains(&question) {
        examples.push(question);
    }
}

impl fmt::Display for SchemaSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node properties:")?;
        for (label, props) in &self.node_properties {
            let props: Vec<&str> = props.iter().map(String::as_str).collect();
            writeln!(f, "- {label} {{{}}}", props.join(", "))?;
        }
        writeln!(f, "Relationship properties:")?;
        for (rel_type, props) in &self.relationship_properties {
            let props: Vec<&str> = props.iter().map(String::as_str).collect();
            writeln!(f, "- {rel_type} {{{}}}", props.join(", "))?;
        }
        writeln!(f, "The relationships:")?;
        for p in &self.patterns {
            writeln!(f, "(:{})-[:{}]->(:{})", p.source, p.rel_type, p.target)?;
        }
        Ok(())
    }
}

/// Lee el esquema actual. Cualquier fallo aborta el ciclo antes de gastar
/// llamadas al modelo; sólo los de conexión se informan como almacén
/// inaccesible.
pub async fn introspect(store: &dyn GraphStore) -> PipelineResult<SchemaSnapshot> {
    let snapshot = store.fetch_schema().await.map_err(|e| {
        error!("No se pudo leer el esquema del grafo: {e}");
        PipelineError::from(e)
    })?;
    info!(
        "Esquema leído: {} etiquetas, {} tipos de relación",
        snapshot.node_properties.len(),
        snapshot.relationship_properties.len()
    );
    Ok(snapshot)
}

#[cfg(test)]
pub fn file_folder_schema() -> SchemaSnapshot {
    let mut schema = SchemaSnapshot::default();
    for label in ["folder", "file"] {
        for prop in ["name", "path", "parent_name", "parent_type"] {
            schema.add_node_property(label, prop);
        }
    }
    schema.add_pattern("folder", "CONTAINS", "folder");
    schema.add_pattern("folder", "CONTAINS", "file");
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::StoreError, testing::InMemoryGraphStore};

    #[test]
    fn examples_only_use_schema_labels() {
        let schema = file_folder_schema();
        let examples = schema.example_questions();

        assert!(examples.len() >= 3);
        for example in &examples {
            assert!(!example.contains("function"), "{example}");
            assert!(example.contains("file") || example.contains("folder"));
        }
    }

    #[test]
    fn empty_schema_still_offers_guidance() {
        let examples = SchemaSnapshot::default().example_questions();
        assert_eq!(examples.len(), 3);
    }

    #[test]
    fn display_lists_labels_and_patterns() {
        let text = file_folder_schema().to_string();
        assert!(text.contains("- file {name, parent_name, parent_type, path}"));
        assert!(text.contains("(:folder)-[:CONTAINS]->(:file)"));
        assert!(text.contains("- CONTAINS {}"));
    }

    #[tokio::test]
    async fn unreachable_store_aborts_with_connectivity_error() {
        let store = InMemoryGraphStore::new();
        store.set_schema_failure(Some(StoreError::Connectivity("connection refused".into())));

        let err = tokio_test::assert_err!(introspect(&store).await);
        assert!(matches!(err, PipelineError::StoreConnectivity(_)));
    }

    #[tokio::test]
    async fn schema_procedure_failures_are_query_errors() {
        let store = InMemoryGraphStore::new();
        store.set_schema_failure(Some(StoreError::Query(
            "Executing procedure is not allowed for user".into(),
        )));

        let err = tokio_test::assert_err!(introspect(&store).await);
        assert!(matches!(err, PipelineError::Store(StoreError::Query(_))));
    }

    #[test]
    fn introspection_reflects_loaded_entities() {
        let store = InMemoryGraphStore::new();
        let file = crate::models::EntityRecord::new(crate::models::EntityType::File, "a.py", "/p/a.py");

        let snapshot = tokio_test::block_on(async {
            store.upsert_entity(&file).await.unwrap();
            introspect(&store).await
        });
        let snapshot = tokio_test::assert_ok!(snapshot);
        assert!(snapshot.has_label("file"));
        assert!(snapshot.has_property("path"));
        assert!(!snapshot.has_property("code"));
    }
}
