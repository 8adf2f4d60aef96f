use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use neo4rs::{query, Graph, Node, Query, Row};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::{
    config::AppConfig,
    error::StoreError,
    models::{EntityRecord, EntityType},
    schema::SchemaSnapshot,
    store::{ContainmentEdge, GraphStore, QueryRow},
};

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea un índice compuesto (name, path) por cada etiqueta de entidad, que
/// es la clave de los MERGE del cargador.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    for kind in EntityType::ALL {
        let label = kind.as_label();
        let stmt = format!(
            "CREATE INDEX {label}_identity IF NOT EXISTS
             FOR (n:`{label}`)
             ON (n.name, n.path)"
        );
        graph.run(query(&stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (índices de identidad creados).");
    Ok(())
}

/// Almacén de grafos sobre Neo4j. `Graph` ya es un pool de conexiones y se
/// comparte entre peticiones.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Arc<Graph>,
}

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    /// Una transacción por escritura: un fallo no arrastra a las demás.
    async fn write_in_txn(&self, q: Query) -> Result<(), StoreError> {
        let txn = self.graph.start_txn().await.map_err(connectivity)?;
        if let Err(e) = txn.run(q).await {
            let _ = txn.rollback().await;
            return Err(query_failure(e));
        }
        txn.commit().await.map_err(query_failure)
    }

    async fn collect_rows(&self, q: Query) -> Result<Vec<neo4rs::Row>, neo4rs::Error> {
        let mut cursor = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.graph.run(query("RETURN 1")).await.map_err(connectivity)
    }

    async fn upsert_entity(&self, entity: &EntityRecord) -> Result<(), StoreError> {
        let Some(path) = entity.path.clone() else {
            return Err(StoreError::Query(format!("entidad sin ruta: {}", entity.name)));
        };

        let mut q = query(&upsert_cypher(entity))
            .param("name", entity.name.clone())
            .param("path", path);
        for (field, value) in optional_fields(entity) {
            if let Some(value) = value {
                q = q.param(field, value);
            }
        }
        if let Some(args) = &entity.args {
            q = q.param("args", args.clone());
        }
        self.write_in_txn(q).await
    }

    async fn link_to_parent(&self, entity: &EntityRecord) -> Result<(), StoreError> {
        let (Some(parent_type), Some(parent_name), Some(child_path)) =
            (entity.parent_type, entity.parent_name.clone(), entity.path.clone())
        else {
            return Ok(());
        };

        let parent_match = if entity.parent_path.is_some() {
            "{name: $parent_name, path: $parent_path}"
        } else {
            // Documentos antiguos: sólo por nombre (ambiguo entre rutas)
            "{name: $parent_name}"
        };
        let cypher = format!(
            "MATCH (parent:`{parent_label}` {parent_match})
             MATCH (child:`{child_label}` {{name: $child_name, path: $child_path}})
             MERGE (parent)-[:CONTAINS]->(child)",
            parent_label = parent_type.as_label(),
            child_label = entity.kind.as_label(),
        );
        let q = query(&cypher)
            .param("parent_name", parent_name)
            .param("parent_path", entity.parent_path.clone().unwrap_or_default())
            .param("child_name", entity.name.clone())
            .param("child_path", child_path);
        self.write_in_txn(q).await
    }

    async fn fetch_schema(&self) -> Result<SchemaSnapshot, StoreError> {
        // Sólo el ping distingue "inaccesible"; un fallo de los procedimientos
        // (permisos, versión) es un error de consulta
        self.ping().await?;
        let mut schema = SchemaSnapshot::default();

        for row in self
            .collect_rows(query("CALL db.labels() YIELD label RETURN label"))
            .await
            .map_err(query_failure)?
        {
            if let Some(label) = row.get::<String>("label") {
                schema.add_label(label);
            }
        }

        for row in self
            .collect_rows(query(
                "CALL db.schema.nodeTypeProperties() YIELD nodeLabels, propertyName
                 UNWIND nodeLabels AS label
                 RETURN label, propertyName",
            ))
            .await
            .map_err(query_failure)?
        {
            match (row.get::<String>("label"), row.get::<String>("propertyName")) {
                (Some(label), Some(prop)) => schema.add_node_property(label, prop),
                (Some(label), None) => schema.add_label(label),
                _ => {}
            }
        }

        for row in self
            .collect_rows(query(
                "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType",
            ))
            .await
            .map_err(query_failure)?
        {
            if let Some(rel_type) = row.get::<String>("relationshipType") {
                schema.add_relationship_type(rel_type);
            }
        }

        for row in self
            .collect_rows(query(
                "CALL db.schema.relTypeProperties() YIELD relType, propertyName
                 RETURN relType, propertyName",
            ))
            .await
            .map_err(query_failure)?
        {
            // relType llega como ":`CONTAINS`"
            let Some(raw) = row.get::<String>("relType") else {
                continue;
            };
            let rel_type = raw.trim_start_matches(':').trim_matches('`').to_string();
            match row.get::<String>("propertyName") {
                Some(prop) => schema.add_relationship_property(rel_type, prop),
                None => schema.add_relationship_type(rel_type),
            }
        }

        for row in self
            .collect_rows(query(
                "MATCH (a)-[r]->(b)
                 WITH DISTINCT labels(a) AS sources, type(r) AS rel_type, labels(b) AS targets
                 UNWIND sources AS source
                 UNWIND targets AS target
                 RETURN DISTINCT source, rel_type, target",
            ))
            .await
            .map_err(query_failure)?
        {
            if let (Some(source), Some(rel_type), Some(target)) = (
                row.get::<String>("source"),
                row.get::<String>("rel_type"),
                row.get::<String>("target"),
            ) {
                schema.add_pattern(source, rel_type, target);
            }
        }

        Ok(schema)
    }

    async fn run_read(&self, cypher: &str, columns: &[String]) -> Result<Vec<QueryRow>, StoreError> {
        debug!("Ejecutando Cypher: {cypher}");
        let rows = self.collect_rows(query(cypher)).await.map_err(query_failure)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|col| (col.clone(), column_to_json(&row, col)))
                    .collect()
            })
            .collect())
    }

    async fn containment_edges(&self, limit: usize) -> Result<Vec<ContainmentEdge>, StoreError> {
        let rows = self
            .collect_rows(
                query(
                    "MATCH (p)-[:CONTAINS]->(c)
                     RETURN labels(p)[0] AS parent_label, p.name AS parent_name, p.path AS parent_path,
                            labels(c)[0] AS child_label, c.name AS child_name, c.path AS child_path
                     LIMIT $limit",
                )
                .param("limit", limit as i64),
            )
            .await
            .map_err(query_failure)?;

        Ok(rows
            .into_iter()
            .map(|row| ContainmentEdge {
                parent_label: row.get("parent_label").unwrap_or_default(),
                parent_name: row.get("parent_name").unwrap_or_default(),
                parent_path: row.get("parent_path"),
                child_label: row.get("child_label").unwrap_or_default(),
                child_name: row.get("child_name").unwrap_or_default(),
                child_path: row.get("child_path"),
            })
            .collect())
    }
}

fn optional_fields(entity: &EntityRecord) -> [(&'static str, Option<String>); 5] {
    [
        ("parent_name", entity.parent_name.clone()),
        ("parent_type", entity.parent_type.map(|t| t.as_label().to_string())),
        ("code", entity.code.clone()),
        ("docstring", entity.docstring.clone()),
        ("code_summary", entity.code_summary.clone()),
    ]
}

/// MERGE por identidad. Los campos ausentes se escriben como `null` literal,
/// que en un SET borra la propiedad.
fn upsert_cypher(entity: &EntityRecord) -> String {
    let mut assignments: Vec<String> = optional_fields(entity)
        .iter()
        .map(|(field, value)| match value {
            Some(_) => format!("n.{field} = ${field}"),
            None => format!("n.{field} = null"),
        })
        .collect();
    assignments.push(match entity.args {
        Some(_) => "n.args = $args".to_string(),
        None => "n.args = null".to_string(),
    });
    let assignments = assignments.join(", ");

    format!(
        "MERGE (n:`{label}` {{name: $name, path: $path}})
         ON CREATE SET {assignments}
         ON MATCH SET {assignments}",
        label = entity.kind.as_label()
    )
}

fn connectivity(e: neo4rs::Error) -> StoreError {
    StoreError::Connectivity(e.to_string())
}

fn query_failure(e: neo4rs::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

/// Lee una columna como JSON probando los tipos que devuelven las consultas
/// de este grafo. Lo que no encaja (nulos, tipos temporales) queda en `null`.
fn column_to_json(row: &Row, column: &str) -> Value {
    if let Some(b) = row.get::<bool>(column) {
        return Value::Bool(b);
    }
    if let Some(i) = row.get::<i64>(column) {
        return Value::from(i);
    }
    if let Some(f) = row.get::<f64>(column) {
        return serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Some(s) = row.get::<String>(column) {
        return Value::String(s);
    }
    if let Some(list) = row.get::<Vec<String>>(column) {
        return Value::from(list);
    }
    if let Some(list) = row.get::<Vec<i64>>(column) {
        return Value::from(list);
    }
    if let Some(node) = row.get::<Node>(column) {
        return node_to_json(&node);
    }
    Value::Null
}

/// Nodos completos (`RETURN f`): etiquetas y propiedades de identidad.
fn node_to_json(node: &Node) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("labels".to_string(), Value::from(node.labels()));
    for key in ["name", "path", "parent_name", "parent_type", "docstring", "code_summary"] {
        if let Some(value) = node.get::<String>(key) {
            map.insert(key.to_string(), Value::String(value));
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_binds_present_fields_and_clears_absent_ones() {
        let entity = EntityRecord::new(EntityType::Function, "foo", "/p/a.py")
            .with_parent(EntityType::File, "a.py", "/p/a.py")
            .with_args(vec!["x".into()]);
        let cypher = upsert_cypher(&entity);

        assert!(cypher.starts_with("MERGE (n:`function` {name: $name, path: $path})"));
        assert!(cypher.contains("ON CREATE SET n.parent_name = $parent_name, n.parent_type = $parent_type, n.code = null"));
        assert!(cypher.contains("ON MATCH SET n.parent_name = $parent_name"));
        assert!(cypher.contains("n.code_summary = null, n.args = $args"));

        let bare = upsert_cypher(&EntityRecord::new(EntityType::Folder, "proj", "/proj"));
        assert!(bare.contains("n.parent_name = null"));
        assert!(bare.contains("n.args = null"));
        assert!(!bare.contains("$args"));
    }
}
