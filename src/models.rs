//! Modelos de dominio: registros de entidad extraídos del código y el
//! documento JSON que sirve de contrato entre extracción y carga.

use std::{
    fmt,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;

/// Tipo de entidad; también es la etiqueta del nodo en el grafo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Folder,
    File,
    FileCode,
    Summary,
    Import,
    FromImport,
    Function,
    FunctionCode,
    Class,
    ClassCode,
    Method,
    MethodCode,
    Code,
}

impl EntityType {
    pub const ALL: [EntityType; 13] = [
        Self::Folder,
        Self::File,
        Self::FileCode,
        Self::Summary,
        Self::Import,
        Self::FromImport,
        Self::Function,
        Self::FunctionCode,
        Self::Class,
        Self::ClassCode,
        Self::Method,
        Self::MethodCode,
        Self::Code,
    ];

    pub fn as_label(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::File => "file",
            Self::FileCode => "file_code",
            Self::Summary => "summary",
            Self::Import => "import",
            Self::FromImport => "from_import",
            Self::Function => "function",
            Self::FunctionCode => "function_code",
            Self::Class => "class",
            Self::ClassCode => "class_code",
            Self::Method => "method",
            Self::MethodCode => "method_code",
            Self::Code => "code",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Niveles de detalle que puede pedir una extracción.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeLevel {
    Folders,
    Files,
    Functions,
    Classes,
    Methods,
    InlineCode,
    Imports,
}

impl IncludeLevel {
    /// Niveles usados cuando la petición no indica ninguno (imports fuera).
    pub fn defaults() -> Vec<IncludeLevel> {
        vec![
            Self::Folders,
            Self::Files,
            Self::Functions,
            Self::Classes,
            Self::Methods,
            Self::InlineCode,
        ]
    }
}

/// Una unidad estructural del código (carpeta, fichero, función, ...).
///
/// `parent_path` no formaba parte de los primeros documentos; si falta, la
/// arista de contención se resuelve sólo por nombre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(rename = "type")]
    pub kind: EntityType,
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub parent_type: Option<EntityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

impl EntityRecord {
    pub fn new(kind: EntityType, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            path: Some(path.into()),
            parent_name: None,
            parent_type: None,
            parent_path: None,
            code: None,
            docstring: None,
            code_summary: None,
            args: None,
        }
    }

    pub fn with_parent(
        mut self,
        kind: EntityType,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        self.parent_type = Some(kind);
        self.parent_name = Some(name.into());
        self.parent_path = Some(path.into());
        self
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    pub fn with_docstring(mut self, docstring: Option<String>) -> Self {
        self.docstring = docstring;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    /// Identidad del nodo en el grafo: (etiqueta, nombre, ruta).
    pub fn identity(&self) -> Option<(EntityType, &str, &str)> {
        self.path
            .as_deref()
            .map(|path| (self.kind, self.name.as_str(), path))
    }
}

/// Persiste la lista de entidades como un array JSON.
pub fn write_entity_document(path: &Path, entities: &[EntityRecord]) -> PipelineResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, entities)?;
    writer.flush()?;
    Ok(())
}

/// Lee un documento escrito por [`write_entity_document`].
pub fn read_entity_document(path: &Path) -> PipelineResult<Vec<EntityRecord>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_records_without_optional_fields_deserialize() {
        let raw = r#"[
            {"type": "folder", "name": "proj", "path": "/proj", "parent_name": null, "parent_type": null, "code": null},
            {"type": "code", "name": "a.py", "parent_name": "a.py", "parent_type": "file", "code": "x = 1"}
        ]"#;
        let records: Vec<EntityRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(records[0].kind, EntityType::Folder);
        assert_eq!(records[0].parent_name, None);
        assert_eq!(records[1].path, None);
        assert_eq!(records[1].parent_type, Some(EntityType::File));
        assert_eq!(records[1].parent_path, None);
    }

    #[test]
    fn document_survives_disk_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out").join("entities.json");
        let entities = vec![
            EntityRecord::new(EntityType::Folder, "proj", "/proj"),
            EntityRecord::new(EntityType::Function, "foo", "/proj/a.py")
                .with_parent(EntityType::File, "a.py", "/proj/a.py")
                .with_docstring(Some("Hace foo.".into()))
                .with_args(vec!["x".into(), "y".into()]),
        ];

        write_entity_document(&target, &entities).unwrap();
        let back = read_entity_document(&target).unwrap();
        assert_eq!(back, entities);
    }

    #[test]
    fn labels_match_serialized_names() {
        for kind in EntityType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_label()));
        }
    }
}
