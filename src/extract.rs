//! Extractor estructural: recorre un directorio, analiza cada fichero
//! elegible y produce la lista plana de entidades con su jerarquía.
//!
//! Orden de emisión: cada carpeta antes que sus ficheros, cada fichero antes
//! que sus miembros y cada entidad antes que sus satélites (`*_code`,
//! `summary`). El cargador depende de ese orden.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use crate::{
    error::{PipelineError, PipelineResult},
    llm::LanguageModel,
    models::{write_entity_document, EntityRecord, EntityType, IncludeLevel},
    parser::{ParsedFile, ParsedFunction, PythonAnalyzer},
    summarizer::{self, SummaryJob},
};

/// Parámetros de una extracción.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub root: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub include_levels: HashSet<IncludeLevel>,
    pub summaries: bool,
}

impl ExtractOptions {
    pub fn new(
        root: impl Into<PathBuf>,
        allowed_extensions: Vec<String>,
        include_levels: impl IntoIterator<Item = IncludeLevel>,
        summaries: bool,
    ) -> Self {
        Self {
            root: root.into(),
            allowed_extensions,
            include_levels: include_levels.into_iter().collect(),
            summaries,
        }
    }

    /// Convierte ".py, txt ,,.md" en [".py", ".txt", ".md"].
    pub fn parse_extensions(csv: &str) -> Vec<String> {
        csv.split(',')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(|ext| {
                if ext.starts_with('.') {
                    ext.to_string()
                } else {
                    format!(".{ext}")
                }
            })
            .collect()
    }

    fn wants(&self, level: IncludeLevel) -> bool {
        self.include_levels.contains(&level)
    }

    fn accepts(&self, file_name: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|ext| file_name.ends_with(ext.as_str()))
    }
}

/// Contadores de una extracción.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ExtractionSummary {
    pub folders_visited: u32,
    pub files_parsed: u32,
    pub files_failed: u32,
    pub entities: usize,
    pub summaries_generated: usize,
}

impl std::fmt::Display for ExtractionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} carpetas, {} ficheros analizados, {} con errores. {} entidades y {} resúmenes generados.",
            self.folders_visited, self.files_parsed, self.files_failed, self.entities, self.summaries_generated
        )
    }
}

/// Resultado de una extracción persistida.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub entities_extracted: usize,
    pub output_location: String,
    pub run_id: Uuid,
    pub extracted_at: DateTime<Utc>,
    pub summary: ExtractionSummary,
}

/// Recorrido síncrono del árbol. Los resúmenes quedan como trabajos pendientes.
pub fn scan_tree(
    opts: &ExtractOptions,
) -> PipelineResult<(Vec<EntityRecord>, Vec<SummaryJob>, ExtractionSummary)> {
    // Normaliza "proj/" y "./proj" para que las rutas de padres e hijos coincidan
    let root: PathBuf = opts.root.components().collect();
    if !root.is_dir() {
        return Err(PipelineError::invalid_input(format!(
            "La ruta no es un directorio: {}",
            root.display()
        )));
    }

    let mut analyzer = PythonAnalyzer::new()?;
    let mut entities = Vec::new();
    let mut jobs = Vec::new();
    let mut summary = ExtractionSummary::default();

    let walker = WalkDir::new(&root)
        .sort_by(|a, b| {
            // Ficheros antes que subcarpetas, luego por nombre
            a.file_type()
                .is_dir()
                .cmp(&b.file_type().is_dir())
                .then_with(|| a.file_name().cmp(b.file_name()))
        })
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("No se pudo recorrer una entrada: {err}");
                continue;
            }
        };

        if entry.file_type().is_dir() {
            summary.folders_visited += 1;
            if opts.wants(IncludeLevel::Folders) {
                entities.push(folder_entity(&entry));
            }
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        if !entry.file_type().is_file() || !opts.accepts(&file_name) {
            continue;
        }

        let parsed = match analyzer.parse_path(entry.path()) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("No se pudo analizar {}: {err}. Se omite el fichero.", entry.path().display());
                summary.files_failed += 1;
                continue;
            }
        };
        summary.files_parsed += 1;

        let mut emitter = FileEmitter {
            opts,
            entities: &mut entities,
            jobs: &mut jobs,
            file_name,
            file_path: path_string(entry.path()),
        };
        emitter.emit(entry.path(), &parsed);
    }

    summary.entities = entities.len();
    Ok((entities, jobs, summary))
}

/// Extrae el árbol y, si se pidió, genera los resúmenes en paralelo acotado.
pub async fn extract_hierarchy(
    opts: ExtractOptions,
    llm: &dyn LanguageModel,
    summary_concurrency: usize,
) -> PipelineResult<(Vec<EntityRecord>, ExtractionSummary)> {
    let wants_summaries = opts.summaries;
    let (mut entities, jobs, mut summary) = tokio::task::spawn_blocking(move || scan_tree(&opts))
        .await
        .map_err(|e| PipelineError::Io(std::io::Error::other(e)))??;

    if wants_summaries && !jobs.is_empty() {
        info!("Generando {} resúmenes...", jobs.len());
        summary.summaries_generated =
            summarizer::fill_summaries(llm, &mut entities, jobs, summary_concurrency).await;
    }

    Ok((entities, summary))
}

/// Extrae y persiste el documento de entidades en `output`.
pub async fn run_extraction(
    opts: ExtractOptions,
    llm: &dyn LanguageModel,
    summary_concurrency: usize,
    output: &Path,
) -> PipelineResult<ExtractReport> {
    let root = opts.root.clone();
    let (entities, summary) = extract_hierarchy(opts, llm, summary_concurrency).await?;
    write_entity_document(output, &entities)?;

    info!("Extraído {} -> {}. {}", root.display(), output.display(), summary);
    Ok(ExtractReport {
        entities_extracted: entities.len(),
        output_location: path_string(output),
        run_id: Uuid::new_v4(),
        extracted_at: Utc::now(),
        summary,
    })
}

struct FileEmitter<'a> {
    opts: &'a ExtractOptions,
    entities: &'a mut Vec<EntityRecord>,
    jobs: &'a mut Vec<SummaryJob>,
    file_name: String,
    file_path: String,
}

impl FileEmitter<'_> {
    fn emit(&mut self, path: &Path, parsed: &ParsedFile) {
        let (dir_name, dir_path) = match path.parent() {
            Some(dir) => (display_name(dir), path_string(dir)),
            None => (String::new(), String::new()),
        };

        if self.opts.wants(IncludeLevel::Files) {
            let file = EntityRecord::new(EntityType::File, &self.file_name, &self.file_path)
                .with_parent(EntityType::Folder, dir_name, dir_path);
            self.push(file);
            self.push_satellites(
                EntityType::File,
                &self.file_name.clone(),
                EntityType::FileCode,
                parsed.inline_code.clone(),
                None,
            );
        }

        if self.opts.wants(IncludeLevel::Imports) {
            for import in &parsed.imports {
                let record = self
                    .child_of_file(import.kind, &import.name)
                    .with_code(Some(import.code.clone()));
                self.push(record);
            }
        }

        if self.opts.wants(IncludeLevel::Functions) {
            for function in &parsed.functions {
                let record = self.member(
                    self.child_of_file(EntityType::Function, &function.name),
                    function,
                );
                self.push(record);
                self.push_satellites(
                    EntityType::Function,
                    &function.name,
                    EntityType::FunctionCode,
                    Some(function.code.clone()),
                    None,
                );
            }
        }

        if self.opts.wants(IncludeLevel::Classes) {
            for class in &parsed.classes {
                let record = self
                    .child_of_file(EntityType::Class, &class.name)
                    .with_docstring(class.docstring.clone());
                self.push(record);
                self.push_satellites(
                    EntityType::Class,
                    &class.name,
                    EntityType::ClassCode,
                    Some(class.code.clone()),
                    class.docstring.clone(),
                );

                if self.opts.wants(IncludeLevel::Methods) {
                    for method in &class.methods {
                        let record = EntityRecord::new(EntityType::Method, &method.name, &self.file_path)
                            .with_parent(EntityType::Class, &class.name, &self.file_path);
                        let record = self.member(record, method);
                        self.push(record);
                        self.push_satellites(
                            EntityType::Method,
                            &method.name,
                            EntityType::MethodCode,
                            Some(method.code.clone()),
                            None,
                        );
                    }
                }
            }
        }

        if self.opts.wants(IncludeLevel::InlineCode) {
            if let Some(inline) = &parsed.inline_code {
                let record = self
                    .child_of_file(EntityType::Code, &self.file_name.clone())
                    .with_code(Some(inline.clone()));
                self.push(record);
            }
        }
    }

    fn child_of_file(&self, kind: EntityType, name: &str) -> EntityRecord {
        EntityRecord::new(kind, name, &self.file_path).with_parent(
            EntityType::File,
            &self.file_name,
            &self.file_path,
        )
    }

    fn member(&self, record: EntityRecord, function: &ParsedFunction) -> EntityRecord {
        record
            .with_docstring(function.docstring.clone())
            .with_args(function.args.clone())
    }

    /// Emite `code-<nombre>` y `summary-<tipo>-<nombre>` colgando de la entidad
    /// dueña. El tipo evita que una función y un método homónimos compartan
    /// resumen.
    fn push_satellites(
        &mut self,
        owner_kind: EntityType,
        owner_name: &str,
        code_kind: EntityType,
        code: Option<String>,
        docstring: Option<String>,
    ) {
        let code_record = EntityRecord::new(code_kind, format!("code-{owner_name}"), &self.file_path)
            .with_parent(owner_kind, owner_name, &self.file_path)
            .with_code(code.clone())
            .with_docstring(docstring);
        self.push(code_record);

        let summary_record =
            EntityRecord::new(EntityType::Summary, format!("summary-{owner_kind}-{owner_name}"), &self.file_path)
                .with_parent(owner_kind, owner_name, &self.file_path);
        if self.opts.summaries {
            if let Some(code) = code.filter(|c| !c.trim().is_empty()) {
                self.jobs.push(SummaryJob {
                    index: self.entities.len(),
                    code,
                });
            }
        }
        self.push(summary_record);
    }

    fn push(&mut self, record: EntityRecord) {
        self.entities.push(record);
    }
}

fn folder_entity(entry: &DirEntry) -> EntityRecord {
    let path = entry.path();
    let record = EntityRecord::new(EntityType::Folder, display_name(path), path_string(path));
    match path.parent() {
        Some(parent) if entry.depth() > 0 => {
            record.with_parent(EntityType::Folder, display_name(parent), path_string(parent))
        }
        _ => record,
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_string_lossy().starts_with('.')
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
