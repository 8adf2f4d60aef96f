//! Clasificador/simplificador de preguntas: decide si una pregunta encaja con
//! el esquema y, si es compleja, la parte en sub-preguntas.
//!
//! El modelo responde con un objeto JSON estructurado; de ahí sale una
//! [`Classification`] de tres estados, sin buscar frases marcadoras en texto
//! libre.

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::LlmError,
    llm::{strip_code_fences, LanguageModel},
    models::EntityType,
    prompts,
    schema::SchemaSnapshot,
};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[[^\]]*\]|<[^>]+>|\bspecific_\w+|\bplaceholder\b|\byour_\w+").unwrap()
});

/// Respuesta que se pide al modelo.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ClassifierReply {
    /// `true` si la pregunta puede responderse con el esquema dado.
    pub relevant: bool,
    /// Motivo cuando no es relevante.
    pub reason: String,
    /// Al menos tres preguntas alternativas que sí encajan con el esquema.
    pub examples: Vec<String>,
    /// Sub-preguntas ordenadas; vacío si no hace falta dividir.
    pub sub_queries: Vec<String>,
    /// Etiquetas de nodo en las que se apoya la interpretación.
    pub labels: Vec<String>,
    /// Nombres de propiedad en los que se apoya la interpretación.
    pub properties: Vec<String>,
}

/// JSON Schema de [`ClassifierReply`], incrustado en el prompt.
pub fn reply_schema() -> String {
    serde_json::to_string_pretty(&schemars::schema_for!(ClassifierReply)).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    Irrelevant { reason: String, examples: Vec<String> },
    /// La pregunta original, sin cambios.
    SingleQuery { question: String },
    SplitQueries { sub_questions: Vec<String> },
}

impl Classification {
    /// Preguntas a traducir, en orden. Vacío si es irrelevante.
    pub fn queries(&self) -> Vec<String> {
        match self {
            Self::Irrelevant { .. } => Vec::new(),
            Self::SingleQuery { question } => vec![question.clone()],
            Self::SplitQueries { sub_questions } => sub_questions.clone(),
        }
    }
}

/// `true` si el texto contiene marcadores genéricos (`[file]`, `<name>`,
/// `specific_folder`...) en lugar de valores concretos.
pub fn has_placeholder(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

pub async fn classify(
    llm: &dyn LanguageModel,
    question: &str,
    schema: &SchemaSnapshot,
) -> Result<Classification, LlmError> {
    let preamble = prompts::simplifier_preamble(&schema.to_string(), &reply_schema());
    let reply = llm
        .complete(&preamble, &prompts::simplifier_prompt(question))
        .await?;
    debug!("Respuesta del clasificador: {reply}");

    let classification = interpret(question, &reply, schema);
    info!(
        "Clasificación: {}",
        match &classification {
            Classification::Irrelevant { .. } => "irrelevante".to_string(),
            Classification::SingleQuery { .. } => "una consulta".to_string(),
            Classification::SplitQueries { sub_questions } =>
                format!("{} sub-preguntas", sub_questions.len()),
        }
    );
    Ok(classification)
}

/// Convierte la respuesta del modelo en una clasificación, validando etiquetas
/// y propiedades contra el esquema. Los valores de `name` no se validan.
pub fn interpret(question: &str, reply: &str, schema: &SchemaSnapshot) -> Classification {
    let Some(reply) = parse_reply(reply) else {
        warn!("Respuesta del clasificador ilegible; se trata como irrelevante");
        return Classification::Irrelevant {
            reason: "No se pudo interpretar la pregunta contra el grafo actual.".to_string(),
            examples: guidance(&[], schema),
        };
    };

    if !reply.relevant {
        let reason = if reply.reason.trim().is_empty() {
            "La pregunta no encaja con las etiquetas y propiedades del grafo.".to_string()
        } else {
            reply.reason.trim().to_string()
        };
        return Classification::Irrelevant {
            reason,
            examples: guidance(&reply.examples, schema),
        };
    }

    let mut unknown: Vec<String> = reply
        .labels
        .iter()
        .filter(|l| !schema.has_label(l.as_str()))
        .map(|l| format!("etiqueta `{l}`"))
        .collect();
    unknown.extend(
        reply
            .properties
            .iter()
            .filter(|p| !schema.has_property(p.as_str()))
            .map(|p| format!("propiedad `{p}`")),
    );
    if !unknown.is_empty() {
        return Classification::Irrelevant {
            reason: format!("El grafo no contiene: {}.", unknown.join(", ")),
            examples: guidance(&reply.examples, schema),
        };
    }

    let sub_questions: Vec<String> = reply
        .sub_queries
        .iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    if sub_questions.len() < 2 {
        return Classification::SingleQuery {
            question: question.to_string(),
        };
    }
    if sub_questions.iter().any(|q| has_placeholder(q)) {
        warn!("Sub-preguntas con marcadores genéricos; se usa la pregunta original");
        return Classification::SingleQuery {
            question: question.to_string(),
        };
    }
    Classification::SplitQueries { sub_questions }
}

fn parse_reply(raw: &str) -> Option<ClassifierReply> {
    let text = strip_code_fences(raw);
    if let Ok(reply) = serde_json::from_str(text) {
        return Some(reply);
    }
    // Texto alrededor del objeto JSON
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    serde_json::from_str(text.get(start..=end)?).ok()
}

/// Ejemplos propuestos por el modelo que no mencionan etiquetas ausentes,
/// completados con los derivados del esquema hasta tener al menos tres.
fn guidance(proposed: &[String], schema: &SchemaSnapshot) -> Vec<String> {
    let absent: Vec<&str> = EntityType::ALL
        .iter()
        .map(|t| t.as_label())
        .filter(|label| !schema.has_label(label))
        .collect();

    let mut examples: Vec<String> = Vec::new();
    for example in proposed.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        let lower = example.to_lowercase();
        if absent.iter().any(|label| lower.contains(label)) {
            continue;
        }
        if !examples.iter().any(|e| e == example) {
            examples.push(example.to_string());
        }
    }
    for example in schema.example_questions() {
        if examples.len() >= 3 {
            break;
        }
        if !examples.contains(&example) {
            examples.push(example);
        }
    }
    examples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schema::file_folder_schema, testing::ScriptedModel};

    #[test]
    fn question_about_absent_label_is_irrelevant_with_guidance() {
        let schema = file_folder_schema();
        let reply = r#"{"relevant": false, "reason": "There are no function nodes.",
            "examples": ["How many functions are in a.py?", "List the name of every file."]}"#;

        let classification = interpret("Which functions call foo?", reply, &schema);
        let Classification::Irrelevant { reason, examples } = classification else {
            panic!("se esperaba Irrelevant");
        };
        assert_eq!(reason, "There are no function nodes.");
        assert!(examples.len() >= 3);
        assert_eq!(examples[0], "List the name of every file.");
        assert!(examples.iter().all(|e| !e.contains("function")));
    }

    #[test]
    fn model_claiming_relevance_is_still_gated_by_schema() {
        let schema = file_folder_schema();
        let reply = r#"{"relevant": true, "labels": ["file", "function"], "properties": ["name"]}"#;

        let classification = interpret("How many functions does a.py have?", reply, &schema);
        match classification {
            Classification::Irrelevant { reason, examples } => {
                assert!(reason.contains("function"));
                assert!(examples.len() >= 3);
            }
            other => panic!("se esperaba Irrelevant, llegó {other:?}"),
        }
    }

    #[test]
    fn simple_question_is_echoed_unchanged() {
        let schema = file_folder_schema();
        let question = "how many files are in folder src";
        let reply = "```json\n{\"relevant\": true, \"sub_queries\": [], \"labels\": [\"folder\", \"file\"], \"properties\": [\"name\"]}\n```";

        assert_eq!(
            interpret(question, reply, &schema),
            Classification::SingleQuery { question: question.to_string() }
        );
    }

    #[test]
    fn compound_question_is_split_in_order() {
        let schema = file_folder_schema();
        let reply = r#"Here you go: {"relevant": true,
            "sub_queries": ["List the files in folder 'src'.", "Count the files in folder 'src'."],
            "labels": ["file", "folder"], "properties": ["name"]}"#;

        let classification = interpret("list files in src and count them", reply, &schema);
        assert_eq!(
            classification.queries(),
            vec!["List the files in folder 'src'.", "Count the files in folder 'src'."]
        );
    }

    #[test]
    fn placeholder_sub_questions_fall_back_to_single_query() {
        let schema = file_folder_schema();
        let reply = r#"{"relevant": true,
            "sub_queries": ["Find the folder named specific_folder_name.", "Count files in [folder]."]}"#;

        assert!(matches!(
            interpret("count files in src", reply, &schema),
            Classification::SingleQuery { .. }
        ));
    }

    #[test]
    fn unreadable_reply_is_treated_conservatively() {
        let classification = interpret("q", "I think it is fine", &file_folder_schema());
        assert!(matches!(classification, Classification::Irrelevant { ref examples, .. } if examples.len() >= 3));
    }

    #[tokio::test]
    async fn classify_sends_schema_and_reply_format() {
        let llm = ScriptedModel::new(|preamble, prompt| {
            assert!(preamble.contains("(:folder)-[:CONTAINS]->(:file)"));
            assert!(preamble.contains("sub_queries"));
            assert!(prompt.contains("how many files"));
            Ok(r#"{"relevant": true}"#.to_string())
        });

        let classification = classify(&llm, "how many files", &file_folder_schema())
            .await
            .unwrap();
        assert_eq!(classification.queries(), vec!["how many files"]);
        assert_eq!(llm.calls(), 1);
    }
}
