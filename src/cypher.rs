//! Análisis ligero de sentencias Cypher generadas por el modelo.
//!
//! No es un parser completo: basta para separar sentencias, saber qué
//! etiquetas/relaciones/propiedades se referencian, detectar escrituras y
//! localizar la cláusula RETURN final. Todo trabaja sobre una copia con los
//! literales de texto en blanco, de modo que su contenido nunca se confunde
//! con estructura.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::schema::SchemaSnapshot;

static NODE_LABELS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\(\s*(?:[A-Za-z_]\w*)?\s*((?::\s*(?:`[^`]+`|[A-Za-z_]\w*)\s*(?:[|&]\s*(?:`[^`]+`|[A-Za-z_]\w*)\s*)*)+)",
    )
    .unwrap()
});
static REL_TYPES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\[\s*(?:[A-Za-z_]\w*)?\s*:\s*((?:`[^`]+`|[A-Za-z_]\w*)(?:\s*\|\s*:?\s*(?:`[^`]+`|[A-Za-z_]\w*))*)",
    )
    .unwrap()
});
static IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`|([A-Za-z_]\w*)").unwrap());
static PROPERTY_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_]\w*)\s*\.\s*(?:`([^`]+)`|([A-Za-z_]\w*))").unwrap()
});
static NODE_MAP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(\s*([A-Za-z_]\w*)?\s*(:[^(){}]*)?\{([^{}]*)\}").unwrap()
});
static PATTERN_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(MATCH|MERGE)\s*$").unwrap());
static LABEL_PREDICATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b[A-Za-z_]\w*\s*((?::\s*(?:`[^`]+`|[A-Za-z_]\w*)\s*(?:[|&]\s*(?:`[^`]+`|[A-Za-z_]\w*)\s*)*)+)",
    )
    .unwrap()
});
static MAP_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|,)\s*(?:`([^`]+)`|([A-Za-z_]\w*))\s*:").unwrap()
});
static WRITE_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP|FOREACH|LOAD\s+CSV)\b").unwrap()
});
static CALL_PROCEDURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bCALL\s+([A-Za-z_][\w.]*)").unwrap());
static RETURN_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bRETURN\b").unwrap());
static RETURN_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(ORDER\s+BY|SKIP|LIMIT|UNION)\b").unwrap());
static UNION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bUNION\b").unwrap());
static DISTINCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*DISTINCT\b").unwrap());
static ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+AS\s+(?:`([^`]+)`|([A-Za-z_]\w*))\s*$").unwrap()
});
// Sobre la copia enmascarada, anclado justo antes del literal
static COMPARED_PROPERTY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b([A-Za-z_]\w*)\.`?([A-Za-z_]\w*)`?\s*(\))?\s*(=~|<>|=|STARTS\s+WITH|ENDS\s+WITH|CONTAINS|IN)\s*(?:\[[^\[\]]*)?$",
    )
    .unwrap()
});
static MAP_KEY_BEFORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\{|,)\s*`?([A-Za-z_]\w*)`?\s*:\s*$").unwrap()
});

/// Sustituye el contenido de los literales de texto por espacios, conservando
/// las comillas y la longitud en bytes.
pub fn mask_literals(cypher: &str) -> String {
    let mut out = String::with_capacity(cypher.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in cypher.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                    blank(&mut out, ch);
                } else if ch == '\\' {
                    escaped = true;
                    blank(&mut out, ch);
                } else if ch == q {
                    quote = None;
                    out.push(ch);
                } else {
                    blank(&mut out, ch);
                }
            }
            None => {
                if ch == '\'' || ch == '"' {
                    quote = Some(ch);
                }
                out.push(ch);
            }
        }
    }
    out
}

fn blank(out: &mut String, ch: char) {
    out.extend(std::iter::repeat(' ').take(ch.len_utf8()));
}

/// Separa sentencias por `;` fuera de literales. Descarta las vacías.
pub fn split_statements(cypher: &str) -> Vec<String> {
    let masked = mask_literals(cypher);
    let mut statements = Vec::new();
    let mut start = 0;
    for (idx, ch) in masked.char_indices() {
        if ch == ';' {
            statements.push(cypher[start..idx].trim().to_string());
            start = idx + 1;
        }
    }
    statements.push(cypher[start..].trim().to_string());
    statements.retain(|s| !s.is_empty());
    statements
}

fn ident_names(chain: &str) -> impl Iterator<Item = String> + '_ {
    IDENT.captures_iter(chain).filter_map(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().to_string())
    })
}

/// Profundidad de llaves `{}` al final de `masked`.
fn brace_depth(masked: &str) -> i32 {
    masked.chars().fold(0, |depth, ch| match ch {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

/// Mapa de propiedades de un patrón de nodo `(n:label {..})`.
struct NodeMap {
    variable: Option<String>,
    body_start: usize,
    body_end: usize,
}

/// Sólo cuenta como patrón de nodo si lleva variable o etiqueta, o si el
/// paréntesis sigue a una flecha o a MATCH/MERGE. `collect({k: v})` es un
/// mapa literal, no un nodo.
fn node_maps(masked: &str) -> Vec<NodeMap> {
    NODE_MAP
        .captures_iter(masked)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let body = caps.get(3)?;
            let variable = caps.get(1).map(|v| v.as_str().to_string());
            let before = masked[..whole.start()].trim_end();
            let in_pattern = variable.is_some()
                || caps.get(2).is_some()
                || before.is_empty()
                || before.ends_with(|c: char| matches!(c, '-' | '>' | '<' | ','))
                || PATTERN_KEYWORD.is_match(before);
            in_pattern.then(|| NodeMap {
                variable,
                body_start: body.start(),
                body_end: body.end(),
            })
        })
        .collect()
}

/// Etiquetas usadas en patrones de nodo `(n:label)` o en predicados
/// `WHERE n:label`.
pub fn referenced_labels(statement: &str) -> BTreeSet<String> {
    let masked = mask_literals(statement);
    let mut labels: BTreeSet<String> = NODE_LABELS
        .captures_iter(&masked)
        .filter_map(|c| c.get(1))
        .flat_map(|m| ident_names(m.as_str()).collect::<Vec<_>>())
        .collect();

    for caps in LABEL_PREDICATE.captures_iter(&masked) {
        let (Some(whole), Some(chain)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let before = &masked[..whole.start()];
        let prev = before.trim_end().chars().last();
        // `[r:TYPE]` es una relación y `{key: v}` una clave de mapa
        if prev == Some('[') || (matches!(prev, Some('{') | Some(',')) && brace_depth(before) > 0) {
            continue;
        }
        let mut names: Vec<String> = ident_names(chain.as_str()).collect();
        // En `[x IN l WHERE x:class | x.name]` la barra cierra el predicado
        let next = masked[whole.end()..].trim_start().chars().next();
        if matches!(next, Some('.') | Some('(')) {
            names.pop();
        }
        labels.extend(names);
    }
    labels
}

/// Tipos de relación usados en patrones `-[r:TYPE]->`.
pub fn referenced_relationship_types(statement: &str) -> BTreeSet<String> {
    let masked = mask_literals(statement);
    REL_TYPES
        .captures_iter(&masked)
        .filter_map(|c| c.get(1))
        .flat_map(|m| ident_names(m.as_str()).collect::<Vec<_>>())
        .collect()
}

/// Propiedades accedidas como `n.prop` o fijadas en mapas de nodo
/// `(n {prop: ...})`. Las llamadas a funciones (`db.labels()`) no cuentan.
pub fn referenced_properties(statement: &str) -> BTreeSet<String> {
    let masked = mask_literals(statement);
    let mut props = BTreeSet::new();

    for caps in PROPERTY_REF.captures_iter(&masked) {
        let Some(whole) = caps.get(0) else { continue };
        let next = masked[whole.end()..].trim_start().chars().next();
        if matches!(next, Some('(') | Some('.')) {
            continue;
        }
        if let Some(prop) = caps.get(2).or_else(|| caps.get(3)) {
            props.insert(prop.as_str().to_string());
        }
    }

    for map in node_maps(&masked) {
        for key in MAP_KEY.captures_iter(&masked[map.body_start..map.body_end]) {
            if let Some(k) = key.get(1).or_else(|| key.get(2)) {
                props.insert(k.as_str().to_string());
            }
        }
    }
    props
}

/// Primera cláusula de escritura encontrada, si la hay. También se rechaza
/// cualquier procedimiento fuera de `db.*`.
pub fn write_clause(statement: &str) -> Option<String> {
    let masked = mask_literals(statement);

    for m in WRITE_CLAUSE.find_iter(&masked) {
        let before = masked[..m.start()].trim_end().chars().last();
        // `n.set`, `:Set` o `` `create` `` son nombres, no cláusulas
        if matches!(before, Some('.') | Some(':') | Some('`')) {
            continue;
        }
        return Some(m.as_str().to_uppercase());
    }

    CALL_PROCEDURE
        .captures_iter(&masked)
        .filter_map(|c| c.get(1))
        .find(|p| !p.as_str().to_lowercase().starts_with("db."))
        .map(|p| format!("CALL {}", p.as_str()))
}

/// Posiciones (en bytes) de la cláusula RETURN final.
struct ReturnClause {
    keyword_start: usize,
    items_start: usize,
    items_end: usize,
}

fn final_return(masked: &str) -> Option<ReturnClause> {
    let keyword = RETURN_KEYWORD.find_iter(masked).last()?;
    let mut items_start = keyword.end();
    if let Some(d) = DISTINCT.find(&masked[items_start..]) {
        items_start += d.end();
    }
    let items_end = RETURN_END
        .find(&masked[items_start..])
        .map(|m| items_start + m.start())
        .unwrap_or(masked.len());
    Some(ReturnClause {
        keyword_start: keyword.start(),
        items_start,
        items_end,
    })
}

/// Rangos de los elementos separados por comas de primer nivel.
fn split_items(masked: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut item_start = start;
    for (offset, ch) in masked[start..end].char_indices() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                items.push((item_start, start + offset));
                item_start = start + offset + 1;
            }
            _ => {}
        }
    }
    items.push((item_start, end));
    items
}

/// Nombres de columna que devolverá la sentencia: el alias, o el texto de la
/// expresión cuando no lo tiene. `None` si no hay RETURN o es `RETURN *`.
pub fn return_columns(statement: &str) -> Option<Vec<String>> {
    let masked = mask_literals(statement);
    let clause = final_return(&masked)?;

    let mut columns = Vec::new();
    for (start, end) in split_items(&masked, clause.items_start, clause.items_end) {
        let masked_item = &masked[start..end];
        let original = statement[start..end].trim();
        if original.is_empty() || original == "*" {
            return None;
        }
        match ALIAS.captures(masked_item) {
            Some(caps) => {
                let alias = caps.get(1).or_else(|| caps.get(2))?;
                columns.push(alias.as_str().to_string());
            }
            None => columns.push(original.to_string()),
        }
    }
    Some(columns)
}

/// Literal de texto usado antes del RETURN final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterLiteral {
    /// Variable del nodo filtrado, si se conoce (`f` en `f.name = 'x'`).
    pub variable: Option<String>,
    /// Propiedad comparada o clave del mapa de nodo, si se conoce.
    pub property: Option<String>,
    /// El literal tal cual, con sus comillas.
    pub literal: String,
    /// `var.prop = 'x'` sin función alrededor: proyectar `var.prop` ya
    /// devuelve el valor filtrado.
    pub direct: bool,
}

/// Rangos `[inicio, fin)` de los literales de texto, comillas incluidas.
fn literal_spans(masked: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, char)> = None;
    for (idx, ch) in masked.char_indices() {
        match open {
            Some((start, q)) if ch == q => {
                spans.push((start, idx + ch.len_utf8()));
                open = None;
            }
            None if ch == '\'' || ch == '"' => open = Some((idx, ch)),
            _ => {}
        }
    }
    spans
}

/// Todos los literales de texto previos al RETURN final, cualquiera que sea
/// el operador o la función que los envuelve.
pub fn filter_literals(statement: &str) -> Vec<FilterLiteral> {
    let masked = mask_literals(statement);
    let scope_end = final_return(&masked)
        .map(|c| c.keyword_start)
        .unwrap_or(statement.len());
    let maps = node_maps(&masked[..scope_end]);

    let mut filters: Vec<FilterLiteral> = Vec::new();
    for (start, end) in literal_spans(&masked[..scope_end]) {
        let literal = statement[start..end].to_string();
        if filters.iter().any(|f| f.literal == literal) {
            continue;
        }
        let prefix = &masked[..start];

        let filter = if let Some(caps) = COMPARED_PROPERTY.captures(prefix) {
            let op = caps[4].to_string();
            FilterLiteral {
                variable: Some(caps[1].to_string()),
                property: Some(caps[2].to_string()),
                literal,
                direct: op == "=" && caps.get(3).is_none(),
            }
        } else if let Some(map) = maps.iter().find(|m| m.body_start <= start && end <= m.body_end) {
            let key = MAP_KEY_BEFORE
                .captures(&masked[map.body_start.saturating_sub(1)..start])
                .map(|c| c[1].to_string());
            FilterLiteral {
                variable: map.variable.clone(),
                direct: key.is_some(),
                property: key,
                literal,
            }
        } else {
            FilterLiteral {
                variable: None,
                property: None,
                literal,
                direct: false,
            }
        };
        filters.push(filter);
    }
    filters
}

/// Garantiza que los literales de filtro aparecen en la proyección final,
/// añadiendo columnas constantes `'valor' AS <prop>_filter` si faltan.
pub fn ensure_filter_projection(statement: &str) -> String {
    let masked = mask_literals(statement);
    let Some(clause) = final_return(&masked) else {
        return statement.to_string();
    };
    // Con UNION todas las ramas deben tener las mismas columnas
    if UNION.is_match(&masked) {
        return statement.to_string();
    }

    let items = &statement[clause.items_start..clause.items_end];
    let mut taken: Vec<String> = return_columns(statement).unwrap_or_default();
    let mut additions = Vec::new();

    for filter in filter_literals(statement) {
        let projected = filter.direct
            && matches!(
                (&filter.variable, &filter.property),
                (Some(var), Some(prop)) if items.contains(&format!("{var}.{prop}"))
            );
        if projected || items.contains(&filter.literal) {
            continue;
        }
        let base = match &filter.property {
            Some(prop) => format!("{prop}_filter"),
            None => "filter".to_string(),
        };
        let mut alias = base.clone();
        let mut n = 2;
        while taken.contains(&alias) {
            alias = format!("{base}_{n}");
            n += 1;
        }
        additions.push(format!("{} AS {alias}", filter.literal));
        taken.push(alias);
    }

    if additions.is_empty() {
        return statement.to_string();
    }
    let insert_at = clause.items_start + items.trim_end().len();
    format!(
        "{}, {}{}",
        &statement[..insert_at],
        additions.join(", "),
        &statement[insert_at..]
    )
}

/// Referencias de la sentencia que no existen en el esquema.
pub fn schema_violations(statement: &str, schema: &SchemaSnapshot) -> Vec<String> {
    let mut violations = Vec::new();
    for label in referenced_labels(statement) {
        if !schema.has_label(&label) {
            violations.push(format!("la etiqueta `{label}` no existe en el esquema"));
        }
    }
    for rel_type in referenced_relationship_types(statement) {
        if !schema.has_relationship_type(&rel_type) {
            violations.push(format!("la relación `{rel_type}` no existe en el esquema"));
        }
    }
    for prop in referenced_properties(statement) {
        if !schema.has_property(&prop) {
            violations.push(format!("la propiedad `{prop}` no existe en el esquema"));
        }
    }
    violations
}
