//! Prompts enviados al modelo de lenguaje en cada etapa.

pub const SUMMARY_PREAMBLE: &str = "You are an AI assistant that summarizes source code.";

pub fn summary_prompt(source_code: &str) -> String {
    format!(
        r#"You are a highly skilled software developer and code reviewer.
Your task is to provide a concise summary of the following code.
Focus on explaining what the code does, its purpose,
and any key details about its functionality.
Do not include comments or technical jargon that is unnecessary.

Code:
{source_code}

Summary:
"#
    )
}

/// Instrucciones del clasificador/simplificador. `reply_schema` es el JSON
/// Schema de la respuesta esperada.
pub fn simplifier_preamble(schema: &str, reply_schema: &str) -> String {
    format!(
        r#"Role:
You are a Neo4j Cypher query expert specializing in breaking down
and simplifying user questions using the provided graph schema.

Task:
Decide whether the user question can be answered with this schema.
If it can and it is complex, break it into smaller sub-questions.
Otherwise, do not break the question.
If it cannot, explain why and help the user refine it.

Semantic validation:
- The question must make sense given the schema's node labels,
  relationship types and properties. It does not need to match the schema
  word for word, but it must be feasible to translate into Cypher.
- Names of files, folders, classes, functions and so on are free-form
  values stored in the `name` property. Never reject a question because a
  name value is unknown to you.
- If the question does not align with the schema, set "relevant" to false,
  explain why in "reason" and give at least 3 example questions in
  "examples" that ARE answerable with this schema.

Breakdown:
- Do not split unnecessarily. Split only when the question is complex.
- Every sub-question must reuse the concrete values the user provided
  (file names, class names, ...). Never use generic placeholders.
- Each sub-question must be answerable on its own.
- If no split is needed, leave "sub_queries" empty.

Report in "labels" every node label and in "properties" every property
name your interpretation relies on, spelled exactly as in the schema.
Do not write Cypher.

Example:
"Retrieve the code of the file named 'stream-be.py'" splits into
1. "Find the file node with the name 'stream-be.py'."
2. "Retrieve the file_code of the file node 'stream-be.py'."

Respond with a single JSON object matching this JSON Schema and nothing else:
{reply_schema}

Schema:
{schema}
"#
    )
}

pub fn simplifier_prompt(question: &str) -> String {
    format!("User Query:\n{question}")
}

/// Instrucciones del traductor a Cypher.
pub fn cypher_preamble(schema: &str, reply_schema: &str) -> String {
    format!(
        r#"Task: Generate a Cypher statement to query a graph database.

Instructions:
- Use only the node labels, relationship types and properties in the schema.
  Labels and relationship types are case sensitive.
- Use the name or property values provided by the user. Never invent
  placeholder values such as "specific_folder_name".
- If the question does not give a value you need, do not guess: put a
  short request for that value in "clarification" and leave "cypher" empty.
- If you foresee that answering needs 0 statements or more than 2
  statements, ask the user for more information through "clarification".
- Write only read queries (MATCH / OPTIONAL MATCH / WITH / WHERE / RETURN).
- The RETURN clause must explicitly include the property values used in
  the filtering conditions, alongside the information requested.
- Give every returned expression an alias with AS.
- Separate two statements with a semicolon.

Examples (for reference only, do not copy them):
# How many functions are there for each Python file?
MATCH (f:file)-[:CONTAINS]->(m:function)
WHERE f.name ENDS WITH '.py'
RETURN f.name AS python_file, count(m) AS function_count

# Summaries of the methods of class 'Parser'
MATCH (c:class)-[:CONTAINS]->(m:method)-[:CONTAINS]->(s:summary)
WHERE c.name = 'Parser'
RETURN c.name AS class_name, m.name AS method_name, s.code_summary AS method_summary

Respond with a single JSON object matching this JSON Schema and nothing else:
{reply_schema}

Schema:
{schema}
"#
    )
}

pub fn cypher_prompt(question: &str) -> String {
    format!("The question is:\n{question}")
}

pub const ANSWER_PREAMBLE: &str = "Respond as a developer! Use the provided data but never make up the response. \
If the data is empty, say that nothing matched.";

pub fn answer_prompt(question: &str, results_json: &str) -> String {
    format!("Question:\n{question}\n\nQuery results (ordered by sub-question):\n{results_json}")
}
