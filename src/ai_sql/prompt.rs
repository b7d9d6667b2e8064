//! Prompt generation for SQL queries

use serde::Serialize;

/// System message sent with every request
pub const SYSTEM_PROMPT: &str = "You are an SQL expert specializing in PostgreSQL.";

/// System and user messages for one completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptPayload {
    pub system: String,
    pub user: String,
}

/// Prompt generator for natural-language questions
pub struct PromptGenerator;

impl PromptGenerator {
    /// Numbered rules the model must follow
    pub fn rules(default_limit: u32) -> Vec<String> {
        vec![
            "Generate ONLY SELECT queries.".to_string(),
            "Do not add comments, backticks or markdown formatting.".to_string(),
            "Use only the tables and columns present in the schema above.".to_string(),
            "Make sure the query can be executed directly in PostgreSQL.".to_string(),
            "Use aliases for columns to make the results more readable.".to_string(),
            "Add ORDER BY when appropriate.".to_string(),
            format!("Limit results to {default_limit} rows unless specified otherwise."),
            "Carefully check that tables and columns exist in the schema before using them."
                .to_string(),
        ]
    }

    /// Generate the user prompt embedding the schema text and the question
    pub fn user_prompt(schema_text: &str, question: &str, default_limit: u32) -> String {
        let rules: Vec<String> = Self::rules(default_limit)
            .iter()
            .enumerate()
            .map(|(i, rule)| format!("{}. {}", i + 1, rule))
            .collect();

        format!(
            "You are an SQL expert who converts natural-language questions into SQL queries.\n\n\
             Using the database schema below, write an SQL query that answers the user's question.\n\
             Return ONLY the SQL query, without explanations, markdown formatting or comments.\n\n\
             Database schema (exact and current, use only these tables and columns):\n\
             {schema_text}\n\n\
             Important rules:\n\
             {rules}\n\n\
             User question: {question}\n\n\
             SQL query (only the query, no comments or explanations):",
            rules = rules.join("\n"),
        )
    }

    /// Build the full payload. Deterministic for identical inputs.
    pub fn build(schema_text: &str, question: &str, default_limit: u32) -> PromptPayload {
        PromptPayload {
            system: SYSTEM_PROMPT.to_string(),
            user: Self::user_prompt(schema_text, question, default_limit),
        }
    }
}
