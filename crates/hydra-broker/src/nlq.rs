//! Restricted natural-language query surface.
//!
//! The generator consumes `{question, schema context}` and produces
//! `{sql, confidence, explanation, suggested improvements}`. Generated SQL
//! still passes the read-only validator before execution, so a bad template
//! can annoy but never mutate. The heuristic here is a keyword/template
//! bank, not a language model; a question it cannot shape into SQL is a
//! caller-visible error.

use serde::Serialize;

use hydra_common::{BrokerError, Result};
use hydra_core::schema::SchemaInfo;

/// Default row cap applied to open-ended listing questions.
const LIST_LIMIT: u32 = 100;

/// Slim schema view handed to the generator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaContext {
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub columns: Vec<String>,
}

impl SchemaContext {
    pub fn from_schema(schema: &SchemaInfo) -> Self {
        Self {
            tables: schema
                .tables
                .iter()
                .map(|table| TableSummary {
                    name: table.name.clone(),
                    columns: table.columns.iter().map(|c| c.name.clone()).collect(),
                })
                .collect(),
        }
    }
}

/// The generator's answer.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedSql {
    pub sql: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub explanation: String,
    pub suggested_improvements: Vec<String>,
}

/// Contract for NL-to-SQL generation.
pub trait SqlGenerator: Send + Sync {
    fn generate(&self, question: &str, context: Option<&SchemaContext>) -> Result<GeneratedSql>;
}

/// Keyword/template generator over the cached schema context.
#[derive(Debug, Default)]
pub struct HeuristicSqlGenerator;

impl HeuristicSqlGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Finds the context table mentioned in the question, tolerating
    /// singular/plural mismatches.
    fn find_table<'a>(question: &str, context: &'a SchemaContext) -> Option<&'a TableSummary> {
        let words: Vec<String> = question
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        context.tables.iter().find(|table| {
            let name = table.name.to_lowercase();
            let singular = name.strip_suffix('s').unwrap_or(&name).to_string();
            words.iter().any(|word| {
                let word_singular = word.strip_suffix('s').unwrap_or(word);
                word == &name || word_singular == singular
            })
        })
    }

    /// Finds a context column mentioned in the question.
    fn find_column<'a>(question: &str, table: &'a TableSummary) -> Option<&'a String> {
        let lower = question.to_lowercase();
        table
            .columns
            .iter()
            .find(|column| contains_word(&lower, &column.to_lowercase()))
    }

    /// First small integer in the question, for "top N" shapes.
    fn find_count(question: &str) -> Option<u32> {
        question
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .find_map(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0 && *n <= 10_000)
    }
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric() && c != '_').any(|w| w == needle)
}

impl SqlGenerator for HeuristicSqlGenerator {
    fn generate(&self, question: &str, context: Option<&SchemaContext>) -> Result<GeneratedSql> {
        let question = question.trim();
        if question.is_empty() {
            return Err(BrokerError::Validation(
                "Question must be a non-empty string".to_string(),
            ));
        }
        let context = context.ok_or_else(|| {
            BrokerError::Validation(
                "No schema context available to ground the question".to_string(),
            )
        })?;

        let table = Self::find_table(question, context).ok_or_else(|| {
            BrokerError::Validation(format!(
                "Could not identify a target table in the question; known tables: {}",
                context
                    .tables
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        let lower = question.to_lowercase();
        let column = Self::find_column(question, table);
        let mut suggested_improvements = vec![
            "Add a WHERE clause to narrow the result".to_string(),
        ];

        // Count questions
        if lower.contains("how many") || lower.starts_with("count") {
            return Ok(GeneratedSql {
                sql: format!("SELECT COUNT(*) AS count FROM {}", table.name),
                confidence: if column.is_some() { 0.85 } else { 0.8 },
                explanation: format!("Counting all rows in '{}'", table.name),
                suggested_improvements,
            });
        }

        // Aggregate questions over a recognized column
        if let Some(column) = column {
            for (keywords, function) in [
                (&["average", "avg", "mean"][..], "AVG"),
                (&["sum", "total"][..], "SUM"),
                (&["maximum", "max", "highest", "largest"][..], "MAX"),
                (&["minimum", "min", "lowest", "smallest"][..], "MIN"),
            ] {
                if keywords.iter().any(|kw| contains_word(&lower, kw)) {
                    return Ok(GeneratedSql {
                        sql: format!(
                            "SELECT {agg}({col}) AS {agg_lower}_{col} FROM {table}",
                            agg = function,
                            agg_lower = function.to_lowercase(),
                            col = column,
                            table = table.name
                        ),
                        confidence: 0.8,
                        explanation: format!(
                            "Computing {} of '{}.{}'",
                            function, table.name, column
                        ),
                        suggested_improvements,
                    });
                }
            }

            // Top-N by column
            if lower.contains("top") || lower.contains("first") || lower.contains("largest") {
                let limit = Self::find_count(question).unwrap_or(10);
                return Ok(GeneratedSql {
                    sql: format!(
                        "SELECT * FROM {} ORDER BY {} DESC LIMIT {}",
                        table.name, column, limit
                    ),
                    confidence: 0.75,
                    explanation: format!(
                        "Top {} rows of '{}' ordered by '{}'",
                        limit, table.name, column
                    ),
                    suggested_improvements,
                });
            }
        }

        // Open-ended listing
        if ["list", "show", "get", "all", "what"].iter().any(|kw| contains_word(&lower, kw)) {
            suggested_improvements
                .push("Name specific columns instead of SELECT *".to_string());
            return Ok(GeneratedSql {
                sql: format!("SELECT * FROM {} LIMIT {}", table.name, LIST_LIMIT),
                confidence: 0.6,
                explanation: format!(
                    "Listing rows from '{}' capped at {}",
                    table.name, LIST_LIMIT
                ),
                suggested_improvements,
            });
        }

        // The table matched but no template did; a bounded preview is the
        // safest fallback.
        suggested_improvements.push(
            "Rephrase with count/list/top/average phrasing for a better match".to_string(),
        );
        Ok(GeneratedSql {
            sql: format!("SELECT * FROM {} LIMIT 10", table.name),
            confidence: 0.3,
            explanation: format!("Previewing '{}'; no template matched the question", table.name),
            suggested_improvements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> SchemaContext {
        SchemaContext {
            tables: vec![
                TableSummary {
                    name: "orders".to_string(),
                    columns: vec!["id".into(), "amount".into(), "created_at".into()],
                },
                TableSummary {
                    name: "customers".to_string(),
                    columns: vec!["id".into(), "name".into(), "email".into()],
                },
            ],
        }
    }

    fn generate(question: &str) -> GeneratedSql {
        HeuristicSqlGenerator::new()
            .generate(question, Some(&context()))
            .unwrap()
    }

    #[test]
    fn test_count_question() {
        let generated = generate("How many orders do we have?");
        assert_eq!(generated.sql, "SELECT COUNT(*) AS count FROM orders");
        assert!(generated.confidence >= 0.8);
    }

    #[test]
    fn test_average_question() {
        let generated = generate("What is the average amount of orders?");
        assert_eq!(generated.sql, "SELECT AVG(amount) AS avg_amount FROM orders");
    }

    #[test]
    fn test_sum_question() {
        let generated = generate("total amount across orders");
        assert_eq!(generated.sql, "SELECT SUM(amount) AS sum_amount FROM orders");
    }

    #[test]
    fn test_top_n_question() {
        let generated = generate("top 5 orders by amount");
        assert_eq!(generated.sql, "SELECT * FROM orders ORDER BY amount DESC LIMIT 5");
    }

    #[test]
    fn test_list_question_is_capped() {
        let generated = generate("list customers");
        assert_eq!(generated.sql, "SELECT * FROM customers LIMIT 100");
        assert!(generated.confidence < 0.8);
    }

    #[test]
    fn test_singular_table_reference_matches() {
        let generated = generate("how many customer records exist");
        assert_eq!(generated.sql, "SELECT COUNT(*) AS count FROM customers");
    }

    #[test]
    fn test_unknown_table_is_an_error() {
        let error = HeuristicSqlGenerator::new()
            .generate("how many invoices", Some(&context()))
            .unwrap_err();
        assert!(error.to_string().contains("known tables"));
    }

    #[test]
    fn test_missing_context_is_an_error() {
        assert!(HeuristicSqlGenerator::new()
            .generate("how many orders", None)
            .is_err());
    }

    #[test]
    fn test_fallback_preview_has_low_confidence() {
        let generated = generate("orders situation please");
        assert!(generated.sql.starts_with("SELECT * FROM orders LIMIT 10"));
        assert!(generated.confidence <= 0.3_f64 + f64::EPSILON);
    }

    #[test]
    fn test_generated_sql_passes_the_validator() {
        use hydra_core::config::SecurityConfig;
        use hydra_core::validator::QueryValidator;

        let validator = QueryValidator::new(&SecurityConfig::default());
        for question in [
            "how many orders",
            "average amount of orders",
            "top 3 orders by amount",
            "list customers",
        ] {
            let generated = generate(question);
            let report = validator.validate(&generated.sql);
            assert!(report.is_valid, "{} -> {:?}", generated.sql, report.errors);
        }
    }
}
