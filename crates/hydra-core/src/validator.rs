//! Read-only SQL admission filtering.
//!
//! Security-first validation for caller-supplied SQL: everything that is not
//! a read lands in `errors` before any database round-trip happens. The
//! analyzer half is heuristic by design; table extraction is a best-effort
//! text scan, not a SQL parse.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::config::SecurityConfig;
use hydra_common::{BrokerError, Result};

/// Statement classes that can never run through a read-only pool.
const FORBIDDEN_KEYWORDS: [&str; 29] = [
    // DML
    "INSERT",
    "UPDATE",
    "DELETE",
    "REPLACE",
    "MERGE",
    // DDL
    "CREATE",
    "ALTER",
    "DROP",
    "TRUNCATE",
    "RENAME",
    // Transaction control
    "BEGIN",
    "COMMIT",
    "ROLLBACK",
    "START TRANSACTION",
    // Privilege management
    "GRANT",
    "REVOKE",
    "SET PASSWORD",
    "CREATE USER",
    "DROP USER",
    // Bulk I/O
    "LOAD DATA",
    "INTO OUTFILE",
    "LOAD_FILE",
    // Invocation
    "CALL",
    "EXECUTE",
    "EXEC",
    // Administrative
    "FLUSH",
    "RESET",
    "KILL",
    "SHUTDOWN",
];

/// Functions that are legal but worth flagging (timing, locking, identity).
const RISKY_FUNCTIONS: [&str; 12] = [
    "BENCHMARK",
    "SLEEP",
    "GET_LOCK",
    "RELEASE_LOCK",
    "LOAD_FILE",
    "UUID",
    "RAND",
    "CONNECTION_ID",
    "VERSION",
    "USER",
    "DATABASE",
    "SCHEMA",
];

static RISKY_FUNCTION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    RISKY_FUNCTIONS
        .iter()
        .map(|function| {
            let pattern = format!(r"(?i)\b{}\s*\(", function);
            (Regex::new(&pattern).unwrap(), *function)
        })
        .collect()
});

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"--[^\n]*").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Injection-shaped constructs; any match rejects the query.
static SUSPICIOUS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)\bunion\b[\s\S]*\bselect\b").unwrap(),
            "UNION-based injection shape",
        ),
        (
            Regex::new(r"(?i)\bconcat\s*\(").unwrap(),
            "string concatenation probe",
        ),
        (
            Regex::new(r"(?i)information_schema").unwrap(),
            "system catalog access",
        ),
        (
            Regex::new(r"(?i)mysql\.user").unwrap(),
            "privilege table access",
        ),
        (
            Regex::new(r"(?i)into\s+outfile").unwrap(),
            "file write attempt",
        ),
        (
            Regex::new(r"(?i)load_file\s*\(").unwrap(),
            "file read attempt",
        ),
        (Regex::new(r"@@").unwrap(), "server variable access"),
        (
            Regex::new(r"(?i)<\s*script").unwrap(),
            "script token",
        ),
        (
            Regex::new(r"[\x00\x08\x0b\x0c\x0e-\x1f]").unwrap(),
            "control bytes",
        ),
        (
            Regex::new(r"(?i)(%27|%22|%23)|\\'").unwrap(),
            "escaped quote sequence",
        ),
    ]
});

static SELECT_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)select\s+\*").unwrap());
static LIMIT_CLAUSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blimit\s+\d").unwrap());
static LEADING_WILDCARD_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\blike\s+'%[^']*%'").unwrap());
static SUBQUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\(\s*select\b").unwrap());
static AGGREGATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(count|sum|avg|min|max|group_concat)\s*\(").unwrap());
static FROM_TABLES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bfrom\s+([a-zA-Z0-9_.`"]+(?:\s*,\s*[a-zA-Z0-9_.`"]+)*)"#).unwrap()
});
static JOIN_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bjoin\s+([a-zA-Z0-9_.`"]+)"#).unwrap());

/// Validation outcome; `sanitized_query` is the normalized form and is a
/// fixed point under a second validation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_query: Option<String>,
}

impl ValidationReport {
    /// Joins the error list into the admission failure message the executor
    /// surfaces.
    pub fn failure_message(&self) -> String {
        format!("Query validation failed: {}", self.errors.join("; "))
    }
}

/// Complexity buckets from the weighted construct score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

/// Heuristic structural analysis of a statement.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub operation: String,
    /// Names appearing after FROM and JOIN, comma-split, deduplicated.
    /// Heuristic: aliases and quoted identifiers pass through verbatim.
    pub tables: Vec<String>,
    pub has_subqueries: bool,
    pub has_joins: bool,
    pub has_aggregates: bool,
    pub estimated_complexity: ComplexityLevel,
}

/// The read-only admission filter.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    max_query_length: usize,
    allowed_operations: Vec<String>,
}

impl QueryValidator {
    pub fn new(security: &SecurityConfig) -> Self {
        Self {
            max_query_length: security.max_query_length,
            allowed_operations: security
                .allowed_operations
                .iter()
                .map(|op| op.to_uppercase())
                .collect(),
        }
    }

    /// Applies the admission rules in order and returns the full report.
    pub fn validate(&self, sql: &str) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // Basic shape
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return ValidationReport {
                is_valid: false,
                errors: vec!["Query must be a non-empty string".to_string()],
                warnings,
                sanitized_query: None,
            };
        }
        if sql.len() > self.max_query_length {
            errors.push(format!(
                "Query exceeds maximum length of {} characters",
                self.max_query_length
            ));
        }

        let normalized = normalize_query(sql);
        if normalized.is_empty() {
            return ValidationReport {
                is_valid: false,
                errors: vec!["Query contains no statement after comment removal".to_string()],
                warnings,
                sanitized_query: None,
            };
        }
        let upper = normalized.to_uppercase();

        // Forbidden keywords
        for keyword in FORBIDDEN_KEYWORDS {
            if contains_keyword(&upper, keyword) {
                errors.push(format!("Forbidden keyword detected: {}", keyword));
            }
        }

        // Leading operation allow-list
        let operation = leading_operation(&upper);
        if !self.allowed_operations.iter().any(|op| op == &operation) {
            errors.push(format!(
                "Operation '{}' is not allowed; permitted operations: {}",
                operation,
                self.allowed_operations.join(", ")
            ));
        }

        // Suspicious patterns
        for (pattern, label) in SUSPICIOUS_PATTERNS.iter() {
            if pattern.is_match(&normalized) {
                errors.push(format!("Suspicious pattern detected: {}", label));
            }
        }
        if has_unbalanced_quotes(&normalized) {
            errors.push("Unbalanced quote sequence".to_string());
        }

        // Risky functions warn, never reject
        for (pattern, function) in RISKY_FUNCTION_PATTERNS.iter() {
            if pattern.is_match(&normalized) {
                warnings.push(format!("Query uses risky function {}()", function));
            }
        }

        // Complexity
        let analysis = self.analyze(&normalized);
        let score = complexity_score(&upper);
        if analysis.estimated_complexity == ComplexityLevel::High {
            warnings.push(format!("Query complexity is high (score {})", score));
        }
        if analysis.tables.len() > 5 {
            warnings.push(format!(
                "Query touches {} tables; verify join conditions",
                analysis.tables.len()
            ));
        }
        if analysis.has_subqueries {
            warnings.push("Query contains subqueries".to_string());
        }

        // Advanced checks
        if SELECT_STAR.is_match(&normalized) && !LIMIT_CLAUSE.is_match(&normalized) {
            warnings.push("SELECT * without LIMIT may return a very large result".to_string());
        }
        if LEADING_WILDCARD_LIKE.is_match(&normalized) {
            warnings.push("Leading-wildcard LIKE cannot use an index".to_string());
        }
        if let Some(captures) = FROM_TABLES.captures(&normalized) {
            let from_list = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            if from_list.contains(',')
                && !upper.contains(" JOIN ")
                && !upper.contains(" WHERE ")
            {
                warnings.push(
                    "Multiple FROM tables without JOIN or WHERE may produce a cartesian product"
                        .to_string(),
                );
            }
        }
        // Defense-in-depth; the keyword list already rejects these
        if (upper.starts_with("DELETE") || upper.starts_with("UPDATE"))
            && !upper.contains("WHERE")
        {
            errors.push("Mutating statement without WHERE clause".to_string());
        }

        let is_valid = errors.is_empty();
        if !is_valid {
            debug!(error_count = errors.len(), "Query rejected by validator");
        }

        ValidationReport {
            is_valid,
            errors,
            warnings,
            sanitized_query: Some(normalized),
        }
    }

    /// Structural analysis without validation; never touches the database.
    pub fn analyze(&self, sql: &str) -> QueryAnalysis {
        let normalized = normalize_query(sql);
        let upper = normalized.to_uppercase();

        let mut tables: Vec<String> = Vec::new();
        for captures in FROM_TABLES.captures_iter(&normalized) {
            if let Some(list) = captures.get(1) {
                for name in list.as_str().split(',') {
                    push_table(&mut tables, name);
                }
            }
        }
        for captures in JOIN_TABLE.captures_iter(&normalized) {
            if let Some(name) = captures.get(1) {
                push_table(&mut tables, name.as_str());
            }
        }

        let score = complexity_score(&upper);
        QueryAnalysis {
            operation: leading_operation(&upper),
            tables,
            has_subqueries: SUBQUERY.is_match(&normalized),
            has_joins: upper.contains(" JOIN "),
            has_aggregates: AGGREGATE.is_match(&normalized),
            estimated_complexity: bucket_complexity(score),
        }
    }

    /// Validates and returns the sanitized query, or the admission error.
    pub fn admit(&self, sql: &str) -> Result<String> {
        let report = self.validate(sql);
        if report.is_valid {
            Ok(report.sanitized_query.unwrap_or_else(|| sql.to_string()))
        } else {
            Err(BrokerError::Validation(report.failure_message()))
        }
    }
}

/// Strips comments and collapses whitespace runs to single spaces.
pub fn normalize_query(sql: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(sql, " ");
    let without_lines = LINE_COMMENT.replace_all(&without_blocks, " ");
    WHITESPACE_RUN
        .replace_all(&without_lines, " ")
        .trim()
        .to_string()
}

fn leading_operation(upper: &str) -> String {
    upper
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Word-bounded keyword search over the uppercased statement; multi-word
/// phrases match as a unit.
fn contains_keyword(upper: &str, keyword: &str) -> bool {
    let mut start = 0;
    while let Some(position) = upper[start..].find(keyword) {
        let begin = start + position;
        let end = begin + keyword.len();
        let before_ok = begin == 0
            || !upper.as_bytes()[begin - 1].is_ascii_alphanumeric()
                && upper.as_bytes()[begin - 1] != b'_';
        let after_ok = end == upper.len()
            || !upper.as_bytes()[end].is_ascii_alphanumeric() && upper.as_bytes()[end] != b'_';
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

/// Counts unescaped single quotes; an odd total means a dangling literal.
fn has_unbalanced_quotes(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut count = 0usize;
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index] == b'\'' {
            // '' inside a literal is an escaped quote, skip the pair
            if index + 1 < bytes.len() && bytes[index + 1] == b'\'' {
                index += 2;
                continue;
            }
            count += 1;
        }
        index += 1;
    }
    count % 2 == 1
}

fn count_matches(upper: &str, needle: &str) -> u32 {
    upper.matches(needle).count() as u32
}

/// Weighted construct score:
/// 2 per JOIN, 3 per UNION, 4 per subquery, 1 per ORDER BY, 2 per GROUP BY,
/// 2 per HAVING.
pub fn complexity_score(upper: &str) -> u32 {
    let subqueries = SUBQUERY.find_iter(upper).count() as u32;
    2 * count_matches(upper, " JOIN ")
        + 3 * count_matches(upper, " UNION ")
        + 4 * subqueries
        + count_matches(upper, " ORDER BY ")
        + 2 * count_matches(upper, " GROUP BY ")
        + 2 * count_matches(upper, " HAVING ")
}

fn bucket_complexity(score: u32) -> ComplexityLevel {
    match score {
        0..=3 => ComplexityLevel::Low,
        4..=8 => ComplexityLevel::Medium,
        _ => ComplexityLevel::High,
    }
}

fn push_table(tables: &mut Vec<String>, raw: &str) {
    let name = raw
        .trim()
        .trim_matches('`')
        .trim_matches('"')
        .to_string();
    if name.is_empty() || name.starts_with('(') {
        return;
    }
    if !tables.iter().any(|existing| existing == &name) {
        tables.push(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> QueryValidator {
        QueryValidator::new(&SecurityConfig::default())
    }

    fn validator_with_length(max_query_length: usize) -> QueryValidator {
        let security = SecurityConfig {
            max_query_length,
            ..Default::default()
        };
        QueryValidator::new(&security)
    }

    #[test]
    fn test_accepts_simple_select() {
        let report = validator().validate("SELECT id, name FROM users WHERE id = ? LIMIT 10");
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_accepts_all_allowed_leading_operations() {
        let validator = validator();
        for sql in [
            "SELECT 1",
            "SHOW TABLES",
            "DESCRIBE users",
            "DESC users",
            "EXPLAIN SELECT 1",
            "ANALYZE TABLE users",
        ] {
            // SHOW TABLES etc. carry no forbidden constructs
            let report = validator.validate(sql);
            assert!(report.is_valid, "{} rejected: {:?}", sql, report.errors);
        }
    }

    #[test]
    fn test_rejects_insert() {
        let report = validator().validate("INSERT INTO users (id) VALUES (1)");
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("INSERT")));
    }

    #[test]
    fn test_rejects_delete_with_named_keyword() {
        let report = validator().validate("DELETE FROM users");
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("DELETE")));
    }

    #[test]
    fn test_rejects_embedded_dml() {
        let report = validator().validate("SELECT 1; DROP TABLE users");
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("DROP")));
    }

    #[test]
    fn test_keyword_matching_is_word_bounded() {
        // created_at must not trip CREATE; updated_by must not trip UPDATE
        let report =
            validator().validate("SELECT created_at, updated_by FROM audit_log LIMIT 5");
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_rejects_union_select_shape() {
        let report = validator().validate("SELECT id FROM a UNION SELECT password FROM b");
        assert!(!report.is_valid);
    }

    #[test]
    fn test_rejects_server_variables() {
        let report = validator().validate("SELECT @@version");
        assert!(!report.is_valid);
    }

    #[test]
    fn test_rejects_information_schema_probe() {
        let report = validator().validate("SELECT table_name FROM information_schema.tables");
        assert!(!report.is_valid);
    }

    #[test]
    fn test_rejects_unbalanced_quote() {
        let report = validator().validate("SELECT * FROM users WHERE name = 'x");
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("quote")));
    }

    #[test]
    fn test_escaped_pair_quotes_are_balanced() {
        let report =
            validator().validate("SELECT 1 FROM users WHERE name = 'O''Brien' LIMIT 1");
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_risky_function_warns_not_rejects() {
        let report = validator().validate("SELECT SLEEP(1)");
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("SLEEP")));
    }

    #[test]
    fn test_risky_function_requires_paren() {
        // A column named `version` is fine
        let report = validator().validate("SELECT version FROM releases LIMIT 1");
        assert!(report.warnings.iter().all(|w| !w.contains("VERSION")));
    }

    #[test]
    fn test_select_star_without_limit_warns() {
        let report = validator().validate("SELECT * FROM users");
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("LIMIT")));
    }

    #[test]
    fn test_leading_wildcard_like_warns() {
        let report =
            validator().validate("SELECT id FROM users WHERE name LIKE '%smith%' LIMIT 5");
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("index")));
    }

    #[test]
    fn test_cartesian_product_warning() {
        let report = validator().validate("SELECT a.id FROM a, b LIMIT 5");
        assert!(report.is_valid);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("cartesian")));
    }

    #[test]
    fn test_length_boundary() {
        let validator = validator_with_length(100);
        let pad = "SELECT 1 -- ";
        let exact = format!("{}{}", pad, "x".repeat(100 - pad.len()));
        assert_eq!(exact.len(), 100);
        assert!(validator.validate(&exact).is_valid);

        let over = format!("{}{}", pad, "x".repeat(101 - pad.len()));
        assert_eq!(over.len(), 101);
        assert!(!validator.validate(&over).is_valid);
    }

    #[test]
    fn test_empty_query_rejected() {
        let report = validator().validate("   ");
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("non-empty"));
    }

    #[test]
    fn test_normalization_strips_comments_and_whitespace() {
        let normalized = normalize_query("SELECT  1 -- trailing\n/* block\ncomment */ FROM t");
        assert_eq!(normalized, "SELECT 1 FROM t");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = normalize_query("SELECT   1\n\nFROM   t -- c");
        let twice = normalize_query(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sanitized_query_is_fixed_point() {
        let validator = validator();
        let report = validator.validate("SELECT  id\nFROM users  LIMIT 1");
        let sanitized = report.sanitized_query.unwrap();
        let second = validator.validate(&sanitized);
        assert_eq!(second.sanitized_query.unwrap(), sanitized);
    }

    #[test]
    fn test_complexity_scoring() {
        let upper = "SELECT A FROM T1 JOIN T2 ON X JOIN T3 ON Y GROUP BY A HAVING COUNT(1) > 1 ORDER BY A";
        // 2 joins (4) + group by (2) + having (2) + order by (1) = 9
        assert_eq!(complexity_score(upper), 9);
        assert_eq!(bucket_complexity(9), ComplexityLevel::High);
        assert_eq!(bucket_complexity(3), ComplexityLevel::Low);
        assert_eq!(bucket_complexity(5), ComplexityLevel::Medium);
    }

    #[test]
    fn test_analysis_extracts_tables() {
        let analysis = validator().analyze(
            "SELECT u.id FROM users u JOIN orders o ON o.user_id = u.id JOIN items ON 1=1",
        );
        assert_eq!(analysis.operation, "SELECT");
        assert!(analysis.tables.contains(&"users".to_string()));
        assert!(analysis.tables.contains(&"orders".to_string()));
        assert!(analysis.tables.contains(&"items".to_string()));
        assert!(analysis.has_joins);
        assert!(!analysis.has_subqueries);
    }

    #[test]
    fn test_analysis_deduplicates_tables() {
        let analysis =
            validator().analyze("SELECT 1 FROM users JOIN users ON users.id = users.id");
        assert_eq!(
            analysis
                .tables
                .iter()
                .filter(|t| t.as_str() == "users")
                .count(),
            1
        );
    }

    #[test]
    fn test_analysis_detects_aggregates_and_subqueries() {
        let analysis = validator()
            .analyze("SELECT COUNT(*) FROM (SELECT id FROM orders) o");
        assert!(analysis.has_aggregates);
        assert!(analysis.has_subqueries);
    }

    #[test]
    fn test_admit_returns_sanitized_form() {
        let sanitized = validator().admit("SELECT  1  LIMIT 1").unwrap();
        assert_eq!(sanitized, "SELECT 1 LIMIT 1");
    }

    #[test]
    fn test_admit_error_contains_joined_errors() {
        let error = validator().admit("DELETE FROM users").unwrap_err();
        let message = error.to_string();
        assert!(message.starts_with("Query validation failed:"));
        assert!(message.contains("DELETE"));
    }
}
