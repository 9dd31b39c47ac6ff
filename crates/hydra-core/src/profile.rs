//! Data profiling model and quality scoring.
//!
//! The per-engine profilers gather raw per-column statistics with SQL
//! aggregation; the scoring and recommendation heuristics here are shared so
//! both engines grade data the same way.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::value::SqlValue;
use hydra_common::Result;

/// Knobs for one profiling run.
#[derive(Debug, Clone)]
pub struct ProfileOptions {
    /// Rows to sample when the table exceeds `max_sample_rows`
    pub sample_size: u64,
    /// Above this row count the profiler switches to random sampling
    pub max_sample_rows: u64,
    /// How many frequent values to keep per column
    pub top_k: usize,
    /// Run pattern-classification regexes on string columns
    pub include_patterns: bool,
    /// Skip expensive per-column extras (top values, distribution,
    /// patterns, outliers); used by cache warm-up
    pub shallow: bool,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            sample_size: 10_000,
            max_sample_rows: 100_000,
            top_k: 10,
            include_patterns: true,
            shallow: false,
        }
    }
}

impl ProfileOptions {
    /// Cheap variant for warm-up prefetches.
    pub fn shallow() -> Self {
        Self {
            include_patterns: false,
            shallow: true,
            ..Default::default()
        }
    }
}

/// How the profiled rows were selected.
#[derive(Debug, Clone, Serialize)]
pub struct SamplingInfo {
    /// `full` or `random`
    pub method: &'static str,
    pub sample_size: u64,
    /// Confidence in the profile, 0-100
    pub confidence: f64,
}

impl SamplingInfo {
    /// Full scan when the table fits under `max_sample_rows`, otherwise a
    /// random sample with confidence proportional to coverage (capped at 95).
    pub fn for_table(total_rows: u64, options: &ProfileOptions) -> Self {
        if total_rows <= options.max_sample_rows {
            Self {
                method: "full",
                sample_size: total_rows,
                confidence: 100.0,
            }
        } else {
            let confidence =
                (options.sample_size as f64 / total_rows as f64 * 100.0).min(95.0);
            Self {
                method: "random",
                sample_size: options.sample_size,
                confidence,
            }
        }
    }

    pub fn is_sampled(&self) -> bool {
        self.method == "random"
    }
}

/// One frequent value with its share of the sample.
#[derive(Debug, Clone, Serialize)]
pub struct TopValue {
    pub value: SqlValue,
    pub count: u64,
    pub percentage: f64,
}

/// Pattern-classification counts for string columns.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternCounts {
    pub email: u64,
    pub phone: u64,
    pub url: u64,
    pub iso_date: u64,
}

/// Statistical summary of one column.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub column_name: String,
    /// Normalized type category
    pub data_type: String,
    pub null_count: u64,
    pub null_percentage: f64,
    pub unique_count: u64,
    pub unique_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<SqlValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<SqlValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SqlValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stddev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_values: Option<Vec<TopValue>>,
    /// Range-bucket label to row count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<BTreeMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns: Option<PatternCounts>,
    /// Values beyond mean +/- 3 stddev, capped at 10
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outliers: Option<Vec<SqlValue>>,
    pub data_quality_issues: Vec<String>,
    /// Engine extras (ENUM values, column type text, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_specific: Option<JsonValue>,
}

impl ColumnProfile {
    pub fn new(column_name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            data_type: data_type.into(),
            null_count: 0,
            null_percentage: 0.0,
            unique_count: 0,
            unique_percentage: 0.0,
            min_value: None,
            max_value: None,
            avg_value: None,
            median_value: None,
            mode: None,
            stddev: None,
            variance: None,
            top_values: None,
            distribution: None,
            patterns: None,
            outliers: None,
            data_quality_issues: Vec::new(),
            adapter_specific: None,
        }
    }
}

/// Table-level quality verdict.
#[derive(Debug, Clone, Serialize)]
pub struct DataQuality {
    /// 0-100, mean of the column scores
    pub overall_score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// FK neighborhood of the profiled table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableRelationships {
    /// Tables this table references
    pub parent_tables: Vec<String>,
    /// Tables referencing this table
    pub child_tables: Vec<String>,
}

/// The complete profile of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableProfile {
    pub table_name: String,
    pub total_rows: u64,
    pub total_columns: usize,
    pub estimated_size_bytes: u64,
    pub columns: Vec<ColumnProfile>,
    pub data_quality: DataQuality,
    pub relationships: TableRelationships,
    pub sampling: SamplingInfo,
}

/// The profiling contract each adapter owns.
#[async_trait]
pub trait DataProfiler: Send + Sync {
    async fn profile_table(&self, table: &str, options: &ProfileOptions) -> Result<TableProfile>;
}

/// Column names that legitimately hold few distinct values; low uniqueness
/// on these is not an indexing hint.
const STATUS_LIKE_NAMES: [&str; 6] = ["status", "type", "flag", "state", "kind", "category"];

/// Scores one column 0-100 from its profile.
///
/// Combines null share, top-value dominance, constant detection, outlier
/// count, and accumulated per-column issues.
pub fn score_column(profile: &ColumnProfile) -> f64 {
    let mut score = 100.0;

    score -= profile.null_percentage * 0.4;

    if let Some(top_values) = &profile.top_values {
        if let Some(top) = top_values.first() {
            if top.percentage > 90.0 && profile.unique_count > 1 {
                score -= 15.0;
            }
        }
    }

    // A single distinct value across a non-trivial sample is usually a
    // vestigial column.
    if profile.unique_count == 1 && profile.null_percentage < 100.0 {
        score -= 10.0;
    }

    if let Some(outliers) = &profile.outliers {
        score -= (outliers.len() as f64).min(10.0);
    }

    score -= (profile.data_quality_issues.len() as f64 * 5.0).min(20.0);

    score.clamp(0.0, 100.0)
}

/// Builds the table-level quality block from the finished column profiles.
pub fn assess_table_quality(
    table_name: &str,
    columns: &[ColumnProfile],
    data_length: Option<u64>,
    index_length: Option<u64>,
) -> DataQuality {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let overall_score = if columns.is_empty() {
        100.0
    } else {
        columns.iter().map(score_column).sum::<f64>() / columns.len() as f64
    };

    for column in columns {
        if column.null_percentage > 50.0 {
            issues.push(format!(
                "Column '{}' is {:.1}% null",
                column.column_name, column.null_percentage
            ));
            recommendations.push(format!(
                "Review data collection for column '{}'",
                column.column_name
            ));
        }

        let status_like = STATUS_LIKE_NAMES
            .iter()
            .any(|name| column.column_name.to_lowercase().contains(name));
        if column.unique_percentage < 1.0 && column.unique_count > 1 && !status_like {
            recommendations.push(format!(
                "Column '{}' has very low cardinality; consider indexing or normalizing it",
                column.column_name
            ));
        }

        issues.extend(column.data_quality_issues.iter().cloned());
    }

    if overall_score < 70.0 {
        recommendations.push(format!(
            "Table '{}' scores {:.0}/100; schedule a data cleaning pass",
            table_name, overall_score
        ));
    }

    const LARGE_SEGMENT: u64 = 1 << 30;
    if data_length.unwrap_or(0) > LARGE_SEGMENT {
        recommendations.push(format!(
            "Table '{}' holds a large data segment; consider partitioning",
            table_name
        ));
    }
    if index_length.unwrap_or(0) > LARGE_SEGMENT {
        recommendations.push(format!(
            "Table '{}' carries a large index segment; prune unused indexes",
            table_name
        ));
    }

    DataQuality {
        overall_score,
        issues,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_column(name: &str) -> ColumnProfile {
        let mut profile = ColumnProfile::new(name, "integer");
        profile.unique_count = 50;
        profile.unique_percentage = 50.0;
        profile
    }

    #[test]
    fn test_clean_column_scores_full_marks() {
        let profile = clean_column("id");
        assert!((score_column(&profile) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_null_share_lowers_score() {
        let mut profile = clean_column("email");
        profile.null_percentage = 50.0;
        assert!((score_column(&profile) - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dominant_top_value_penalized() {
        let mut profile = clean_column("country");
        profile.top_values = Some(vec![TopValue {
            value: SqlValue::Text("US".into()),
            count: 950,
            percentage: 95.0,
        }]);
        assert!(score_column(&profile) <= 85.0);
    }

    #[test]
    fn test_constant_column_penalized() {
        let mut profile = clean_column("tenant");
        profile.unique_count = 1;
        assert!(score_column(&profile) <= 90.0);
    }

    #[test]
    fn test_score_never_leaves_bounds() {
        let mut profile = clean_column("junk");
        profile.null_percentage = 100.0;
        profile.data_quality_issues = vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()];
        profile.outliers = Some(vec![SqlValue::Int(1); 30]);
        let score = score_column(&profile);
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn test_table_quality_flags_high_null_columns() {
        let mut bad = clean_column("notes");
        bad.null_percentage = 80.0;
        let quality = assess_table_quality("orders", &[clean_column("id"), bad], None, None);

        assert!(quality.issues.iter().any(|issue| issue.contains("notes")));
        assert!(quality
            .recommendations
            .iter()
            .any(|rec| rec.contains("data collection")));
    }

    #[test]
    fn test_low_score_triggers_cleaning_recommendation() {
        let mut awful = clean_column("blob");
        awful.null_percentage = 100.0;
        awful.data_quality_issues = vec!["empty strings".into(); 4];
        let quality = assess_table_quality("legacy", &[awful], None, None);

        assert!(quality.overall_score < 70.0);
        assert!(quality
            .recommendations
            .iter()
            .any(|rec| rec.contains("cleaning pass")));
    }

    #[test]
    fn test_status_columns_skip_cardinality_hint() {
        let mut status = clean_column("order_status");
        status.unique_count = 3;
        status.unique_percentage = 0.1;
        let quality = assess_table_quality("orders", &[status], None, None);
        assert!(quality
            .recommendations
            .iter()
            .all(|rec| !rec.contains("cardinality")));
    }

    #[test]
    fn test_large_segments_recommend_partitioning() {
        let quality = assess_table_quality(
            "events",
            &[clean_column("id")],
            Some(2 << 30),
            Some(2 << 30),
        );
        assert!(quality.recommendations.iter().any(|rec| rec.contains("partitioning")));
        assert!(quality.recommendations.iter().any(|rec| rec.contains("indexes")));
    }

    #[test]
    fn test_sampling_full_under_threshold() {
        let options = ProfileOptions::default();
        let sampling = SamplingInfo::for_table(5_000, &options);
        assert_eq!(sampling.method, "full");
        assert_eq!(sampling.sample_size, 5_000);
        assert!((sampling.confidence - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sampling_random_above_threshold() {
        let options = ProfileOptions::default();
        let sampling = SamplingInfo::for_table(1_000_000, &options);
        assert_eq!(sampling.method, "random");
        assert_eq!(sampling.sample_size, options.sample_size);
        assert!((sampling.confidence - 1.0).abs() < f64::EPSILON);
        assert!(sampling.is_sampled());
    }

    #[test]
    fn test_sampling_confidence_capped_at_95() {
        let options = ProfileOptions {
            sample_size: 99_999,
            max_sample_rows: 50_000,
            ..Default::default()
        };
        let sampling = SamplingInfo::for_table(100_000, &options);
        assert!((sampling.confidence - 95.0).abs() < f64::EPSILON);
    }
}
