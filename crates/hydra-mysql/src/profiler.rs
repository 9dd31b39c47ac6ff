//! MySQL data profiling with SQL-side aggregation.
//!
//! Statistics run against either the full table or a `ORDER BY RAND()`
//! sample, per the shared sampling strategy. Numeric spread uses STDDEV and
//! VARIANCE; the median comes from an offset scan because mainline MySQL has
//! no `PERCENTILE_CONT`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row as SqlxRow;
use tracing::{debug, instrument};

use hydra_common::{BrokerError, Result};
use hydra_core::profile::{
    assess_table_quality, ColumnProfile, DataProfiler, PatternCounts, ProfileOptions,
    SamplingInfo, TableProfile, TableRelationships,
};
use hydra_core::value::SqlValue;

use crate::adapter::PoolHolder;
use crate::values::{decode_column, normalize_type, quote_identifier};

const EMAIL_REGEXP: &str = "^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\\\\.[A-Za-z]{2,}$";
const PHONE_REGEXP: &str = "^[+]?[0-9][0-9()\\\\. -]{6,}$";
const URL_REGEXP: &str = "^https?://";
const ISO_DATE_REGEXP: &str = "^[0-9]{4}-[0-9]{2}-[0-9]{2}";

const DISTRIBUTION_BUCKETS: u32 = 10;

/// One column as seen by the profiler before any statistics run.
#[derive(Debug, Clone)]
struct ProfiledColumn {
    name: String,
    /// Normalized category
    data_type: String,
    /// Engine column type text, e.g. `enum('a','b')`
    column_type: String,
}

impl ProfiledColumn {
    fn is_numeric(&self) -> bool {
        matches!(self.data_type.as_str(), "integer" | "float" | "decimal")
    }

    fn is_stringy(&self) -> bool {
        matches!(self.data_type.as_str(), "string" | "text")
    }
}

/// Extracts the member list of an `enum(...)` or `set(...)` column type.
pub(crate) fn parse_enum_values(column_type: &str) -> Option<Vec<String>> {
    let lower = column_type.to_lowercase();
    let body = lower
        .strip_prefix("enum(")
        .or_else(|| lower.strip_prefix("set("))?
        .strip_suffix(')')?;
    let values = body
        .split(',')
        .map(|member| member.trim().trim_matches('\'').to_string())
        .filter(|member| !member.is_empty())
        .collect::<Vec<_>>();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Human-readable label for one distribution bucket.
pub(crate) fn bucket_label(min: f64, step: f64, bucket: i64) -> String {
    let low = min + step * bucket as f64;
    let high = low + step;
    format!("{:.2}..{:.2}", low, high)
}

fn get_f64(row: &MySqlRow, name: &str) -> Option<f64> {
    if let Ok(Some(value)) = row.try_get::<Option<f64>, _>(name) {
        return Some(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<f32>, _>(name) {
        return Some(f64::from(value));
    }
    if let Ok(Some(value)) = row.try_get::<Option<Decimal>, _>(name) {
        return value.to_f64();
    }
    if let Ok(Some(value)) = row.try_get::<Option<i64>, _>(name) {
        return Some(value as f64);
    }
    if let Ok(Some(value)) = row.try_get::<Option<u64>, _>(name) {
        return Some(value as f64);
    }
    None
}

fn get_u64(row: &MySqlRow, name: &str) -> Option<u64> {
    get_f64(row, name).map(|value| value.max(0.0) as u64)
}

fn first_value(row: &MySqlRow) -> SqlValue {
    use sqlx::Column;
    row.columns()
        .first()
        .map(|column| decode_column(row, 0, sqlx::TypeInfo::name(column.type_info())))
        .unwrap_or(SqlValue::Null)
}

/// MySQL implementation of the profiling contract.
pub struct MySqlDataProfiler {
    pool: Arc<PoolHolder>,
}

impl MySqlDataProfiler {
    pub(crate) fn new(pool: Arc<PoolHolder>) -> Self {
        Self { pool }
    }

    async fn columns_of(&self, pool: &MySqlPool, table: &str) -> Result<Vec<ProfiledColumn>> {
        let sql = r"
            SELECT COLUMN_NAME AS column_name, DATA_TYPE AS data_type,
                   COLUMN_TYPE AS column_type
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION";
        let rows = sqlx::query(sql).bind(table).fetch_all(pool).await?;
        if rows.is_empty() {
            return Err(BrokerError::NotFound(format!(
                "Table '{}' not found",
                table
            )));
        }
        Ok(rows
            .iter()
            .map(|row| {
                let native: String = row
                    .try_get::<Option<String>, _>("data_type")
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                ProfiledColumn {
                    name: row
                        .try_get::<Option<String>, _>("column_name")
                        .ok()
                        .flatten()
                        .unwrap_or_default(),
                    data_type: normalize_type(&native).to_string(),
                    column_type: row
                        .try_get::<Option<String>, _>("column_type")
                        .ok()
                        .flatten()
                        .unwrap_or(native),
                }
            })
            .collect())
    }

    async fn total_rows(&self, pool: &MySqlPool, quoted: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quoted);
        let row = sqlx::query(&sql).fetch_one(pool).await?;
        Ok(get_u64(&row, "n").unwrap_or(0))
    }

    async fn estimated_size(&self, pool: &MySqlPool, table: &str) -> (u64, Option<u64>, Option<u64>) {
        let sql = r"
            SELECT DATA_LENGTH AS data_length, INDEX_LENGTH AS index_length
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?";
        match sqlx::query(sql).bind(table).fetch_optional(pool).await {
            Ok(Some(row)) => {
                let data = get_u64(&row, "data_length");
                let index = get_u64(&row, "index_length");
                (data.unwrap_or(0) + index.unwrap_or(0), data, index)
            }
            _ => (0, None, None),
        }
    }

    async fn relationships_of(
        &self,
        pool: &MySqlPool,
        table: &str,
    ) -> Result<TableRelationships> {
        let parents_sql = r"
            SELECT DISTINCT REFERENCED_TABLE_NAME AS t
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY t";
        let children_sql = r"
            SELECT DISTINCT TABLE_NAME AS t
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE() AND REFERENCED_TABLE_NAME = ?
            ORDER BY t";

        let parent_rows = sqlx::query(parents_sql).bind(table).fetch_all(pool).await?;
        let child_rows = sqlx::query(children_sql).bind(table).fetch_all(pool).await?;
        let collect = |rows: &[MySqlRow]| {
            rows.iter()
                .filter_map(|row| row.try_get::<Option<String>, _>("t").ok().flatten())
                .collect::<Vec<_>>()
        };
        Ok(TableRelationships {
            parent_tables: collect(&parent_rows),
            child_tables: collect(&child_rows),
        })
    }

    /// The FROM clause for statistics: the table itself, or a random sample
    /// subquery when the table is over the sampling threshold.
    fn source_clause(quoted: &str, sampling: &SamplingInfo) -> String {
        if sampling.is_sampled() {
            format!(
                "(SELECT * FROM {} ORDER BY RAND() LIMIT {}) AS sample_set",
                quoted, sampling.sample_size
            )
        } else {
            format!("{} AS sample_set", quoted)
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn profile_column(
        &self,
        pool: &MySqlPool,
        source: &str,
        column: &ProfiledColumn,
        options: &ProfileOptions,
    ) -> Result<ColumnProfile> {
        let quoted = quote_identifier(&column.name)?;
        let mut profile = ColumnProfile::new(&column.name, &column.data_type);

        let base_sql = format!(
            "SELECT COUNT(*) AS total, \
             SUM(CASE WHEN {c} IS NULL THEN 1 ELSE 0 END) AS nulls, \
             COUNT(DISTINCT {c}) AS uniq \
             FROM {source}",
            c = quoted,
            source = source
        );
        let base = sqlx::query(&base_sql).fetch_one(pool).await?;
        let total = get_u64(&base, "total").unwrap_or(0);
        profile.null_count = get_u64(&base, "nulls").unwrap_or(0);
        profile.unique_count = get_u64(&base, "uniq").unwrap_or(0);
        if total > 0 {
            profile.null_percentage = profile.null_count as f64 / total as f64 * 100.0;
            profile.unique_percentage = profile.unique_count as f64 / total as f64 * 100.0;
        }
        let non_null = total.saturating_sub(profile.null_count);

        if column.is_numeric() && non_null > 0 {
            let numeric_sql = format!(
                "SELECT MIN({c}) AS min_v, MAX({c}) AS max_v, AVG({c}) AS avg_v, \
                 STDDEV({c}) AS stddev_v, VARIANCE({c}) AS variance_v \
                 FROM {source}",
                c = quoted,
                source = source
            );
            let numeric = sqlx::query(&numeric_sql).fetch_one(pool).await?;
            profile.min_value = get_f64(&numeric, "min_v").map(SqlValue::Float);
            profile.max_value = get_f64(&numeric, "max_v").map(SqlValue::Float);
            profile.avg_value = get_f64(&numeric, "avg_v");
            profile.stddev = get_f64(&numeric, "stddev_v");
            profile.variance = get_f64(&numeric, "variance_v");

            profile.median_value = self
                .median_by_offset(pool, source, &quoted, non_null)
                .await?;

            if !options.shallow {
                if let (Some(min), Some(max)) = (
                    profile.min_value.as_ref().and_then(SqlValue::as_f64),
                    profile.max_value.as_ref().and_then(SqlValue::as_f64),
                ) {
                    if max > min {
                        profile.distribution = Some(
                            self.distribution(pool, source, &quoted, min, max).await?,
                        );
                    }
                }

                if let (Some(mean), Some(stddev)) = (profile.avg_value, profile.stddev) {
                    if stddev > 0.0 {
                        profile.outliers =
                            Some(self.outliers(pool, source, &quoted, mean, stddev).await?);
                    }
                }
            }
        }

        if !options.shallow {
            let top = self
                .top_values(pool, source, &quoted, options.top_k, total)
                .await?;
            profile.mode = top.first().map(|tv| tv.value.clone());
            if !top.is_empty() {
                profile.top_values = Some(top);
            }
        }

        if column.is_stringy() {
            if options.include_patterns && !options.shallow && non_null > 0 {
                profile.patterns = Some(self.patterns(pool, source, &quoted).await?);
            }
            if non_null > 0 {
                self.string_quality(pool, source, &quoted, non_null, &mut profile)
                    .await?;
            }
        }

        if let Some(values) = parse_enum_values(&column.column_type) {
            profile.adapter_specific = Some(json!({
                "column_type": column.column_type,
                "enum_values": values,
            }));
        }

        Ok(profile)
    }

    /// Median via offset scan.
    ///
    /// Over a random sample this approximates the sample median, not the
    /// population median; the profile's sampling confidence reflects that.
    async fn median_by_offset(
        &self,
        pool: &MySqlPool,
        source: &str,
        quoted: &str,
        non_null: u64,
    ) -> Result<Option<f64>> {
        if non_null == 0 {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {c} AS v FROM {source} WHERE {c} IS NOT NULL \
             ORDER BY {c} LIMIT 1 OFFSET {offset}",
            c = quoted,
            source = source,
            offset = non_null / 2
        );
        let row = sqlx::query(&sql).fetch_optional(pool).await?;
        Ok(row.as_ref().and_then(|r| get_f64(r, "v")))
    }

    async fn top_values(
        &self,
        pool: &MySqlPool,
        source: &str,
        quoted: &str,
        top_k: usize,
        total: u64,
    ) -> Result<Vec<hydra_core::profile::TopValue>> {
        let sql = format!(
            "SELECT {c} AS v, COUNT(*) AS cnt FROM {source} \
             WHERE {c} IS NOT NULL GROUP BY {c} ORDER BY cnt DESC LIMIT {k}",
            c = quoted,
            source = source,
            k = top_k
        );
        let rows = sqlx::query(&sql).fetch_all(pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let count = get_u64(row, "cnt").unwrap_or(0);
                hydra_core::profile::TopValue {
                    value: first_value(row),
                    count,
                    percentage: if total > 0 {
                        count as f64 / total as f64 * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect())
    }

    async fn distribution(
        &self,
        pool: &MySqlPool,
        source: &str,
        quoted: &str,
        min: f64,
        max: f64,
    ) -> Result<BTreeMap<String, u64>> {
        let step = (max - min) / f64::from(DISTRIBUTION_BUCKETS);
        let sql = format!(
            "SELECT LEAST(FLOOR(({c} - {min}) / {step}), {last}) AS bucket, COUNT(*) AS cnt \
             FROM {source} WHERE {c} IS NOT NULL GROUP BY bucket ORDER BY bucket",
            c = quoted,
            source = source,
            min = min,
            step = step,
            last = DISTRIBUTION_BUCKETS - 1
        );
        let rows = sqlx::query(&sql).fetch_all(pool).await?;
        let mut distribution = BTreeMap::new();
        for row in &rows {
            let bucket = get_f64(row, "bucket").unwrap_or(0.0) as i64;
            let count = get_u64(row, "cnt").unwrap_or(0);
            distribution.insert(bucket_label(min, step, bucket), count);
        }
        Ok(distribution)
    }

    async fn outliers(
        &self,
        pool: &MySqlPool,
        source: &str,
        quoted: &str,
        mean: f64,
        stddev: f64,
    ) -> Result<Vec<SqlValue>> {
        let low = mean - 3.0 * stddev;
        let high = mean + 3.0 * stddev;
        let sql = format!(
            "SELECT {c} AS v FROM {source} \
             WHERE {c} IS NOT NULL AND ({c} < {low} OR {c} > {high}) LIMIT 10",
            c = quoted,
            source = source,
            low = low,
            high = high
        );
        let rows = sqlx::query(&sql).fetch_all(pool).await?;
        Ok(rows
            .iter()
            .filter_map(|row| get_f64(row, "v").map(SqlValue::Float))
            .collect())
    }

    async fn patterns(
        &self,
        pool: &MySqlPool,
        source: &str,
        quoted: &str,
    ) -> Result<PatternCounts> {
        let sql = format!(
            "SELECT \
             SUM(CASE WHEN {c} REGEXP '{email}' THEN 1 ELSE 0 END) AS email, \
             SUM(CASE WHEN {c} REGEXP '{phone}' THEN 1 ELSE 0 END) AS phone, \
             SUM(CASE WHEN {c} REGEXP '{url}' THEN 1 ELSE 0 END) AS url, \
             SUM(CASE WHEN {c} REGEXP '{iso}' THEN 1 ELSE 0 END) AS iso_date \
             FROM {source} WHERE {c} IS NOT NULL",
            c = quoted,
            source = source,
            email = EMAIL_REGEXP,
            phone = PHONE_REGEXP,
            url = URL_REGEXP,
            iso = ISO_DATE_REGEXP
        );
        let row = sqlx::query(&sql).fetch_one(pool).await?;
        Ok(PatternCounts {
            email: get_u64(&row, "email").unwrap_or(0),
            phone: get_u64(&row, "phone").unwrap_or(0),
            url: get_u64(&row, "url").unwrap_or(0),
            iso_date: get_u64(&row, "iso_date").unwrap_or(0),
        })
    }

    async fn string_quality(
        &self,
        pool: &MySqlPool,
        source: &str,
        quoted: &str,
        non_null: u64,
        profile: &mut ColumnProfile,
    ) -> Result<()> {
        let sql = format!(
            "SELECT \
             SUM(CASE WHEN {c} = '' THEN 1 ELSE 0 END) AS empties, \
             SUM(CASE WHEN {c} <> TRIM({c}) THEN 1 ELSE 0 END) AS padded \
             FROM {source} WHERE {c} IS NOT NULL",
            c = quoted,
            source = source
        );
        let row = sqlx::query(&sql).fetch_one(pool).await?;
        let empties = get_u64(&row, "empties").unwrap_or(0);
        let padded = get_u64(&row, "padded").unwrap_or(0);

        if empties > 0 {
            profile.data_quality_issues.push(format!(
                "{} of {} values are empty strings",
                empties, non_null
            ));
        }
        if padded > 0 {
            profile.data_quality_issues.push(format!(
                "{} values carry leading or trailing whitespace",
                padded
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DataProfiler for MySqlDataProfiler {
    #[instrument(skip(self, options), fields(table = %table))]
    async fn profile_table(&self, table: &str, options: &ProfileOptions) -> Result<TableProfile> {
        let pool = self.pool.get()?;
        let quoted = quote_identifier(table)?;

        let columns = self.columns_of(&pool, table).await?;
        let total_rows = self.total_rows(&pool, &quoted).await?;
        let sampling = SamplingInfo::for_table(total_rows, options);
        let source = Self::source_clause(&quoted, &sampling);
        debug!(total_rows, method = sampling.method, "Profiling table");

        let mut profiles = Vec::with_capacity(columns.len());
        for column in &columns {
            profiles.push(self.profile_column(&pool, &source, column, options).await?);
        }

        let (estimated_size_bytes, data_length, index_length) =
            self.estimated_size(&pool, table).await;
        let relationships = self.relationships_of(&pool, table).await?;
        let data_quality = assess_table_quality(table, &profiles, data_length, index_length);

        Ok(TableProfile {
            table_name: table.to_string(),
            total_rows,
            total_columns: profiles.len(),
            estimated_size_bytes,
            columns: profiles,
            data_quality,
            relationships,
            sampling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enum_values() {
        assert_eq!(
            parse_enum_values("enum('small','medium','large')").unwrap(),
            vec!["small", "medium", "large"]
        );
        assert_eq!(
            parse_enum_values("set('a','b')").unwrap(),
            vec!["a", "b"]
        );
        assert!(parse_enum_values("varchar(255)").is_none());
        assert!(parse_enum_values("enum()").is_none());
    }

    #[test]
    fn test_bucket_label_ranges() {
        assert_eq!(bucket_label(0.0, 10.0, 0), "0.00..10.00");
        assert_eq!(bucket_label(0.0, 10.0, 9), "90.00..100.00");
        assert_eq!(bucket_label(-50.0, 5.0, 2), "-40.00..-35.00");
    }

    #[test]
    fn test_source_clause_full_scan() {
        let options = ProfileOptions::default();
        let sampling = SamplingInfo::for_table(100, &options);
        assert_eq!(
            MySqlDataProfiler::source_clause("`users`", &sampling),
            "`users` AS sample_set"
        );
    }

    #[test]
    fn test_source_clause_sampled() {
        let options = ProfileOptions::default();
        let sampling = SamplingInfo::for_table(1_000_000, &options);
        let clause = MySqlDataProfiler::source_clause("`events`", &sampling);
        assert!(clause.contains("ORDER BY RAND()"));
        assert!(clause.contains("LIMIT 10000"));
    }

    #[test]
    fn test_profiled_column_kind_checks() {
        let numeric = ProfiledColumn {
            name: "n".into(),
            data_type: "integer".into(),
            column_type: "int".into(),
        };
        assert!(numeric.is_numeric());
        assert!(!numeric.is_stringy());

        let stringy = ProfiledColumn {
            name: "s".into(),
            data_type: "text".into(),
            column_type: "text".into(),
        };
        assert!(stringy.is_stringy());
    }
}
