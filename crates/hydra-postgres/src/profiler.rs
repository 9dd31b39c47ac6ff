//! PostgreSQL data profiling with SQL-side aggregation.
//!
//! The median comes from `PERCENTILE_CONT(0.5) WITHIN GROUP`, sampling uses
//! `ORDER BY RANDOM()`, and string pattern classes are counted with the `~*`
//! operator. Outliers are values beyond mean +/- 3 stddev, capped at 10.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row as SqlxRow;
use tracing::{debug, instrument};

use hydra_common::{BrokerError, Result};
use hydra_core::profile::{
    assess_table_quality, ColumnProfile, DataProfiler, PatternCounts, ProfileOptions,
    SamplingInfo, TableProfile, TableRelationships, TopValue,
};
use hydra_core::value::SqlValue;

use crate::adapter::PoolHolder;
use crate::values::{decode_column, normalize_type, quote_identifier};

const EMAIL_PATTERN: &str = "^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\\.[A-Za-z]{2,}$";
const PHONE_PATTERN: &str = "^[+]?[0-9][0-9(). -]{6,}$";
const URL_PATTERN: &str = "^https?://";
const ISO_DATE_PATTERN: &str = "^[0-9]{4}-[0-9]{2}-[0-9]{2}";

const DISTRIBUTION_BUCKETS: u32 = 10;
const OUTLIER_CAP: u32 = 10;

#[derive(Debug, Clone)]
struct ProfiledColumn {
    name: String,
    data_type: String,
}

impl ProfiledColumn {
    fn is_numeric(&self) -> bool {
        matches!(self.data_type.as_str(), "integer" | "float" | "decimal")
    }

    fn is_stringy(&self) -> bool {
        matches!(self.data_type.as_str(), "string" | "text")
    }
}

pub(crate) fn bucket_label(min: f64, step: f64, bucket: i64) -> String {
    let low = min + step * bucket as f64;
    let high = low + step;
    format!("{:.2}..{:.2}", low, high)
}

fn get_f64(row: &PgRow, name: &str) -> Option<f64> {
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
    if let Ok(Some(value)) = row.try_get::<Option<i32>, _>(name) {
        return Some(f64::from(value));
    }
    None
}

fn get_u64(row: &PgRow, name: &str) -> Option<u64> {
    get_f64(row, name).map(|value| value.max(0.0) as u64)
}

fn first_value(row: &PgRow) -> SqlValue {
    use sqlx::Column;
    row.columns()
        .first()
        .map(|column| decode_column(row, 0, sqlx::TypeInfo::name(column.type_info())))
        .unwrap_or(SqlValue::Null)
}

/// PostgreSQL implementation of the profiling contract.
pub struct PgDataProfiler {
    pool: Arc<PoolHolder>,
    schema: String,
}

impl PgDataProfiler {
    pub(crate) fn new(pool: Arc<PoolHolder>) -> Self {
        Self {
            pool,
            schema: "public".to_string(),
        }
    }

    async fn columns_of(&self, pool: &PgPool, table: &str) -> Result<Vec<ProfiledColumn>> {
        let sql = r"
            SELECT column_name, data_type
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position";
        let rows = sqlx::query(sql)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(pool)
            .await?;
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
                }
            })
            .collect())
    }

    async fn total_rows(&self, pool: &PgPool, quoted: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quoted);
        let row = sqlx::query(&sql).fetch_one(pool).await?;
        Ok(get_u64(&row, "n").unwrap_or(0))
    }

    async fn estimated_size(&self, pool: &PgPool, table: &str) -> u64 {
        let sql = r"
            SELECT pg_total_relation_size(s.relid) AS total_size
            FROM pg_stat_user_tables s
            WHERE s.schemaname = $1 AND s.relname = $2";
        match sqlx::query(sql)
            .bind(&self.schema)
            .bind(table)
            .fetch_optional(pool)
            .await
        {
            Ok(Some(row)) => get_u64(&row, "total_size").unwrap_or(0),
            _ => 0,
        }
    }

    async fn relationships_of(&self, pool: &PgPool, table: &str) -> Result<TableRelationships> {
        let parents_sql = r"
            SELECT DISTINCT ft.relname AS t
            FROM pg_constraint con
            JOIN pg_class c ON c.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_class ft ON ft.oid = con.confrelid
            WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2
            ORDER BY t";
        let children_sql = r"
            SELECT DISTINCT c.relname AS t
            FROM pg_constraint con
            JOIN pg_class c ON c.oid = con.conrelid
            JOIN pg_class ft ON ft.oid = con.confrelid
            JOIN pg_namespace fn ON fn.oid = ft.relnamespace
            WHERE con.contype = 'f' AND fn.nspname = $1 AND ft.relname = $2
            ORDER BY t";

        let collect = |rows: Vec<PgRow>| {
            rows.iter()
                .filter_map(|row| row.try_get::<Option<String>, _>("t").ok().flatten())
                .collect::<Vec<_>>()
        };
        let parents = sqlx::query(parents_sql)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(pool)
            .await?;
        let children = sqlx::query(children_sql)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(pool)
            .await?;
        Ok(TableRelationships {
            parent_tables: collect(parents),
            child_tables: collect(children),
        })
    }

    fn source_clause(quoted: &str, sampling: &SamplingInfo) -> String {
        if sampling.is_sampled() {
            format!(
                "(SELECT * FROM {} ORDER BY RANDOM() LIMIT {}) AS sample_set",
                quoted, sampling.sample_size
            )
        } else {
            format!("{} AS sample_set", quoted)
        }
    }

    async fn profile_column(
        &self,
        pool: &PgPool,
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
                "SELECT MIN({c}) AS min_v, MAX({c}) AS max_v, \
                 AVG({c}::double precision) AS avg_v, \
                 STDDEV({c}::double precision) AS stddev_v, \
                 VARIANCE({c}::double precision) AS variance_v, \
                 PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY {c}::double precision) AS median_v \
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
            profile.median_value = get_f64(&numeric, "median_v");

            if !options.shallow {
                if let (Some(min), Some(max)) = (
                    profile.min_value.as_ref().and_then(SqlValue::as_f64),
                    profile.max_value.as_ref().and_then(SqlValue::as_f64),
                ) {
                    if max > min {
                        profile.distribution =
                            Some(self.distribution(pool, source, &quoted, min, max).await?);
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

        Ok(profile)
    }

    async fn top_values(
        &self,
        pool: &PgPool,
        source: &str,
        quoted: &str,
        top_k: usize,
        total: u64,
    ) -> Result<Vec<TopValue>> {
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
                TopValue {
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
        pool: &PgPool,
        source: &str,
        quoted: &str,
        min: f64,
        max: f64,
    ) -> Result<BTreeMap<String, u64>> {
        let step = (max - min) / f64::from(DISTRIBUTION_BUCKETS);
        let sql = format!(
            "SELECT LEAST(FLOOR(({c}::double precision - {min}) / {step}), {last})::bigint \
             AS bucket, COUNT(*) AS cnt \
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
        pool: &PgPool,
        source: &str,
        quoted: &str,
        mean: f64,
        stddev: f64,
    ) -> Result<Vec<SqlValue>> {
        let low = mean - 3.0 * stddev;
        let high = mean + 3.0 * stddev;
        let sql = format!(
            "SELECT {c} AS v FROM {source} \
             WHERE {c} IS NOT NULL \
               AND ({c}::double precision < {low} OR {c}::double precision > {high}) \
             LIMIT {cap}",
            c = quoted,
            source = source,
            low = low,
            high = high,
            cap = OUTLIER_CAP
        );
        let rows = sqlx::query(&sql).fetch_all(pool).await?;
        Ok(rows
            .iter()
            .filter_map(|row| get_f64(row, "v").map(SqlValue::Float))
            .collect())
    }

    async fn patterns(&self, pool: &PgPool, source: &str, quoted: &str) -> Result<PatternCounts> {
        let sql = format!(
            "SELECT \
             SUM(CASE WHEN {c} ~* '{email}' THEN 1 ELSE 0 END) AS email, \
             SUM(CASE WHEN {c} ~* '{phone}' THEN 1 ELSE 0 END) AS phone, \
             SUM(CASE WHEN {c} ~* '{url}' THEN 1 ELSE 0 END) AS url, \
             SUM(CASE WHEN {c} ~* '{iso}' THEN 1 ELSE 0 END) AS iso_date \
             FROM {source} WHERE {c} IS NOT NULL",
            c = quoted,
            source = source,
            email = EMAIL_PATTERN,
            phone = PHONE_PATTERN,
            url = URL_PATTERN,
            iso = ISO_DATE_PATTERN
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
        pool: &PgPool,
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
impl DataProfiler for PgDataProfiler {
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

        let estimated_size_bytes = self.estimated_size(&pool, table).await;
        let relationships = self.relationships_of(&pool, table).await?;
        let data_quality = assess_table_quality(table, &profiles, Some(estimated_size_bytes), None);

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
    fn test_bucket_label() {
        assert_eq!(bucket_label(0.0, 2.5, 0), "0.00..2.50");
        assert_eq!(bucket_label(10.0, 1.0, 3), "13.00..14.00");
    }

    #[test]
    fn test_source_clause_variants() {
        let options = ProfileOptions::default();
        let full = SamplingInfo::for_table(10, &options);
        assert_eq!(
            PgDataProfiler::source_clause("\"users\"", &full),
            "\"users\" AS sample_set"
        );

        let sampled = SamplingInfo::for_table(10_000_000, &options);
        let clause = PgDataProfiler::source_clause("\"events\"", &sampled);
        assert!(clause.contains("ORDER BY RANDOM()"));
    }

    #[test]
    fn test_numeric_detection() {
        let column = ProfiledColumn {
            name: "amount".into(),
            data_type: "decimal".into(),
        };
        assert!(column.is_numeric());
        assert!(!column.is_stringy());
    }
}
