// 💲 Price Normalizer - panel rows into one cleaned row per (entity, year)
// Sentinels become None, duplicate keys are fatal, entities are canonical

use crate::config::{PriceConfig, PriceSeriesConfig};
use crate::error::{FusionError, Result, Stage};
use crate::stata::STATA_FLOAT_MISSING;
use crate::table::{canonical_entity, EntityYearKey, Table, Value};
use std::collections::BTreeMap;
use tracing::info;

// ============================================================================
// SENTINEL POLICY
// ============================================================================

/// Which numbers mean "no data" rather than an observation
#[derive(Debug, Clone, PartialEq)]
pub struct SentinelPolicy {
    /// Prices cannot be negative; negative placeholders are missing
    pub reject_negative: bool,
    /// Source-specific magic numbers
    pub codes: Vec<f64>,
}

impl SentinelPolicy {
    pub fn new() -> Self {
        SentinelPolicy {
            reject_negative: true,
            codes: Vec::new(),
        }
    }

    pub fn is_sentinel(&self, value: f64) -> bool {
        !value.is_finite()
            || (self.reject_negative && value < 0.0)
            || self.codes.iter().any(|code| *code == value)
            // Stata missing codes that survived an export as plain numbers
            || value.abs() >= f64::from(STATA_FLOAT_MISSING)
    }
}

impl Default for SentinelPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PRICE SERIES
// ============================================================================

/// Cleaned prices: one row per key, one optional value per output column
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    pub columns: Vec<String>,
    rows: BTreeMap<EntityYearKey, Vec<Option<f64>>>,
}

impl PriceSeries {
    pub fn new(columns: Vec<String>) -> Self {
        PriceSeries {
            columns,
            rows: BTreeMap::new(),
        }
    }

    /// Insert, refusing a second row for the same key
    pub fn insert_unique(
        &mut self,
        key: EntityYearKey,
        values: Vec<Option<f64>>,
        stage: Stage,
        table: &str,
    ) -> Result<()> {
        if self.rows.contains_key(&key) {
            return Err(FusionError::duplicate(stage, table, key));
        }
        self.rows.insert(key, values);
        Ok(())
    }

    pub fn get(&self, key: &EntityYearKey) -> Option<&[Option<f64>]> {
        self.rows.get(key).map(|v| v.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityYearKey> {
        self.rows.keys()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// PRICE NORMALIZER
// ============================================================================

pub struct PriceNormalizer {
    pub entity_column: String,
    pub year_column: String,
    pub series: Vec<PriceSeriesConfig>,
    pub sentinels: SentinelPolicy,
}

impl PriceNormalizer {
    /// Normalizer with the default column layout (`country`, `year`, `price`)
    pub fn new() -> Self {
        PriceNormalizer::from_config(&PriceConfig::default())
    }

    pub fn from_config(config: &PriceConfig) -> Self {
        PriceNormalizer {
            entity_column: config.entity_column.clone(),
            year_column: config.year_column.clone(),
            series: config.series.clone(),
            sentinels: SentinelPolicy {
                reject_negative: config.reject_negative,
                codes: config.sentinels.clone(),
            },
        }
    }

    /// Builder pattern: override the key columns
    pub fn with_key_columns(mut self, entity: &str, year: &str) -> Self {
        self.entity_column = entity.to_string();
        self.year_column = year.to_string();
        self
    }

    /// Builder pattern: map a single source price column to an output column
    pub fn with_series(mut self, source: &str, output: &str) -> Self {
        self.series = vec![PriceSeriesConfig {
            source: source.to_string(),
            output: output.to_string(),
        }];
        self
    }

    /// Builder pattern: add source magic numbers
    pub fn with_sentinels(mut self, codes: &[f64]) -> Self {
        self.sentinels.codes.extend_from_slice(codes);
        self
    }

    pub fn normalize(&self, table: &Table) -> Result<PriceSeries> {
        let stage = Stage::Normalize;
        let entity_idx = table.require_column(stage, &self.entity_column)?;
        let year_idx = table.require_column(stage, &self.year_column)?;
        let series_idx = self
            .series
            .iter()
            .map(|s| table.require_column(stage, &s.source))
            .collect::<Result<Vec<usize>>>()?;

        let mut out = PriceSeries::new(self.series.iter().map(|s| s.output.clone()).collect());
        let mut sentinel_count = 0usize;

        for (row_idx, row) in table.rows.iter().enumerate() {
            let row_number = row_idx + 1;

            let entity = match &row[entity_idx] {
                Value::Text(s) if !s.trim().is_empty() => canonical_entity(s),
                other => {
                    return Err(FusionError::invalid(
                        stage,
                        row_number,
                        &self.entity_column,
                        other.to_string(),
                        "entity identifier must be non-empty text",
                    ))
                }
            };

            let year = row[year_idx].as_year().ok_or_else(|| {
                FusionError::invalid(
                    stage,
                    row_number,
                    &self.year_column,
                    row[year_idx].to_string(),
                    "year must be an integer",
                )
            })?;

            let mut values = Vec::with_capacity(series_idx.len());
            for (series, idx) in self.series.iter().zip(&series_idx) {
                let cell = &row[*idx];
                let value = match cell {
                    Value::Missing => None,
                    _ => {
                        // non-finite text is read too, so the sentinel policy sees it
                        let number = cell.as_float().ok_or_else(|| {
                            FusionError::invalid(
                                stage,
                                row_number,
                                &series.source,
                                cell.to_string(),
                                "price must be numeric",
                            )
                        })?;
                        if self.sentinels.is_sentinel(number) {
                            sentinel_count += 1;
                            None
                        } else {
                            Some(number)
                        }
                    }
                };
                values.push(value);
            }

            out.insert_unique(EntityYearKey { entity, year }, values, stage, &table.name)?;
        }

        info!(
            rows = table.len(),
            keys = out.len(),
            series = out.columns.len(),
            sentinels = sentinel_count,
            "normalized prices"
        );

        Ok(out)
    }
}

impl Default for PriceNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
