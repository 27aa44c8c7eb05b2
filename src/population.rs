// 👥 Population Filter - model/scenario selection, wide → long reshape
// Plus the optional interpolation step over a fixed year range
//
// Input rows look like: MODEL, SCENARIO, REGION, ..., 2010, 2015, 2020, ...
// Output is one value per (entity, year).

use crate::config::{InterpolationConfig, PopulationConfig};
use crate::error::{FusionError, Result, Stage};
use crate::table::{canonical_entity, EntityYearKey, Table, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// ============================================================================
// POPULATION SERIES
// ============================================================================

/// Population per (entity, year), at most one value per key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationSeries {
    values: BTreeMap<EntityYearKey, f64>,
}

impl PopulationSeries {
    pub fn new() -> Self {
        PopulationSeries::default()
    }

    /// Insert, refusing a second value for the same key
    pub fn insert_unique(
        &mut self,
        key: EntityYearKey,
        value: f64,
        stage: Stage,
        table: &str,
    ) -> Result<()> {
        if self.values.contains_key(&key) {
            return Err(FusionError::duplicate(stage, table, key));
        }
        self.values.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &EntityYearKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityYearKey> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityYearKey, f64)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Observed (year, value) points per entity, years ascending
    fn by_entity(&self) -> BTreeMap<&str, Vec<(i32, f64)>> {
        let mut grouped: BTreeMap<&str, Vec<(i32, f64)>> = BTreeMap::new();
        for (key, value) in &self.values {
            grouped
                .entry(key.entity.as_str())
                .or_default()
                .push((key.year, *value));
        }
        grouped
    }
}

// ============================================================================
// POPULATION FILTER
// ============================================================================

pub struct PopulationFilter {
    pub model: String,
    pub scenario: String,
    pub model_column: String,
    pub scenario_column: String,
    pub entity_column: String,
}

impl PopulationFilter {
    /// Filter on the given selection using the standard column names
    pub fn new(model: &str, scenario: &str) -> Self {
        let defaults = PopulationConfig::default();
        PopulationFilter {
            model: model.to_string(),
            scenario: scenario.to_string(),
            model_column: defaults.model_column,
            scenario_column: defaults.scenario_column,
            entity_column: defaults.entity_column,
        }
    }

    pub fn from_config(config: &PopulationConfig) -> Self {
        PopulationFilter {
            model: config.model.clone(),
            scenario: config.scenario.clone(),
            model_column: config.model_column.clone(),
            scenario_column: config.scenario_column.clone(),
            entity_column: config.entity_column.clone(),
        }
    }

    /// Builder pattern: override the identifier column names
    pub fn with_columns(mut self, model: &str, scenario: &str, entity: &str) -> Self {
        self.model_column = model.to_string();
        self.scenario_column = scenario.to_string();
        self.entity_column = entity.to_string();
        self
    }

    /// Select matching rows and melt the year columns.
    ///
    /// An empty selection is a valid (empty) result, not an error.
    pub fn apply(&self, table: &Table) -> Result<PopulationSeries> {
        let stage = Stage::Filter;
        let model_idx = table.require_column(stage, &self.model_column)?;
        let scenario_idx = table.require_column(stage, &self.scenario_column)?;
        let entity_idx = table.require_column(stage, &self.entity_column)?;

        let year_columns: Vec<(usize, i32)> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| ![model_idx, scenario_idx, entity_idx].contains(idx))
            .filter_map(|(idx, name)| name.trim().parse::<i32>().ok().map(|year| (idx, year)))
            .collect();

        if year_columns.is_empty() {
            return Err(FusionError::schema(stage, &table.name, "<year columns>"));
        }

        let mut series = PopulationSeries::new();
        let mut matched = 0usize;

        for (row_idx, row) in table.rows.iter().enumerate() {
            if !cell_equals(&row[model_idx], &self.model)
                || !cell_equals(&row[scenario_idx], &self.scenario)
            {
                continue;
            }
            matched += 1;
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

            for (col_idx, year) in &year_columns {
                let cell = &row[*col_idx];
                if cell.is_missing() {
                    continue;
                }
                let value = cell.as_number().ok_or_else(|| {
                    FusionError::invalid(
                        stage,
                        row_number,
                        &table.columns[*col_idx],
                        cell.to_string(),
                        "population must be numeric",
                    )
                })?;
                if value < 0.0 {
                    return Err(FusionError::invalid(
                        stage,
                        row_number,
                        &table.columns[*col_idx],
                        cell.to_string(),
                        "population must be non-negative",
                    ));
                }
                series.insert_unique(
                    EntityYearKey {
                        entity: entity.clone(),
                        year: *year,
                    },
                    value,
                    stage,
                    &table.name,
                )?;
            }
        }

        if matched == 0 {
            warn!(
                model = %self.model,
                scenario = %self.scenario,
                rows = table.len(),
                "population filter matched no rows; population column will be missing"
            );
        } else {
            info!(
                model = %self.model,
                scenario = %self.scenario,
                matched,
                points = series.len(),
                year_columns = year_columns.len(),
                "filtered population"
            );
        }

        Ok(series)
    }
}

/// Exact, case-sensitive match of a selector cell. Selector columns are
/// loaded as verbatim text; a typed cell never matches.
fn cell_equals(cell: &Value, target: &str) -> bool {
    matches!(cell, Value::Text(s) if s == target)
}

// ============================================================================
// POPULATION INTERPOLATOR
// ============================================================================

/// Linear interpolation of each entity's series onto every year of a range.
/// Years outside the observed span take the nearest observed value.
pub struct PopulationInterpolator {
    pub first_year: i32,
    pub last_year: i32,
}

impl PopulationInterpolator {
    pub fn new(first_year: i32, last_year: i32) -> Self {
        PopulationInterpolator {
            first_year,
            last_year,
        }
    }

    pub fn from_config(config: &InterpolationConfig) -> Self {
        PopulationInterpolator::new(config.first_year, config.last_year)
    }

    pub fn apply(&self, series: &PopulationSeries) -> PopulationSeries {
        let mut out = PopulationSeries::new();
        let grouped = series.by_entity();

        for (entity, points) in &grouped {
            for year in self.first_year..=self.last_year {
                let key = EntityYearKey::new(entity, year);
                out.values.insert(key, interpolate(points, year));
            }
        }

        debug!(
            entities = grouped.len(),
            first_year = self.first_year,
            last_year = self.last_year,
            "interpolated population"
        );
        out
    }
}

/// `points` must be non-empty with strictly increasing years
fn interpolate(points: &[(i32, f64)], year: i32) -> f64 {
    let (first_year, first_value) = points[0];
    let (last_year, last_value) = points[points.len() - 1];
    if year <= first_year {
        return first_value;
    }
    if year >= last_year {
        return last_value;
    }

    // first index with x > year; its predecessor starts the segment
    let upper = points.partition_point(|(x, _)| *x <= year);
    let (x0, y0) = points[upper - 1];
    let (x1, y1) = points[upper];
    y0 + (y1 - y0) * f64::from(year - x0) / f64::from(x1 - x0)
}
