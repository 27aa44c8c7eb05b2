// ⚖️ Comparator - certify a generated table against a reference
//
// 1. Structure first: same column set, same row count, same key set
// 2. Rows aligned by (entity, year), never by position
// 3. Numbers equal within tolerance, text exactly, missing only with missing
// Every differing cell is reported, not just the first.

use crate::config::CompareConfig;
use crate::error::{FusionError, Result, Stage, StructuralDifference};
use crate::table::{canonical_entity, EntityYearKey, Table, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

// ============================================================================
// TOLERANCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub absolute: f64,
    pub relative: f64,
}

impl Tolerance {
    pub fn new(absolute: f64, relative: f64) -> Self {
        Tolerance { absolute, relative }
    }

    pub fn from_config(config: &CompareConfig) -> Self {
        Tolerance::new(config.absolute_tolerance, config.relative_tolerance)
    }

    /// |a - b| <= abs + rel * max(|a|, |b|); symmetric in a and b
    pub fn numbers_match(&self, a: f64, b: f64) -> bool {
        if a == b {
            return true;
        }
        let scale = a.abs().max(b.abs());
        (a - b).abs() <= self.absolute + self.relative * scale
    }

    pub fn values_match(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Missing, Value::Missing) => true,
            (Value::Number(x), Value::Number(y)) => self.numbers_match(*x, *y),
            (Value::Text(x), Value::Text(y)) => x == y,
            _ => false,
        }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::from_config(&CompareConfig::default())
    }
}

// ============================================================================
// COMPARISON RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDifference {
    pub key: EntityYearKey,
    pub column: String,
    /// Reference value
    pub expected: Value,
    /// Generated value
    pub actual: Value,
}

impl std::fmt::Display for CellDifference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: expected {}, actual {}",
            self.key, self.column, self.expected, self.actual
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "differences")]
pub enum ComparisonResult {
    Identical,
    Differing(Vec<CellDifference>),
}

impl ComparisonResult {
    pub fn is_identical(&self) -> bool {
        matches!(self, ComparisonResult::Identical)
    }

    pub fn differences(&self) -> &[CellDifference] {
        match self {
            ComparisonResult::Identical => &[],
            ComparisonResult::Differing(diffs) => diffs,
        }
    }
}

// ============================================================================
// COMPARATOR
// ============================================================================

pub struct Comparator {
    pub tolerance: Tolerance,
    pub entity_column: String,
    pub year_column: String,
}

impl Comparator {
    /// Comparator keyed on the default output columns (`entity`, `year`)
    pub fn new(tolerance: Tolerance) -> Self {
        Comparator {
            tolerance,
            entity_column: "entity".to_string(),
            year_column: "year".to_string(),
        }
    }

    /// Builder pattern: override the key columns
    pub fn with_key_columns(mut self, entity: &str, year: &str) -> Self {
        self.entity_column = entity.to_string();
        self.year_column = year.to_string();
        self
    }

    pub fn compare(&self, generated: &Table, reference: &Table) -> Result<ComparisonResult> {
        check_columns(generated, reference)?;

        if generated.len() != reference.len() {
            return Err(FusionError::Structural(StructuralDifference::RowCounts {
                generated: generated.len(),
                reference: reference.len(),
            }));
        }

        let generated_rows = self.index_rows(generated)?;
        let reference_rows = self.index_rows(reference)?;

        let only_generated: Vec<EntityYearKey> = generated_rows
            .keys()
            .filter(|k| !reference_rows.contains_key(*k))
            .cloned()
            .collect();
        let only_reference: Vec<EntityYearKey> = reference_rows
            .keys()
            .filter(|k| !generated_rows.contains_key(*k))
            .cloned()
            .collect();
        if !only_generated.is_empty() || !only_reference.is_empty() {
            return Err(FusionError::Structural(StructuralDifference::KeySets {
                only_generated,
                only_reference,
            }));
        }

        // generated column order, resolved once against the reference layout
        let column_pairs: Vec<(usize, usize)> = generated
            .columns
            .iter()
            .enumerate()
            .filter_map(|(gi, name)| reference.column_index(name).map(|ri| (gi, ri)))
            .collect();

        let mut differences = Vec::new();
        for (key, gen_idx) in &generated_rows {
            let gen_row = &generated.rows[*gen_idx];
            let ref_row = &reference.rows[reference_rows[key]];
            for (gi, ri) in &column_pairs {
                if !self.tolerance.values_match(&gen_row[*gi], &ref_row[*ri]) {
                    differences.push(CellDifference {
                        key: key.clone(),
                        column: generated.columns[*gi].clone(),
                        expected: ref_row[*ri].clone(),
                        actual: gen_row[*gi].clone(),
                    });
                }
            }
        }

        info!(
            rows = generated.len(),
            columns = column_pairs.len(),
            differences = differences.len(),
            "compared tables"
        );

        if differences.is_empty() {
            Ok(ComparisonResult::Identical)
        } else {
            Ok(ComparisonResult::Differing(differences))
        }
    }

    /// Compare and wrap the outcome in a printable report.
    /// Structural mismatches become part of the report; other errors propagate.
    pub fn report(&self, generated: &Table, reference: &Table) -> Result<ComparisonReport> {
        let verdict = match self.compare(generated, reference) {
            Ok(ComparisonResult::Identical) => Verdict::Identical,
            Ok(ComparisonResult::Differing(differences)) => Verdict::Differing { differences },
            Err(FusionError::Structural(diff)) => Verdict::Structural(diff),
            Err(e) => return Err(e),
        };

        Ok(ComparisonReport {
            generated: TableSummary::of(generated),
            reference: TableSummary::of(reference),
            tolerance: self.tolerance,
            verdict,
            compared_at: Utc::now(),
        })
    }

    fn index_rows(&self, table: &Table) -> Result<BTreeMap<EntityYearKey, usize>> {
        let stage = Stage::Compare;
        let entity_idx = table.require_column(stage, &self.entity_column)?;
        let year_idx = table.require_column(stage, &self.year_column)?;

        let mut index = BTreeMap::new();
        for (row_idx, row) in table.rows.iter().enumerate() {
            let entity = match &row[entity_idx] {
                Value::Text(s) => canonical_entity(s),
                other => {
                    return Err(FusionError::invalid(
                        stage,
                        row_idx + 1,
                        &self.entity_column,
                        other.to_string(),
                        "entity identifier must be text",
                    ))
                }
            };
            let year = row[year_idx].as_year().ok_or_else(|| {
                FusionError::invalid(
                    stage,
                    row_idx + 1,
                    &self.year_column,
                    row[year_idx].to_string(),
                    "year must be an integer",
                )
            })?;

            let key = EntityYearKey { entity, year };
            if index.contains_key(&key) {
                return Err(FusionError::duplicate(stage, &table.name, key));
            }
            index.insert(key, row_idx);
        }
        Ok(index)
    }
}

fn check_columns(generated: &Table, reference: &Table) -> Result<()> {
    let gen_set: BTreeSet<&String> = generated.columns.iter().collect();
    let ref_set: BTreeSet<&String> = reference.columns.iter().collect();
    if gen_set == ref_set {
        return Ok(());
    }
    Err(FusionError::Structural(StructuralDifference::ColumnSets {
        only_generated: gen_set.difference(&ref_set).map(|c| c.to_string()).collect(),
        only_reference: ref_set.difference(&gen_set).map(|c| c.to_string()).collect(),
    }))
}

// ============================================================================
// COMPARISON REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub rows: usize,
    pub columns: Vec<String>,
}

impl TableSummary {
    pub fn of(table: &Table) -> Self {
        TableSummary {
            name: table.name.clone(),
            rows: table.len(),
            columns: table.columns.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome")]
pub enum Verdict {
    Identical,
    Differing { differences: Vec<CellDifference> },
    Structural(StructuralDifference),
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub generated: TableSummary,
    pub reference: TableSummary,
    pub tolerance: Tolerance,
    pub verdict: Verdict,
    pub compared_at: DateTime<Utc>,
}

impl ComparisonReport {
    pub fn is_identical(&self) -> bool {
        matches!(self.verdict, Verdict::Identical)
    }

    pub fn summary(&self) -> String {
        match &self.verdict {
            Verdict::Identical => "The files are identical.".to_string(),
            Verdict::Differing { differences } => {
                format!("The files differ: {} cell difference(s).", differences.len())
            }
            Verdict::Structural(diff) => format!("The files differ structurally: {}.", diff),
        }
    }

    /// Full human-readable report, one line per difference
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (label, table) in [("generated", &self.generated), ("reference", &self.reference)] {
            out.push_str(&format!(
                "Shape of {} data ({}): ({}, {})\n",
                label,
                table.name,
                table.rows,
                table.columns.len()
            ));
        }
        for (label, table) in [("generated", &self.generated), ("reference", &self.reference)] {
            out.push_str(&format!("Columns in {} data: [{}]\n", label, table.columns.join(", ")));
        }
        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        out.push_str(&self.summary());
        out.push('\n');

        if let Verdict::Differing { differences } = &self.verdict {
            out.push_str("Differences between the files:\n");
            for diff in differences {
                out.push_str(&format!("  {}\n", diff));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: &[&str], rows: &[&[Value]]) -> Table {
        let mut t = Table::new(name, columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            t.push_row(row.to_vec());
        }
        t
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    fn fused(rows: &[(&str, f64, Value, Value)]) -> Table {
        let rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|(e, y, p, v)| vec![text(e), num(*y), p.clone(), v.clone()])
            .collect();
        let refs: Vec<&[Value]> = rows.iter().map(|r| r.as_slice()).collect();
        table("t", &["entity", "year", "population_value", "price_value"], &refs)
    }

    fn comparator() -> Comparator {
        Comparator::new(Tolerance::new(1e-9, 1e-9))
    }

    #[test]
    fn test_identical_tables() {
        let a = fused(&[("USA", 2020.0, num(330.0), num(50.0))]);
        let b = fused(&[("USA", 2020.0, num(330.0), num(50.0))]);
        assert_eq!(comparator().compare(&a, &b).unwrap(), ComparisonResult::Identical);
    }

    #[test]
    fn test_one_price_outside_tolerance() {
        let generated = fused(&[
            ("USA", 2020.0, num(330.0), num(50.0)),
            ("FRA", 2021.0, Value::Missing, num(42.0)),
        ]);
        let reference = fused(&[
            ("USA", 2020.0, num(330.0), num(50.5)),
            ("FRA", 2021.0, Value::Missing, num(42.0)),
        ]);

        let result = comparator().compare(&generated, &reference).unwrap();
        assert_eq!(
            result,
            ComparisonResult::Differing(vec![CellDifference {
                key: EntityYearKey::new("USA", 2020),
                column: "price_value".to_string(),
                expected: num(50.5),
                actual: num(50.0),
            }])
        );
    }

    #[test]
    fn test_float_noise_within_tolerance() {
        let a = fused(&[("USA", 2020.0, num(0.1 + 0.2), num(50.0))]);
        let b = fused(&[("USA", 2020.0, num(0.3), num(50.0))]);
        assert!(comparator().compare(&a, &b).unwrap().is_identical());
    }

    #[test]
    fn test_alignment_ignores_row_order_and_column_order() {
        let a = fused(&[
            ("USA", 2020.0, num(330.0), num(50.0)),
            ("FRA", 2021.0, num(67.0), num(42.0)),
        ]);
        let b = table(
            "ref",
            &["price_value", "year", "entity", "population_value"],
            &[
                &[num(42.0), num(2021.0), text("FRA"), num(67.0)],
                &[num(50.0), num(2020.0), text("USA"), num(330.0)],
            ],
        );
        assert!(comparator().compare(&a, &b).unwrap().is_identical());
    }

    #[test]
    fn test_missing_on_one_side_always_differs() {
        let a = fused(&[("USA", 2020.0, Value::Missing, num(50.0))]);
        let b = fused(&[("USA", 2020.0, num(0.0), num(50.0))]);
        let result = comparator().compare(&a, &b).unwrap();
        assert_eq!(result.differences().len(), 1);
        assert_eq!(result.differences()[0].column, "population_value");
    }

    #[test]
    fn test_every_difference_is_reported() {
        let a = fused(&[
            ("USA", 2020.0, num(1.0), num(1.0)),
            ("FRA", 2020.0, num(2.0), num(2.0)),
        ]);
        let b = fused(&[
            ("USA", 2020.0, num(9.0), num(9.0)),
            ("FRA", 2020.0, num(8.0), num(2.0)),
        ]);
        let result = comparator().compare(&a, &b).unwrap();
        let cells: Vec<String> = result
            .differences()
            .iter()
            .map(|d| format!("{}/{}", d.key, d.column))
            .collect();
        // key order, then generated column order
        assert_eq!(
            cells,
            vec![
                "(FRA, 2020)/population_value",
                "(USA, 2020)/population_value",
                "(USA, 2020)/price_value"
            ]
        );
    }

    #[test]
    fn test_column_set_mismatch_is_structural() {
        let a = fused(&[("USA", 2020.0, num(1.0), num(1.0))]);
        let b = table("ref", &["entity", "year", "pop"], &[&[text("USA"), num(2020.0), num(1.0)]]);
        match comparator().compare(&a, &b).unwrap_err() {
            FusionError::Structural(StructuralDifference::ColumnSets {
                only_generated,
                only_reference,
            }) => {
                assert_eq!(only_generated, vec!["population_value", "price_value"]);
                assert_eq!(only_reference, vec!["pop"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_row_count_mismatch_is_structural() {
        let a = fused(&[("USA", 2020.0, num(1.0), num(1.0))]);
        let b = fused(&[]);
        assert!(matches!(
            comparator().compare(&a, &b),
            Err(FusionError::Structural(StructuralDifference::RowCounts {
                generated: 1,
                reference: 0
            }))
        ));
    }

    #[test]
    fn test_key_set_mismatch_is_structural() {
        let a = fused(&[("USA", 2020.0, num(1.0), num(1.0))]);
        let b = fused(&[("USA", 2021.0, num(1.0), num(1.0))]);
        assert!(matches!(
            comparator().compare(&a, &b),
            Err(FusionError::Structural(StructuralDifference::KeySets { .. }))
        ));
    }

    #[test]
    fn test_duplicate_key_in_reference() {
        let a = fused(&[("USA", 2020.0, num(1.0), num(1.0)), ("FRA", 2020.0, num(1.0), num(1.0))]);
        let b = fused(&[("USA", 2020.0, num(1.0), num(1.0)), ("USA", 2020.0, num(1.0), num(1.0))]);
        assert!(matches!(
            comparator().compare(&a, &b),
            Err(FusionError::DuplicateKey { stage: Stage::Compare, .. })
        ));
    }

    #[test]
    fn test_verdict_is_symmetric() {
        let x = fused(&[
            ("USA", 2020.0, num(330.0), num(50.0)),
            ("FRA", 2021.0, Value::Missing, num(42.0)),
        ]);
        let y = fused(&[
            ("USA", 2020.0, num(330.0), num(51.0)),
            ("FRA", 2021.0, num(67.0), num(42.0)),
        ]);
        let xy = comparator().compare(&x, &y).unwrap();
        let yx = comparator().compare(&y, &x).unwrap();

        assert_eq!(xy.is_identical(), yx.is_identical());
        let keys = |r: &ComparisonResult| -> BTreeSet<(EntityYearKey, String)> {
            r.differences().iter().map(|d| (d.key.clone(), d.column.clone())).collect()
        };
        assert_eq!(keys(&xy), keys(&yx));
        assert_eq!(xy.differences()[0].expected, yx.differences()[0].actual);
    }

    #[test]
    fn test_report_renders_differences_and_structure() {
        let a = fused(&[("USA", 2020.0, num(330.0), num(50.0))]);
        let b = fused(&[("USA", 2020.0, num(330.0), num(55.0))]);
        let report = comparator().report(&a, &b).unwrap();
        assert!(!report.is_identical());
        let text = report.render();
        assert!(text.contains("Shape of generated data (t): (1, 4)"));
        assert!(text.contains("(USA, 2020) price_value: expected 55, actual 50"));

        let c = fused(&[]);
        let report = comparator().report(&a, &c).unwrap();
        assert!(matches!(report.verdict, Verdict::Structural(_)));

        let report = comparator().report(&a, &a).unwrap();
        assert!(report.render().contains("The files are identical."));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let a = fused(&[("USA", 2020.0, Value::Missing, num(50.0))]);
        let b = fused(&[("USA", 2020.0, num(1.0), num(50.0))]);
        let report = comparator().report(&a, &b).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["verdict"]["outcome"], "Differing");
        assert_eq!(json["verdict"]["differences"][0]["actual"], serde_json::Value::Null);
        assert_eq!(json["verdict"]["differences"][0]["expected"], 1.0);
    }
}
