// 📋 Table Model - typed cells, ordered rows, validated column access
// Both sources arrive as a Table; every stage resolves its columns once

use crate::error::{FusionError, Result, Stage};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// VALUE
// ============================================================================

/// A single typed cell. `Missing` is the explicit "no value" marker and is
/// never equal to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Type a raw delimited-text field
    pub fn parse(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() || matches!(trimmed, "NA" | "NaN" | "nan" | "N/A") {
            return Value::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Number(n),
            _ => Value::Text(trimmed.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Numeric reading of the cell; numeric text is accepted
    pub fn as_number(&self) -> Option<f64> {
        self.as_float().filter(|n| n.is_finite())
    }

    /// Like `as_number`, but `inf`/`-inf` text still reads as a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Missing => None,
        }
    }

    /// Integral year reading of the cell
    pub fn as_year(&self) -> Option<i32> {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                    Some(*n as i32)
                } else {
                    None
                }
            }
            Value::Text(s) => s.trim().parse::<i32>().ok(),
            Value::Missing => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Missing => f.write_str("<missing>"),
        }
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(n) => Value::Number(n),
            None => Value::Missing,
        }
    }
}

// ============================================================================
// ENTITY-YEAR KEY
// ============================================================================

/// Join key. Field order gives the output ordering: entity, then year.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityYearKey {
    pub entity: String,
    pub year: i32,
}

impl EntityYearKey {
    pub fn new(entity: &str, year: i32) -> Self {
        EntityYearKey {
            entity: entity.to_string(),
            year,
        }
    }
}

impl fmt::Display for EntityYearKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.entity, self.year)
    }
}

/// Canonical entity form shared by both sources: trimmed, upper-case.
pub fn canonical_entity(raw: &str) -> String {
    raw.trim().to_uppercase()
}

// ============================================================================
// TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Label used in error messages (usually the source path)
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: &str, columns: Vec<String>) -> Self {
        Table {
            name: name.to_string(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding short rows with `Missing`
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Missing);
        self.rows.push(row);
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Resolve a column once, failing fast with a schema error
    pub fn require_column(&self, stage: Stage, column: &str) -> Result<usize> {
        self.column_index(column)
            .ok_or_else(|| FusionError::schema(stage, &self.name, column))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }
}
