// 🚨 Error Taxonomy - every fatal failure names its stage
// Schema, duplicate keys, bad cells, structural mismatches, collaborator I/O

use crate::table::EntityYearKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FusionError>;

// ============================================================================
// STAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Config,
    Load,
    Filter,
    Interpolate,
    Normalize,
    Fuse,
    Write,
    Compare,
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Config => "config",
            Stage::Load => "load",
            Stage::Filter => "filter",
            Stage::Interpolate => "interpolate",
            Stage::Normalize => "normalize",
            Stage::Fuse => "fuse",
            Stage::Write => "write",
            Stage::Compare => "compare",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// STRUCTURAL DIFFERENCE
// ============================================================================

/// Schema-level mismatch between a generated and a reference table.
/// Cell comparison is never attempted once one of these is found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructuralDifference {
    ColumnSets {
        only_generated: Vec<String>,
        only_reference: Vec<String>,
    },
    RowCounts {
        generated: usize,
        reference: usize,
    },
    KeySets {
        only_generated: Vec<EntityYearKey>,
        only_reference: Vec<EntityYearKey>,
    },
}

impl fmt::Display for StructuralDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralDifference::ColumnSets {
                only_generated,
                only_reference,
            } => write!(
                f,
                "column sets differ (only in generated: [{}]; only in reference: [{}])",
                only_generated.join(", "),
                only_reference.join(", ")
            ),
            StructuralDifference::RowCounts {
                generated,
                reference,
            } => write!(
                f,
                "row counts differ (generated: {}, reference: {})",
                generated, reference
            ),
            StructuralDifference::KeySets {
                only_generated,
                only_reference,
            } => {
                let fmt_keys = |keys: &[EntityYearKey]| {
                    keys.iter()
                        .map(|k| k.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                write!(
                    f,
                    "row keys differ (only in generated: [{}]; only in reference: [{}])",
                    fmt_keys(only_generated),
                    fmt_keys(only_reference)
                )
            }
        }
    }
}

// ============================================================================
// FUSION ERROR
// ============================================================================

#[derive(Error, Debug)]
pub enum FusionError {
    /// An expected column is absent from an input table
    #[error("[{stage}] schema error: missing column '{column}' in {table}")]
    Schema {
        stage: Stage,
        table: String,
        column: String,
    },

    /// The same (entity, year) appears twice within one source
    #[error("[{stage}] duplicate key {key} in {table}")]
    DuplicateKey {
        stage: Stage,
        table: String,
        key: EntityYearKey,
    },

    /// A cell that cannot be interpreted for its column
    #[error("[{stage}] invalid value '{value}' at row {row}, column '{column}': {reason}")]
    InvalidValue {
        stage: Stage,
        row: usize,
        column: String,
        value: String,
        reason: String,
    },

    #[error("[compare] structural difference: {0}")]
    Structural(StructuralDifference),

    #[error("[{stage}] I/O error on {}: {source}", .path.display())]
    Io {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{stage}] CSV error on {}: {source}", .path.display())]
    Csv {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Malformed binary statistical file
    #[error("[{stage}] malformed file {}: {message}", .path.display())]
    Format {
        stage: Stage,
        path: PathBuf,
        message: String,
    },

    #[error("[config] {0}")]
    Config(String),
}

impl FusionError {
    pub fn stage(&self) -> Stage {
        match self {
            FusionError::Schema { stage, .. }
            | FusionError::DuplicateKey { stage, .. }
            | FusionError::InvalidValue { stage, .. }
            | FusionError::Io { stage, .. }
            | FusionError::Csv { stage, .. }
            | FusionError::Format { stage, .. } => *stage,
            FusionError::Structural(_) => Stage::Compare,
            FusionError::Config(_) => Stage::Config,
        }
    }

    pub fn schema(stage: Stage, table: &str, column: &str) -> Self {
        FusionError::Schema {
            stage,
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    pub fn duplicate(stage: Stage, table: &str, key: EntityYearKey) -> Self {
        FusionError::DuplicateKey {
            stage,
            table: table.to_string(),
            key,
        }
    }

    pub fn invalid(stage: Stage, row: usize, column: &str, value: String, reason: &str) -> Self {
        FusionError::InvalidValue {
            stage,
            row,
            column: column.to_string(),
            value,
            reason: reason.to_string(),
        }
    }
}
