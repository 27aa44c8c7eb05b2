// 💾 Table Writer - unified table to CSV (header row, empty field = missing)

use crate::config::OutputConfig;
use crate::error::{FusionError, Result, Stage};
use crate::fusion::UnifiedTable;
use crate::table::{Table, Value};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

/// What a write produced; the digest makes reruns comparable byte-for-byte
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: usize,
    pub sha256: String,
}

pub struct TableWriter {
    pub entity_column: String,
    pub year_column: String,
    pub population_column: String,
}

impl TableWriter {
    pub fn new() -> Self {
        TableWriter::from_config(&OutputConfig::default())
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        TableWriter {
            entity_column: config.entity_column.clone(),
            year_column: config.year_column.clone(),
            population_column: config.population_column.clone(),
        }
    }

    /// entity, year, population, then each price column
    pub fn header(&self, table: &UnifiedTable) -> Vec<String> {
        let mut header = vec![
            self.entity_column.clone(),
            self.year_column.clone(),
            self.population_column.clone(),
        ];
        header.extend(table.price_columns.iter().cloned());
        header
    }

    /// Same content as the written file, as a typed Table
    pub fn to_table(&self, table: &UnifiedTable) -> Table {
        let mut out = Table::new("<fused>", self.header(table));
        for row in &table.rows {
            let mut cells = vec![
                Value::Text(row.entity().to_string()),
                Value::Number(f64::from(row.year())),
                Value::from(row.population),
            ];
            cells.extend(row.prices.iter().map(|p| Value::from(*p)));
            out.push_row(cells);
        }
        out
    }

    pub fn to_csv_bytes(&self, table: &UnifiedTable) -> Result<Vec<u8>> {
        self.encode(table, Path::new("<memory>"))
    }

    pub fn write(&self, table: &UnifiedTable, path: &Path) -> Result<WriteSummary> {
        let bytes = self.encode(table, path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| FusionError::Io {
                stage: Stage::Write,
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, &bytes).map_err(|source| FusionError::Io {
            stage: Stage::Write,
            path: path.to_path_buf(),
            source,
        })?;

        let summary = WriteSummary {
            path: path.to_path_buf(),
            rows: table.len(),
            bytes: bytes.len(),
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        };
        info!(
            path = %summary.path.display(),
            rows = summary.rows,
            bytes = summary.bytes,
            sha256 = %summary.sha256,
            "wrote fused table"
        );
        Ok(summary)
    }

    fn encode(&self, table: &UnifiedTable, path: &Path) -> Result<Vec<u8>> {
        let csv_err = |source: csv::Error| FusionError::Csv {
            stage: Stage::Write,
            path: path.to_path_buf(),
            source,
        };

        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(self.header(table)).map_err(csv_err)?;

        for row in &table.rows {
            let mut record = vec![row.entity().to_string(), row.year().to_string()];
            record.push(format_cell(row.population));
            record.extend(row.prices.iter().map(|p| format_cell(*p)));
            wtr.write_record(&record).map_err(csv_err)?;
        }

        wtr.into_inner().map_err(|e| FusionError::Io {
            stage: Stage::Write,
            path: path.to_path_buf(),
            source: e.into_error(),
        })
    }
}

impl Default for TableWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Shortest representation that parses back to the same f64
fn format_cell(value: Option<f64>) -> String {
    match value {
        Some(n) => n.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::UnifiedRow;
    use crate::table::EntityYearKey;

    fn sample() -> UnifiedTable {
        UnifiedTable {
            price_columns: vec!["price_value".to_string()],
            rows: vec![
                UnifiedRow {
                    key: EntityYearKey::new("FRA", 2021),
                    population: None,
                    prices: vec![Some(42.25)],
                },
                UnifiedRow {
                    key: EntityYearKey::new("USA", 2020),
                    population: Some(330.0),
                    prices: vec![Some(50.0)],
                },
            ],
        }
    }

    #[test]
    fn test_csv_layout() {
        let bytes = TableWriter::new().to_csv_bytes(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "entity,year,population_value,price_value\nFRA,2021,,42.25\nUSA,2020,330,50\n"
        );
    }

    #[test]
    fn test_to_table_matches_header_and_missing_marker() {
        let table = TableWriter::new().to_table(&sample());
        assert_eq!(table.columns, vec!["entity", "year", "population_value", "price_value"]);
        assert_eq!(table.rows[0][2], Value::Missing);
        assert_eq!(table.rows[1][2], Value::Number(330.0));
    }

    #[test]
    fn test_write_creates_directory_and_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output").join("valinfo.csv");
        let writer = TableWriter::new();

        let first = writer.write(&sample(), &path).unwrap();
        let first_bytes = std::fs::read(&path).unwrap();
        let second = writer.write(&sample(), &path).unwrap();
        let second_bytes = std::fs::read(&path).unwrap();

        assert_eq!(first.rows, 2);
        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first_bytes, second_bytes);
    }
}
