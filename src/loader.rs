// 📂 Table Loaders - delimited text and Stata files into a typed Table
// Format is picked by file extension

use crate::error::{FusionError, Result, Stage};
use crate::stata;
use crate::table::{Table, Value};
use std::io::Read;
use std::path::{Path, PathBuf};

// ============================================================================
// SOURCE FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited,
    Stata,
}

impl SourceFormat {
    /// `.dta` is Stata, everything else is read as CSV
    pub fn detect(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
        {
            Some(ext) if ext == "dta" => SourceFormat::Stata,
            _ => SourceFormat::Delimited,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SourceFormat::Delimited => "CSV",
            SourceFormat::Stata => "Stata",
        }
    }
}

// ============================================================================
// TABLE SOURCE TRAIT
// ============================================================================

/// Anything that can materialize a whole table in memory
pub trait TableSource {
    fn load(&self) -> Result<Table>;

    fn describe(&self) -> String;
}

pub struct CsvSource {
    pub path: PathBuf,
    /// Identifier columns kept verbatim instead of typed
    pub text_columns: Vec<String>,
}

impl TableSource for CsvSource {
    fn load(&self) -> Result<Table> {
        let text_columns: Vec<&str> = self.text_columns.iter().map(String::as_str).collect();
        read_csv(&self.path, &text_columns)
    }

    fn describe(&self) -> String {
        format!("{} {}", SourceFormat::Delimited.name(), self.path.display())
    }
}

pub struct StataSource {
    pub path: PathBuf,
}

impl TableSource for StataSource {
    fn load(&self) -> Result<Table> {
        stata::read_dta(&self.path)
    }

    fn describe(&self) -> String {
        format!("{} {}", SourceFormat::Stata.name(), self.path.display())
    }
}

/// Pick the loader for a path. `text_columns` only matters for CSV:
/// Stata files carry their own column types.
pub fn open_source(path: &Path, text_columns: &[&str]) -> Box<dyn TableSource> {
    match SourceFormat::detect(path) {
        SourceFormat::Stata => Box::new(StataSource {
            path: path.to_path_buf(),
        }),
        SourceFormat::Delimited => Box::new(CsvSource {
            path: path.to_path_buf(),
            text_columns: text_columns.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

// ============================================================================
// CSV
// ============================================================================

/// Read a CSV file. Cells are typed by content, except those in
/// `text_columns`, which stay exactly as written (no trimming, and "NA"
/// or "840" remain identifiers rather than missing markers or numbers).
pub fn read_csv(path: &Path, text_columns: &[&str]) -> Result<Table> {
    if !path.is_file() {
        return Err(FusionError::Io {
            stage: Stage::Load,
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        });
    }

    let file = std::fs::File::open(path).map_err(|source| FusionError::Io {
        stage: Stage::Load,
        path: path.to_path_buf(),
        source,
    })?;

    read_csv_from(path, file, text_columns)
}

/// Parse CSV from any reader; `path` labels the table and errors
pub fn read_csv_from<R: Read>(path: &Path, reader: R, text_columns: &[&str]) -> Result<Table> {
    let csv_err = |source: csv::Error| FusionError::Csv {
        stage: Stage::Load,
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);

    let columns: Vec<String> = rdr
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    let verbatim: Vec<bool> = columns
        .iter()
        .map(|c| text_columns.contains(&c.as_str()))
        .collect();
    let mut table = Table::new(&path.display().to_string(), columns);

    for record in rdr.records() {
        let record = record.map_err(csv_err)?;
        table.push_row(
            record
                .iter()
                .zip(&verbatim)
                .map(|(raw, keep)| {
                    if *keep {
                        Value::Text(raw.to_string())
                    } else {
                        Value::parse(raw)
                    }
                })
                .collect(),
        );
    }

    Ok(table)
}
