// ⚙️ Configuration - fixed selection constants, overridable per run
// Resolution: CLI flag > TOML file > compiled default

use crate::error::{FusionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when none is named
pub const DEFAULT_CONFIG_FILE: &str = "valinfo.toml";

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub population: PopulationConfig,
    pub prices: PriceConfig,
    pub output: OutputConfig,
    pub compare: CompareConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub path: PathBuf,
    pub model: String,
    pub scenario: String,
    pub model_column: String,
    pub scenario_column: String,
    pub entity_column: String,
    /// Explicit interpolation step; absent means observed years only
    pub interpolation: Option<InterpolationConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterpolationConfig {
    pub first_year: i32,
    pub last_year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub path: PathBuf,
    pub entity_column: String,
    pub year_column: String,
    pub reject_negative: bool,
    /// Magic numbers the source uses for "no data"
    pub sentinels: Vec<f64>,
    pub series: Vec<PriceSeriesConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeriesConfig {
    /// Column name in the price source
    pub source: String,
    /// Column name in the fused output
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPolicy {
    Outer,
    Inner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub entity_column: String,
    pub year_column: String,
    pub population_column: String,
    pub join: JoinPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    pub reference: PathBuf,
    pub absolute_tolerance: f64,
    pub relative_tolerance: f64,
}

// ============================================================================
// DEFAULTS
// ============================================================================

impl Default for PopulationConfig {
    fn default() -> Self {
        PopulationConfig {
            path: PathBuf::from("data/population.csv"),
            model: "IIASA-WiC POP".to_string(),
            scenario: "SSP3_v9_130115".to_string(),
            model_column: "MODEL".to_string(),
            scenario_column: "SCENARIO".to_string(),
            entity_column: "REGION".to_string(),
            interpolation: None,
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        PriceConfig {
            path: PathBuf::from("data/IEA_Price_FIN_Clean_gr014_GLOBAL.dta"),
            entity_column: "country".to_string(),
            year_column: "year".to_string(),
            reject_negative: true,
            sentinels: Vec::new(),
            series: vec![PriceSeriesConfig {
                source: "price".to_string(),
                output: "price_value".to_string(),
            }],
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            path: PathBuf::from("output/valinfo.csv"),
            entity_column: "entity".to_string(),
            year_column: "year".to_string(),
            population_column: "population_value".to_string(),
            join: JoinPolicy::Outer,
        }
    }
}

impl Default for CompareConfig {
    fn default() -> Self {
        CompareConfig {
            reference: PathBuf::from("data/valinfo_orig.csv"),
            absolute_tolerance: 1e-9,
            relative_tolerance: 1e-9,
        }
    }
}

// ============================================================================
// LOADING + VALIDATION
// ============================================================================

impl FusionConfig {
    /// Load from an explicit path, else `./valinfo.toml` if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_file(local)?
                } else {
                    FusionConfig::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FusionError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| FusionError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        let tol = &self.compare;
        for (name, value) in [
            ("absolute_tolerance", tol.absolute_tolerance),
            ("relative_tolerance", tol.relative_tolerance),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(FusionError::Config(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }

        if self.prices.series.is_empty() {
            return Err(FusionError::Config(
                "at least one price series is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for name in self.output_columns() {
            if !seen.insert(name.clone()) {
                return Err(FusionError::Config(format!(
                    "output column '{}' is used twice",
                    name
                )));
            }
        }

        if let Some(interp) = self.population.interpolation {
            if interp.first_year > interp.last_year {
                return Err(FusionError::Config(format!(
                    "interpolation range {}..={} is empty",
                    interp.first_year, interp.last_year
                )));
            }
        }

        Ok(())
    }

    /// Header of the fused table in write order
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = vec![
            self.output.entity_column.clone(),
            self.output.year_column.clone(),
            self.output.population_column.clone(),
        ];
        columns.extend(self.prices.series.iter().map(|s| s.output.clone()));
        columns
    }
}
