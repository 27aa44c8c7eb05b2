// 🚂 Fusion Pipeline - load → filter → (interpolate) → normalize → fuse → write
// and, separately, load output + reference → compare

use crate::compare::{Comparator, ComparisonReport, Tolerance};
use crate::config::FusionConfig;
use crate::error::{Result, Stage};
use crate::fusion::{Fuser, UnifiedTable};
use crate::loader::{open_source, read_csv};
use crate::population::{PopulationFilter, PopulationInterpolator};
use crate::price::PriceNormalizer;
use crate::table::Table;
use crate::writer::{TableWriter, WriteSummary};
use std::path::Path;
use tracing::{info, info_span};

#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub table: UnifiedTable,
    pub write: WriteSummary,
}

pub struct FusionPipeline {
    pub config: FusionConfig,
}

impl FusionPipeline {
    pub fn new(config: FusionConfig) -> Self {
        FusionPipeline { config }
    }

    /// The in-memory core: no I/O, input tables are only read
    pub fn fuse_tables(&self, population: &Table, prices: &Table) -> Result<UnifiedTable> {
        let filtered = {
            let _span = info_span!("stage", stage = %Stage::Filter).entered();
            PopulationFilter::from_config(&self.config.population).apply(population)?
        };

        let population_series = match &self.config.population.interpolation {
            Some(range) => {
                let _span = info_span!("stage", stage = %Stage::Interpolate).entered();
                PopulationInterpolator::from_config(range).apply(&filtered)
            }
            None => filtered,
        };

        let price_series = {
            let _span = info_span!("stage", stage = %Stage::Normalize).entered();
            PriceNormalizer::from_config(&self.config.prices).normalize(prices)?
        };

        let _span = info_span!("stage", stage = %Stage::Fuse).entered();
        Ok(Fuser::with_policy(self.config.output.join).fuse(&population_series, &price_series))
    }

    /// Load both sources, fuse, write the output file
    pub fn run_fusion(&self) -> Result<FusionOutcome> {
        let population_config = &self.config.population;
        let population = load(
            &population_config.path,
            &[
                population_config.model_column.as_str(),
                population_config.scenario_column.as_str(),
                population_config.entity_column.as_str(),
            ],
        )?;
        let prices = load(
            &self.config.prices.path,
            &[self.config.prices.entity_column.as_str()],
        )?;

        let table = self.fuse_tables(&population, &prices)?;

        let write = {
            let _span = info_span!("stage", stage = %Stage::Write).entered();
            TableWriter::from_config(&self.config.output).write(&table, &self.config.output.path)?
        };

        Ok(FusionOutcome { table, write })
    }

    /// Compare the written output against the reference file
    pub fn run_comparison(&self) -> Result<ComparisonReport> {
        let key_columns = [self.config.output.entity_column.as_str()];
        let generated = read_csv(&self.config.output.path, &key_columns)?;
        let reference = read_csv(&self.config.compare.reference, &key_columns)?;

        let _span = info_span!("stage", stage = %Stage::Compare).entered();
        self.comparator().report(&generated, &reference)
    }

    pub fn comparator(&self) -> Comparator {
        Comparator::new(Tolerance::from_config(&self.config.compare))
            .with_key_columns(&self.config.output.entity_column, &self.config.output.year_column)
    }
}

/// Load one input; `identifiers` are the columns read as verbatim text
fn load(path: &Path, identifiers: &[&str]) -> Result<Table> {
    let _span = info_span!("stage", stage = %Stage::Load, path = %path.display()).entered();
    let source = open_source(path, identifiers);
    let table = source.load()?;
    info!(
        source = %source.describe(),
        rows = table.len(),
        columns = table.columns.len(),
        "loaded table"
    );
    Ok(table)
}
