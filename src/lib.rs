// Valinfo Fusion - Core Library
// Population projections × energy prices → one verified table

pub mod error;
pub mod table;
pub mod config;
pub mod loader;
pub mod stata;      // .dta reader for the price panel
pub mod population; // model/scenario filter + interpolation step
pub mod price;      // sentinel cleaning, duplicate rejection
pub mod fusion;     // outer join on (entity, year)
pub mod writer;
pub mod compare;    // key-aligned, tolerance-aware verification
pub mod pipeline;

// Re-export commonly used types
pub use error::{FusionError, Result, Stage, StructuralDifference};
pub use table::{canonical_entity, EntityYearKey, Table, Value};
pub use config::{
    CompareConfig, FusionConfig, InterpolationConfig, JoinPolicy,
    OutputConfig, PopulationConfig, PriceConfig, PriceSeriesConfig,
};
pub use loader::{open_source, read_csv, SourceFormat, TableSource};
pub use population::{PopulationFilter, PopulationInterpolator, PopulationSeries};
pub use price::{PriceNormalizer, PriceSeries, SentinelPolicy};
pub use fusion::{Fuser, UnifiedRow, UnifiedTable};
pub use writer::{TableWriter, WriteSummary};
pub use compare::{
    CellDifference, Comparator, ComparisonReport, ComparisonResult, Tolerance, Verdict,
};
pub use pipeline::{FusionOutcome, FusionPipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
