use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use valinfo_fusion::{FusionConfig, FusionPipeline, JoinPolicy, VERSION};

#[derive(Parser, Debug)]
#[command(version, about = "Fuse population projections with energy prices and verify the result")]
struct Args {
    /// TOML config file (defaults to ./valinfo.toml when present)
    #[arg(short, long, env = "VALINFO_CONFIG")]
    config: Option<PathBuf>,

    /// Population projection CSV
    #[arg(long)]
    population: Option<PathBuf>,

    /// Energy price dataset (.dta or .csv)
    #[arg(long)]
    prices: Option<PathBuf>,

    /// Fused output CSV
    #[arg(long)]
    output: Option<PathBuf>,

    /// Known-good reference CSV
    #[arg(long)]
    reference: Option<PathBuf>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    scenario: Option<String>,

    #[arg(long, value_enum)]
    join: Option<JoinArg>,

    /// Absolute tolerance for numeric cells
    #[arg(long)]
    tolerance: Option<f64>,

    /// Print the comparison report as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Build the fused table and write it
    Fuse,
    /// Compare an existing output against the reference
    Compare,
    /// Fuse, then compare (default)
    Run,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum JoinArg {
    Outer,
    Inner,
}

fn main() -> Result<()> {
    // Logs go to stderr so the report on stdout stays clean
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("valinfo=info,valinfo_fusion=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Run);
    let config = resolve_config(&args)?;
    info!(version = VERSION, ?command, "starting");

    let pipeline = FusionPipeline::new(config);

    if matches!(command, Command::Fuse | Command::Run) {
        run_fuse(&pipeline, args.json)?;
    }

    if matches!(command, Command::Compare | Command::Run) {
        let identical = run_compare(&pipeline, args.json)?;
        if !identical {
            std::process::exit(1);
        }
    }

    Ok(())
}

/// CLI flag > TOML file > compiled default
fn resolve_config(args: &Args) -> Result<FusionConfig> {
    let mut config =
        FusionConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(path) = &args.population {
        config.population.path = path.clone();
    }
    if let Some(path) = &args.prices {
        config.prices.path = path.clone();
    }
    if let Some(path) = &args.output {
        config.output.path = path.clone();
    }
    if let Some(path) = &args.reference {
        config.compare.reference = path.clone();
    }
    if let Some(model) = &args.model {
        config.population.model = model.clone();
    }
    if let Some(scenario) = &args.scenario {
        config.population.scenario = scenario.clone();
    }
    if let Some(join) = args.join {
        config.output.join = match join {
            JoinArg::Outer => JoinPolicy::Outer,
            JoinArg::Inner => JoinPolicy::Inner,
        };
    }
    if let Some(tolerance) = args.tolerance {
        config.compare.absolute_tolerance = tolerance;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn run_fuse(pipeline: &FusionPipeline, json: bool) -> Result<()> {
    let config = &pipeline.config;
    let outcome = pipeline.run_fusion().context("Data fusion failed")?;
    if json {
        // stdout is reserved for the JSON report
        return Ok(());
    }

    println!("🔗 Data Fusion - population × energy prices");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Model:      {}", config.population.model);
    println!("Scenario:   {}", config.population.scenario);
    println!("Population: {}", config.population.path.display());
    println!("Prices:     {}", config.prices.path.display());

    let population_missing = outcome
        .table
        .rows
        .iter()
        .filter(|r| r.population.is_none())
        .count();
    println!("\n✓ {} rows fused ({:?} join)", outcome.table.len(), config.output.join);
    println!("✓ {} rows without population", population_missing);
    println!("✓ Data saved to: {}", outcome.write.path.display());
    println!("  sha256 {}", outcome.write.sha256);
    Ok(())
}

fn run_compare(pipeline: &FusionPipeline, json: bool) -> Result<bool> {
    let report = pipeline.run_comparison().context("Comparison failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n🔍 Comparing against {}", pipeline.config.compare.reference.display());
        print!("{}", report.render());
    }

    Ok(report.is_identical())
}
