#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use chrono::Local;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

use mmrisk::config::PipelineConfig;
use mmrisk::data::UploadedTable;
use mmrisk::model::LoadedModel;
use mmrisk::pipeline::{PredictionReport, RiskPipeline};
use mmrisk::reference;
use mmrisk::report::{
    DEFAULT_HISTOGRAM_BINS, PredictionSummary, SortOrder, group_distribution, score_histogram,
    sort_results, write_results_csv,
};
use mmrisk::stratify::{PRESET_NAMES, StratificationPolicy};

#[derive(Args)]
pub struct PolicyArgs {
    /// Pipeline configuration file (.toml); built-in defaults are used if omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stratification preset, overriding the configuration file
    /// (five_level, three_level, three_level_coarse, quintile)
    #[arg(long, value_name = "PRESET")]
    pub policy: Option<String>,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Expression matrix (.csv): one row per patient, one column per gene
    pub input: PathBuf,

    /// Path to the trained model artifact (.toml)
    #[arg(long)]
    pub model: PathBuf,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Output CSV path (default: MM_prediction_results_YYYYMMDD.csv)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Row order of the printed table and the exported file
    #[arg(long, value_enum, default_value_t = SortArg::Input)]
    pub sort: SortArg,

    /// Number of result rows to print (0 prints none)
    #[arg(long, default_value = "20")]
    pub top: usize,

    /// Number of survival-rate histogram bins to print
    #[arg(long, default_value_t = DEFAULT_HISTOGRAM_BINS)]
    pub bins: usize,
}

/// Command-line names for [`SortOrder`].
#[derive(Clone, Copy, ValueEnum)]
pub enum SortArg {
    /// The order rows were uploaded in
    Input,
    /// Highest survival rate first
    SurvivalDescending,
    /// Lowest survival rate first
    SurvivalAscending,
    /// By group in policy order, then by patient identifier
    RiskGroup,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Input => SortOrder::Input,
            SortArg::SurvivalDescending => SortOrder::SurvivalDescending,
            SortArg::SurvivalAscending => SortOrder::SurvivalAscending,
            SortArg::RiskGroup => SortOrder::RiskGroup,
        }
    }
}

#[derive(Args)]
pub struct InitConfigArgs {
    /// Where to write the configuration
    #[arg(default_value = "mmrisk.toml")]
    pub output: PathBuf,

    /// Stratification preset to start from
    #[arg(long, value_name = "PRESET", default_value = "five_level")]
    pub policy: String,
}

#[derive(Parser)]
#[command(
    name = "mmrisk",
    about = "Multiple myeloma risk scoring from gene-expression profiles",
    long_about = "Scores uploaded gene-expression matrices with a trained classifier, assigns \
                 each patient a risk group and exports the results as CSV."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score an expression matrix and export the results
    #[command(about = "Score patients (outputs: MM_prediction_results_YYYYMMDD.csv)")]
    Predict(PredictArgs),

    /// Print validation metrics, top genes and clinical guidance
    #[command(about = "Show model reference information")]
    Reference(PolicyArgs),

    /// Write a pipeline configuration file with default settings
    #[command(about = "Write a default configuration (outputs: mmrisk.toml)")]
    InitConfig(InitConfigArgs),

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Predict(args)) => predict(args),
        Some(Commands::Reference(args)) => show_reference(args),
        Some(Commands::InitConfig(args)) => init_config(args),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(|e| e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn resolve_config(args: &PolicyArgs) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(name) = &args.policy {
        config.stratification = StratificationPolicy::preset(name)?;
    }
    Ok(config)
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "MM_prediction_results_{}.csv",
        Local::now().format("%Y%m%d")
    ))
}

pub fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args.policy)?;

    println!("Loading model from: {}", args.model.display());
    let model = LoadedModel::load(&args.model)?;
    println!(
        "Model expects {} ({} classifier)",
        model.schema(),
        model.kind()
    );
    let pipeline = RiskPipeline::from_artifact(model, config)?;

    println!("Loading expression data from: {}", args.input.display());
    let table = UploadedTable::from_path(&args.input)?;
    println!(
        "Loaded {} patients with {} columns",
        table.height(),
        table.column_names().len()
    );

    let mut report = pipeline.run_prediction(&table)?;
    if report.binning.is_none() {
        println!("Input already contains risk scores; results passed through unchanged.");
    }
    if !report.extra_columns.is_empty() {
        println!(
            "Ignored {} column(s) not used by the model.",
            report.extra_columns.len()
        );
    }
    if report.used_fallback_binning() {
        println!("Tied scores collapsed the quantile bins; equal-width groups were used.");
    }

    sort_results(&mut report.results, args.sort.into(), &report.labels);
    print_summary(&report, args.bins, args.top)?;

    let output = args.output.unwrap_or_else(default_output_path);
    write_results_csv(&output, &report.results)?;
    println!("Results saved to: {}", output.display());
    Ok(())
}

fn print_summary(
    report: &PredictionReport,
    bins: usize,
    top: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = PredictionSummary::from_results(&report.results);
    println!("\nTotal patients:    {}", summary.total);
    println!("High-risk groups:  {}", summary.high_risk);
    println!("Low-risk groups:   {}", summary.low_risk);
    if let (Some(score), Some(survival)) = (summary.mean_risk_score, summary.mean_survival_rate) {
        println!("Mean risk score:   {score:.3}");
        println!("Mean survival:     {survival:.1}%");
    }

    println!("\nRisk group distribution");
    for (label, count) in group_distribution(&report.results, &report.labels) {
        println!("  {label:<16} {count:>6}");
    }

    if bins > 0 {
        let histogram = score_histogram(&report.results, bins)?;
        let widest = histogram.iter().map(|b| b.count).max().unwrap_or(0).max(1);
        println!("\nSurvival rate distribution (%)");
        for bin in &histogram {
            let bar = "#".repeat(bin.count * 40 / widest);
            println!(
                "  {:>5.1}-{:<5.1} {:>6} {bar}",
                bin.lower, bin.upper, bin.count
            );
        }
    }

    if top > 0 {
        println!(
            "\n{:<16} {:>10} {:<16} {:>13}",
            "Patient_ID", "Risk_Score", "Risk_Group", "Survival_Rate"
        );
        for result in report.results.iter().take(top) {
            println!(
                "{:<16} {:>10.3} {:<16} {:>12.1}%",
                result.patient_id, result.risk_score, result.risk_group, result.survival_rate
            );
        }
        if report.results.len() > top {
            println!("... {} more rows in the exported file", report.results.len() - top);
        }
    }
    Ok(())
}

fn show_reference(args: PolicyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args)?;
    print!("{}", reference::render(&config.stratification)?);
    Ok(())
}

fn init_config(args: InitConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.output.exists() {
        return Err(format!(
            "{} already exists; refusing to overwrite it",
            args.output.display()
        )
        .into());
    }
    let config = PipelineConfig {
        stratification: StratificationPolicy::preset(&args.policy)?,
        ..PipelineConfig::default()
    };
    config.save(&args.output)?;
    println!(
        "Configuration written to: {} (available presets: {})",
        args.output.display(),
        PRESET_NAMES.join(", ")
    );
    Ok(())
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const YEAR: u64 = 365 * DAY;

    let (value, unit) = if seconds < MINUTE {
        return format!("{seconds} seconds ago");
    } else if seconds < HOUR {
        (seconds as f64 / MINUTE as f64, "minutes")
    } else if seconds < DAY {
        (seconds as f64 / HOUR as f64, "hours")
    } else if seconds < YEAR {
        (seconds as f64 / DAY as f64, "days")
    } else {
        (seconds as f64 / YEAR as f64, "years")
    };
    format!("{value:.1} {unit} ago")
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let build_timestamp: u64 = env!("MMRISK_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("mmrisk {version}");

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}
