#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use lvef::batch::{BatchSummary, predict_batch, read_observations, write_predictions};
use lvef::config::ServiceConfig;
use lvef::http::{self, ApiState};
use lvef::{Predictor, RacePolicy, RawObservation, TrainedModel};

#[derive(Parser)]
#[command(
    name = "lvef",
    version,
    about = "Left ventricular ejection fraction estimation from ECG-derived measurements."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RacePolicyCli {
    /// Fold unrecognised values to 'other'
    Lenient,
    /// Reject unrecognised values
    Strict,
}

impl From<RacePolicyCli> for RacePolicy {
    fn from(policy: RacePolicyCli) -> Self {
        match policy {
            RacePolicyCli::Lenient => RacePolicy::Lenient,
            RacePolicyCli::Strict => RacePolicy::Strict,
        }
    }
}

/// Flags shared by every command that builds a predictor.
#[derive(Args)]
pub struct PolicyArgs {
    /// Path to a TOML service configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Path to the trained model file (.toml); overrides the configuration
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// How unrecognised race values are handled
    #[arg(long, value_enum)]
    pub race_policy: Option<RacePolicyCli>,

    /// Skip the plausible-range checks on numeric fields
    #[arg(long)]
    pub no_range_checks: bool,
}

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Address to bind, e.g. 127.0.0.1
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args)]
pub struct PredictArgs {
    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Age in years
    #[arg(long, allow_hyphen_values = true)]
    pub age: String,

    /// Gender ('male' encodes as male; any other value as non-male)
    #[arg(long)]
    pub gender: String,

    /// Race: white, black, asian or other
    #[arg(long)]
    pub race: String,

    /// QRS duration in milliseconds
    #[arg(long, allow_hyphen_values = true)]
    pub qrs: String,

    /// Corrected QT interval in milliseconds
    #[arg(long, allow_hyphen_values = true)]
    pub qt: String,

    /// Ventricular rate in beats per minute
    #[arg(long, allow_hyphen_values = true)]
    pub vr: String,
}

#[derive(Args)]
pub struct InferArgs {
    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Path to a CSV or TSV file with a header of field names
    pub observations: PathBuf,

    /// Where to write the predictions
    #[arg(long, default_value = "predictions.tsv")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct CheckModelArgs {
    /// Path to the trained model file (.toml)
    #[arg(long)]
    pub model: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve predictions over HTTP
    #[command(about = "Serve the prediction API and form (POST /predict, GET /health, GET /)")]
    Serve(ServeArgs),

    /// Predict a single observation and print the result as JSON
    #[command(about = "Predict LVEF for one observation")]
    Predict(PredictArgs),

    /// Score every row of a delimited file
    #[command(about = "Apply the model to a CSV/TSV of observations (outputs: predictions.tsv)")]
    Infer(InferArgs),

    /// Load and validate a model artifact
    #[command(about = "Validate a model file and print its summary")]
    CheckModel(CheckModelArgs),

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Serve(args)) => serve(args),
        Some(Commands::Predict(args)) => predict(args),
        Some(Commands::Infer(args)) => infer(args),
        Some(Commands::CheckModel(args)) => check_model(args),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Resolves configuration (file, then environment, then flags).
fn resolve_config(args: &PolicyArgs) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    let base = match &args.config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    let mut config = base.apply_env()?;

    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }
    if let Some(policy) = args.race_policy {
        config.race_policy = policy.into();
    }
    if args.no_range_checks {
        config.enforce_ranges = false;
    }
    Ok(config)
}

/// Loads the model once. Any failure here aborts the command before it does
/// anything else.
fn load_predictor(config: &ServiceConfig) -> Result<Predictor, Box<dyn std::error::Error>> {
    let model = TrainedModel::load(&config.model_path).map_err(|e| {
        format!(
            "could not load model from '{}': {e}",
            config.model_path.display()
        )
    })?;
    log::info!(
        "Loaded model from {}: {}",
        config.model_path.display(),
        model.summary()
    );
    Ok(Predictor::new(Arc::new(model), config.encoding_rules()))
}

fn serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = resolve_config(&args.policy)?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let predictor = load_predictor(&config)?;
    log::info!(
        "Race policy: {}, range checks: {}",
        config.race_policy,
        if config.enforce_ranges { "on" } else { "off" }
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let addr = config.listen_address();
    runtime.block_on(http::serve(&addr, ApiState { predictor }))?;
    Ok(())
}

fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args.policy)?;
    let predictor = load_predictor(&config)?;

    let raw = RawObservation::new()
        .with_text("age", args.age)
        .with_text("gender", args.gender)
        .with_text("race", args.race)
        .with_text("qrs", args.qrs)
        .with_text("qt", args.qt)
        .with_text("vr", args.vr);

    let result = predictor.handle_prediction(&raw)?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn infer(args: InferArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args.policy)?;
    let predictor = load_predictor(&config)?;

    println!("Loading observations from: {}", args.observations.display());
    let observations = read_observations(&args.observations)?;
    println!("Loaded {} observations", observations.len());

    let records = predict_batch(&predictor, &observations);
    write_predictions(&args.output, &records)?;

    let summary = BatchSummary::of(&records);
    log::info!(
        "Batch complete: {} rows, {} predicted, {} rejected",
        summary.total,
        summary.succeeded,
        summary.failed
    );
    println!("Predictions saved to: {}", args.output.display());
    if summary.failed > 0 {
        println!(
            "{} of {} rows were rejected; see the 'error' column.",
            summary.failed, summary.total
        );
    }
    Ok(())
}

fn check_model(args: CheckModelArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model.display());
    let model = TrainedModel::load(&args.model)?;
    println!("Model OK: {}", model.summary());
    println!("Feature order: {}", model.config.feature_names.join(", "));
    Ok(())
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    if seconds < MINUTE {
        format!("{} seconds ago", seconds)
    } else if seconds < HOUR {
        format!("{:.1} minutes ago", seconds as f64 / MINUTE as f64)
    } else if seconds < DAY {
        format!("{:.1} hours ago", seconds as f64 / HOUR as f64)
    } else {
        format!("{:.1} days ago", seconds as f64 / DAY as f64)
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let build_timestamp: u64 = env!("LVEF_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("lvef {}", version);

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
