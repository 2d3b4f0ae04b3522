//! Moodsense CLI - Command-line interface for the mood inference pipeline
//!
//! Commands:
//! - normalize: Normalize daily aggregates into feature vectors (offline)
//! - infer: Run the full daily pipeline against an inference endpoint
//! - interpret: Interpret a raw model response into an MEA outcome
//! - doctor: Diagnose configuration and queue state

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use moodsense::hashing::features_hash_daily;
use moodsense::normalizer::FEATURE_VERSION;
use moodsense::types::MoodPrediction;
use moodsense::{
    ClientConfig, DailyAggregates, FeatureExtractor, InferenceError, MoodPipeline, Normalizer,
    ResponseInterpreter, ENGINE_VERSION, PRODUCER_NAME,
};

/// Moodsense - On-device mood inference for physiological time series
#[derive(Parser)]
#[command(name = "moodsense")]
#[command(author = "Synheart AI Inc")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Turn daily health aggregates into mood predictions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize daily aggregates into [0,1] feature vectors (offline)
    Normalize {
        /// Input file path with NDJSON aggregates, one day per line (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Run the daily pipeline end to end against an inference endpoint
    Infer {
        /// Input file path with NDJSON aggregates, one day per line (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Full URL of the inference endpoint
        #[arg(long)]
        endpoint: String,

        /// API key (falls back to MOODSENSE_API_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// User the predictions belong to
        #[arg(long)]
        user: String,

        /// Per-attempt timeout in milliseconds
        #[arg(long, default_value = "8000")]
        timeout_ms: u64,

        /// Retry attempts after the initial call
        #[arg(long, default_value = "3")]
        max_retries: usize,

        /// Load queue state from file before running
        #[arg(long)]
        load_queue: Option<PathBuf>,

        /// Save queue state to file after running
        #[arg(long)]
        save_queue: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Interpret a raw model response into an MEA outcome
    Interpret {
        /// Input file path with one JSON response envelope (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Diagnose configuration and queue state
    Doctor {
        /// Check a saved queue state file
        #[arg(long)]
        queue: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), MoodCliError> {
    match cli.command {
        Commands::Normalize {
            input,
            output,
            output_format,
        } => cmd_normalize(&input, &output, output_format),

        Commands::Infer {
            input,
            endpoint,
            api_key,
            user,
            timeout_ms,
            max_retries,
            load_queue,
            save_queue,
            output_format,
        } => {
            cmd_infer(
                &input,
                &endpoint,
                api_key,
                &user,
                timeout_ms,
                max_retries,
                load_queue.as_deref(),
                save_queue.as_deref(),
                output_format,
            )
            .await
        }

        Commands::Interpret { input } => cmd_interpret(&input),

        Commands::Doctor { queue, json } => cmd_doctor(queue.as_deref(), json),
    }
}

fn read_input(input: &PathBuf) -> Result<String, MoodCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(MoodCliError::StdinIsTty);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_aggregates(input_data: &str) -> Result<Vec<DailyAggregates>, MoodCliError> {
    let mut records = Vec::new();
    for (index, line) in input_data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: DailyAggregates = serde_json::from_str(trimmed).map_err(|e| {
            MoodCliError::ParseError(format!("line {}: {}", index + 1, e))
        })?;
        records.push(record);
    }
    if records.is_empty() {
        return Err(MoodCliError::NoRecords);
    }
    Ok(records)
}

fn write_output<T: serde::Serialize>(
    output: &PathBuf,
    records: &[T],
    format: OutputFormat,
) -> Result<(), MoodCliError> {
    let rendered = match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            lines.join("\n") + "\n"
        }
        OutputFormat::Json => serde_json::to_string(records)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(records)?,
    };

    if output.to_string_lossy() == "-" {
        print!("{rendered}");
    } else {
        fs::write(output, rendered)?;
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct NormalizedRecord {
    date: String,
    feature_version: &'static str,
    features: Vec<f64>,
    features_hash: String,
}

fn cmd_normalize(
    input: &PathBuf,
    output: &PathBuf,
    output_format: OutputFormat,
) -> Result<(), MoodCliError> {
    let records = parse_aggregates(&read_input(input)?)?;

    let normalized: Vec<NormalizedRecord> = records
        .iter()
        .map(|aggregates| {
            let features = FeatureExtractor::extract(aggregates);
            let vector = Normalizer::normalize(&features);
            NormalizedRecord {
                date: features.date.clone(),
                feature_version: FEATURE_VERSION,
                features: vector.as_slice().to_vec(),
                features_hash: features_hash_daily(FEATURE_VERSION, &vector),
            }
        })
        .collect();

    write_output(output, &normalized, output_format)
}

async fn cmd_infer(
    input: &PathBuf,
    endpoint: &str,
    api_key: Option<String>,
    user: &str,
    timeout_ms: u64,
    max_retries: usize,
    load_queue: Option<&std::path::Path>,
    save_queue: Option<&std::path::Path>,
    output_format: OutputFormat,
) -> Result<(), MoodCliError> {
    let records = parse_aggregates(&read_input(input)?)?;

    let mut config = ClientConfig::new(endpoint);
    config.api_key = api_key.or_else(|| std::env::var("MOODSENSE_API_KEY").ok());
    config.timeout_ms = timeout_ms;
    config.max_retries = max_retries;

    let mut pipeline = MoodPipeline::new(config)?;

    if let Some(queue_path) = load_queue {
        let queue_json = fs::read_to_string(queue_path)?;
        pipeline.load_queue(&queue_json)?;
    }

    let mut predictions: Vec<MoodPrediction> = Vec::new();
    for aggregates in &records {
        predictions.push(pipeline.run_daily(user, aggregates).await?);
    }

    if let Some(queue_path) = save_queue {
        let queue_json = pipeline.save_queue().await?;
        fs::write(queue_path, queue_json)?;
    }

    write_output(&PathBuf::from("-"), &predictions, output_format)
}

fn cmd_interpret(input: &PathBuf) -> Result<(), MoodCliError> {
    let input_data = read_input(input)?;
    let response = serde_json::from_str(&input_data)
        .map_err(|e| MoodCliError::ParseError(format!("response envelope: {e}")))?;

    let outcome = ResponseInterpreter::new().interpret(&response)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn cmd_doctor(queue: Option<&std::path::Path>, json: bool) -> Result<(), MoodCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("moodsense version {ENGINE_VERSION}"),
    });

    checks.push(DoctorCheck {
        name: "feature_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Daily feature table: {FEATURE_VERSION} (12 features)"),
    });

    checks.push(DoctorCheck {
        name: "api_key".to_string(),
        status: if std::env::var("MOODSENSE_API_KEY").is_ok() {
            CheckStatus::Ok
        } else {
            CheckStatus::Warning
        },
        message: if std::env::var("MOODSENSE_API_KEY").is_ok() {
            "MOODSENSE_API_KEY is set".to_string()
        } else {
            "MOODSENSE_API_KEY not set; infer will send unauthenticated requests".to_string()
        },
    });

    if let Some(queue_path) = queue {
        if queue_path.exists() {
            match fs::read_to_string(queue_path) {
                Ok(content) => match moodsense::SyncQueue::from_json(&content) {
                    Ok(_) => checks.push(DoctorCheck {
                        name: "queue".to_string(),
                        status: CheckStatus::Ok,
                        message: "Queue state file is valid".to_string(),
                    }),
                    Err(e) => checks.push(DoctorCheck {
                        name: "queue".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid queue state: {e}"),
                    }),
                },
                Err(e) => checks.push(DoctorCheck {
                    name: "queue".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read queue state file: {e}"),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "queue".to_string(),
                status: CheckStatus::Warning,
                message: "Queue state file does not exist".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Moodsense Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(MoodCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum MoodCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Pipeline(InferenceError),
    ParseError(String),
    NoRecords,
    StdinIsTty,
    DoctorFailed,
}

impl From<io::Error> for MoodCliError {
    fn from(e: io::Error) -> Self {
        MoodCliError::Io(e)
    }
}

impl From<serde_json::Error> for MoodCliError {
    fn from(e: serde_json::Error) -> Self {
        MoodCliError::Json(e)
    }
}

impl From<InferenceError> for MoodCliError {
    fn from(e: InferenceError) -> Self {
        MoodCliError::Pipeline(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MoodCliError> for CliError {
    fn from(e: MoodCliError) -> Self {
        match e {
            MoodCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MoodCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            MoodCliError::Pipeline(e) => CliError {
                code: "PIPELINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check endpoint, credentials, and input values".to_string()),
            },
            MoodCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Expected NDJSON daily aggregates, one day per line".to_string()),
            },
            MoodCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            MoodCliError::StdinIsTty => CliError {
                code: "STDIN_IS_TTY".to_string(),
                message: "Refusing to read input from an interactive terminal".to_string(),
                hint: Some("Pipe data in or pass a file with --input".to_string()),
            },
            MoodCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
