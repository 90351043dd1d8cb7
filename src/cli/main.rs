use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "accident-risk-cli")]
#[command(about = "Accident Risk CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "ACCIDENT_RISK_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on every stored record
    Train {
        /// Label column; falls back to any column containing ACCIDENTE
        #[arg(short, long)]
        target_col: Option<String>,

        #[arg(long)]
        model_filename: Option<String>,

        #[arg(long)]
        metrics_filename: Option<String>,
    },

    /// Predict records from a JSON file (one object or a list)
    Predict {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Show persisted model facts and metrics
    ModelInfo,

    /// Score a CSV file
    BatchPredict {
        #[arg(value_name = "CSV")]
        file: PathBuf,

        #[arg(short, long)]
        threshold: Option<f64>,

        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Where to write the annotated CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload full records from CSV and retrain
    Upload {
        #[arg(value_name = "CSV")]
        file: PathBuf,

        /// Skip the automatic retrain
        #[arg(long)]
        no_train: bool,
    },

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Train {
            target_col,
            model_filename,
            metrics_filename,
        } => {
            let response = client
                .post(format!("{}/api/train-model/", cli.endpoint))
                .json(&json!({
                    "target_col": target_col,
                    "model_filename": model_filename,
                    "metrics_filename": metrics_filename,
                }))
                .send()
                .await?;
            print_json(response).await?;
        }

        Commands::Predict { file, threshold } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let data: Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            let response = client
                .post(format!("{}/api/predict/", cli.endpoint))
                .json(&json!({ "data": data, "threshold": threshold }))
                .send()
                .await?;
            print_json(response).await?;
        }

        Commands::ModelInfo => {
            let response = client
                .get(format!("{}/api/model-info/", cli.endpoint))
                .send()
                .await?;
            print_json(response).await?;
        }

        Commands::BatchPredict {
            file,
            threshold,
            format,
            output,
        } => {
            let mut form = csv_form(&file)?.text(
                "output_format",
                match format {
                    OutputFormat::Json => "json",
                    OutputFormat::Csv => "csv",
                },
            );
            if let Some(t) = threshold {
                form = form.text("threshold", t.to_string());
            }

            let response = client
                .post(format!("{}/api/batch-predict/", cli.endpoint))
                .multipart(form)
                .send()
                .await?;

            match format {
                OutputFormat::Csv if response.status().is_success() => {
                    let bytes = response.bytes().await?;
                    match output {
                        Some(path) => {
                            std::fs::write(&path, &bytes)
                                .with_context(|| format!("writing {}", path.display()))?;
                            println!("Predictions written to {}", path.display());
                        }
                        None => print!("{}", String::from_utf8_lossy(&bytes)),
                    }
                }
                _ => print_json(response).await?,
            }
        }

        Commands::Upload { file, no_train } => {
            let form = csv_form(&file)?.text("auto_train", (!no_train).to_string());
            let response = client
                .post(format!("{}/api/upload-and-train/", cli.endpoint))
                .multipart(form)
                .send()
                .await?;
            print_json(response).await?;
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;
            print_json(response).await?;
        }
    }

    Ok(())
}

fn csv_form(path: &Path) -> Result<Form> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string());
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let part = Part::bytes(bytes)
        .file_name(name)
        .mime_str("text/csv")?;
    Ok(Form::new().part("file", part))
}

async fn print_json(response: Response) -> Result<()> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .context("server returned a non-JSON body")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        bail!("request failed with status {}", status);
    }
    Ok(())
}
