use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "absen", about = "Face attendance client for absend")]
struct Cli {
    /// Base URL of the absend server
    #[arg(long, env = "ABSEN_SERVER", default_value = "http://127.0.0.1:8000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a user's face from an image file
    Enroll {
        user_id: String,
        image: PathBuf,
    },
    /// Start a liveness session and print the challenge
    Start,
    /// Submit a liveness frame for a session
    Verify {
        session_id: String,
        image: PathBuf,
    },
    /// Check in with a verified session
    Submit {
        session_id: String,
        image: PathBuf,
    },
    /// Show server status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base = cli.server.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    let request = match cli.command {
        Commands::Enroll { user_id, image } => {
            let form = Form::new().text("user_id", user_id).part("image", image_part(&image).await?);
            client.post(format!("{base}/enroll")).multipart(form)
        }
        Commands::Start => client.post(format!("{base}/liveness/start")),
        Commands::Verify { session_id, image } => {
            let form = Form::new().text("session_id", session_id).part("image", image_part(&image).await?);
            client.post(format!("{base}/liveness/verify")).multipart(form)
        }
        Commands::Submit { session_id, image } => {
            let form = Form::new().text("session_id", session_id).part("image", image_part(&image).await?);
            client.post(format!("{base}/absen")).multipart(form)
        }
        Commands::Status => client.get(format!("{base}/status")),
    };

    tracing::debug!(server = %base, "sending request");
    let response = request
        .send()
        .await
        .with_context(|| format!("cannot reach absend at {base}"))?;
    let status = response.status();
    let body: Value = response.json().await.context("server returned a non-JSON body")?;

    if !status.is_success() {
        let detail = body.get("detail").and_then(Value::as_str).unwrap_or("request failed");
        bail!("{status}: {detail}");
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn image_part(path: &Path) -> Result<Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading image {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(Part::bytes(bytes).file_name(file_name))
}
