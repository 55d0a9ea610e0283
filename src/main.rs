use anyhow::{Context, Result};
use clap::Parser;
use mw_upload::models::TransportMode;
use mw_upload::{Blob, Config, FileHandle, ProgressSink, UploadRequest, Uploader};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "mw-upload")]
#[command(about = "Upload a file through the MediaWiki action API")]
struct CliArgs {
    /// File to upload.
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Target file name on the wiki. Defaults to the local file name.
    #[arg(long)]
    filename: Option<String>,

    /// Upload comment.
    #[arg(long)]
    comment: Option<String>,

    /// Initial page text for new files.
    #[arg(long)]
    text: Option<String>,

    /// Watchlist behaviour (watch, preferences, nochange).
    #[arg(long)]
    watchlist: Option<String>,

    /// Ignore any warnings.
    #[arg(long)]
    ignore_warnings: bool,

    /// Submit through the form transport instead of streaming.
    #[arg(long)]
    legacy: bool,
}

impl CliArgs {
    fn target_name(&self) -> Option<String> {
        self.filename.clone().or_else(|| {
            self.path
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
        })
    }
}

async fn build_request(args: &CliArgs) -> Result<UploadRequest> {
    let file = if args.legacy {
        FileHandle::Reference(args.path.clone())
    } else {
        let data = tokio::fs::read(&args.path)
            .await
            .with_context(|| format!("Failed to read {}", args.path.display()))?;
        FileHandle::Blob(Blob::new(local_name(&args.path), data))
    };

    let mut request = UploadRequest::new(file);
    if let Some(filename) = args.target_name() {
        request = request.field("filename", filename);
    }
    for (key, value) in [
        ("comment", &args.comment),
        ("text", &args.text),
        ("watchlist", &args.watchlist),
    ] {
        if let Some(value) = value {
            request = request.field(key, value.clone());
        }
    }
    if args.ignore_warnings {
        request = request.field("ignorewarnings", "1");
    }
    Ok(request)
}

fn local_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("file")
        .to_string()
}

async fn run(args: CliArgs) -> Result<()> {
    let mut config = Config::from_env()?;
    if args.legacy {
        config.transport = TransportMode::Legacy;
    }

    let uploader = Uploader::from_config(&config)?;
    let request = build_request(&args).await?;

    let (progress, mut events) = ProgressSink::channel();
    let reporter = tokio::spawn(async move {
        while let Some(fraction) = events.recv().await {
            info!("Upload progress: {:.0}%", fraction * 100.0);
        }
    });

    let result = uploader.upload_with_progress(request, &progress).await;
    drop(progress);
    let _ = reporter.await;

    let reply = result?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mw_upload=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    info!(path = %args.path.display(), "Starting mw-upload");

    match run(args).await {
        Ok(()) => {
            info!("Upload finished");
            Ok(())
        }
        Err(e) => {
            error!("Upload failed: {}", e);
            std::process::exit(1);
        }
    }
}
