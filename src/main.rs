//! CLI entry point for awsutils.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncWriteExt, stdout};
use tracing::{debug, info};

use awsutils::config::ClientConfig;
use awsutils::engine::BodySink;
use awsutils::s3::{ByteRange, S3Client};
use awsutils::transfer::ResumableTransfer;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Object bytes and results go to stdout, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let mut config = ClientConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;
    debug!(?config, "configuration resolved");

    let client = config.s3_client().context("building client")?;
    let result = run(&client, cli.command).await;
    client.engine().pool().close_all();
    result
}

async fn run(client: &S3Client, command: Command) -> Result<()> {
    match command {
        Command::Get {
            bucket,
            key,
            output,
            range,
            verify,
        } => get(client, &bucket, &key, output.as_deref(), range, verify).await,
        Command::Put {
            bucket,
            key,
            file,
            chunk_size,
            verify,
        } => {
            let transfer = ResumableTransfer::new(client.clone())
                .with_chunk_size(chunk_size)?
                .with_verify(verify);
            let outcome = transfer
                .upload_file(&bucket, &key, &file)
                .await
                .with_context(|| format!("uploading {} to {bucket}/{key}", file.display()))?;
            print_json(&json!({
                "bucket": bucket,
                "key": key,
                "etag": outcome.etag,
                "size": outcome.size,
                "parts": outcome.parts,
            }))
        }
        Command::Head { bucket, key } => {
            let head = client
                .head_object(&bucket, &key)
                .await
                .with_context(|| format!("fetching metadata of {bucket}/{key}"))?;
            print_json(&json!({ "bucket": bucket, "key": key, "object": head }))
        }
        Command::Presign {
            bucket,
            key,
            expires,
        } => {
            let url = client
                .presign_get(&bucket, &key, expires)
                .with_context(|| format!("presigning {bucket}/{key}"))?;
            println!("{url}");
            Ok(())
        }
        Command::AbortUploads { bucket, prefix } => {
            let aborted = client
                .abort_pending_uploads(&bucket, prefix.as_deref())
                .await
                .with_context(|| format!("aborting uploads in {bucket}"))?;
            print_json(&json!({ "bucket": bucket, "aborted": aborted }))
        }
    }
}

async fn get(
    client: &S3Client,
    bucket: &str,
    key: &str,
    output: Option<&Path>,
    range: Option<ByteRange>,
    verify: bool,
) -> Result<()> {
    let sink = match output {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("creating {}", path.display()))?;
            Some(BodySink::custom(file))
        }
        None => None,
    };
    let transfer = ResumableTransfer::new(client.clone()).with_verify(verify);
    let mut outcome = transfer
        .download(bucket, key, range, sink)
        .await
        .with_context(|| format!("downloading {bucket}/{key}"))?;

    if output.is_some() {
        return print_json(&json!({
            "bucket": bucket,
            "key": key,
            "etag": outcome.etag,
            "bytes": outcome.range.downloaded,
            "resumes": outcome.resumes,
            "verified": outcome.verified,
        }));
    }
    let bytes = outcome
        .sink
        .read_all()
        .await
        .context("reading downloaded body")?;
    let mut out = stdout();
    out.write_all(&bytes).await.context("writing to stdout")?;
    out.flush().await.context("writing to stdout")?;
    info!(bytes = bytes.len(), "object written to stdout");
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
