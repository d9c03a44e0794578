//! `client-crypto`: command-line client for client-side encrypted buckets.
//!
//! Startup sequence:
//! 1. Parse the command line.
//! 2. Load and validate [`Config`] from `CLIENT_CRYPTO_*` variables.
//! 3. Initialise tracing (and OTLP export when configured).
//! 4. Initialise AWS SDK clients and assemble the [`CryptoBucket`].
//! 5. Run the subcommand.

use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Semaphore,
    task::JoinSet,
};
use tracing::{info, warn};

use client_crypto::{
    aws::AwsClients,
    bucket::{CryptoBucket, MultipartUpload},
    config::Config,
    master::{AwsKmsClient, DirectoryResolver, KmsClient},
    telemetry,
    transport::{ByteReader, S3Transport, UploadedPart},
};
use common::protocol::{ByteRange, Metadata, ObjectAttributes};

#[derive(Parser)]
#[command(name = "client-crypto")]
#[command(about = "Client-side encrypted object storage")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file and upload it as one object.
    Put {
        /// Object key.
        #[arg(short, long)]
        key: String,

        /// Source file.
        #[arg(short, long)]
        file: PathBuf,

        /// Base64 MD5 of the file, recorded in the envelope.
        #[arg(long)]
        content_md5: Option<String>,

        /// User metadata as `name=value`; may be repeated.
        #[arg(short, long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Encrypt a file and upload it in parts, several at a time.
    PutMultipart {
        /// Object key.
        #[arg(short, long)]
        key: String,

        /// Source file.
        #[arg(short, long)]
        file: PathBuf,

        /// User metadata as `name=value`; may be repeated.
        #[arg(short, long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Download and decrypt an object.
    Get {
        /// Object key.
        #[arg(short, long)]
        key: String,

        /// Destination file.
        #[arg(short, long)]
        output: PathBuf,

        /// Byte range, `start-end` (inclusive) or `start-`.
        #[arg(short, long, value_parser = parse_range, conflicts_with = "part")]
        range: Option<ByteRange>,

        /// Read only this part of a multipart-uploaded object.
        #[arg(short, long)]
        part: Option<u32>,
    },

    /// Print an object's attributes and envelope summary as JSON.
    Head {
        /// Object key.
        #[arg(short, long)]
        key: String,
    },
}

fn parse_meta(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_owned(), v.to_owned()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got {s:?}"))
}

fn parse_range(s: &str) -> std::result::Result<ByteRange, String> {
    ByteRange::parse(s).ok_or_else(|| format!("invalid byte range {s:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bucket = %cfg.s3_bucket,
        wrap_mode = ?cfg.wrap_mode,
        "client-crypto starting"
    );

    let bucket = build_bucket(&cfg).await?;
    let result = run(cli.command, &bucket, &cfg).await;
    telemetry::shutdown_telemetry();
    result
}

async fn build_bucket(cfg: &Config) -> Result<CryptoBucket> {
    let aws = AwsClients::init(cfg.region.as_deref(), cfg.s3_endpoint_url.as_deref()).await?;
    let kms: Arc<dyn KmsClient> = Arc::new(AwsKmsClient::new(aws.kms.clone()));

    let master = cfg.master_key(Some(Arc::clone(&kms)))?;
    let transport = Arc::new(S3Transport::new(aws.s3.clone(), cfg.s3_bucket.clone()));
    let mut bucket = CryptoBucket::new(transport, master)
        .strict_material_descriptor(cfg.strict_material_descriptor);

    if let Some(directory) = cfg.key_directory()? {
        info!(entries = directory.len(), "key directory loaded");
        let resolver = DirectoryResolver::new(Arc::new(directory), Some(kms));
        bucket = bucket.with_resolver(Arc::new(resolver));
    }
    Ok(bucket)
}

async fn run(command: Commands, bucket: &CryptoBucket, cfg: &Config) -> Result<()> {
    match command {
        Commands::Put {
            key,
            file,
            content_md5,
            meta,
        } => {
            let attributes = ObjectAttributes {
                content_length: None,
                content_md5,
                metadata: meta.into_iter().collect(),
            };
            bucket
                .put_object_from_file(&key, &file, attributes)
                .await
                .with_context(|| format!("failed to upload {} to {key}", file.display()))?;
        }
        Commands::PutMultipart { key, file, meta } => {
            put_multipart(bucket, cfg, &key, &file, meta.into_iter().collect()).await?;
        }
        Commands::Get {
            key,
            output,
            range,
            part,
        } => {
            let written = match part {
                Some(part_number) => {
                    let mut object = bucket
                        .get_object_part(&key, part_number)
                        .await
                        .with_context(|| format!("failed to read part {part_number} of {key}"))?;
                    let mut out = tokio::fs::File::create(&output).await?;
                    let n = tokio::io::copy(&mut object.body, &mut out).await?;
                    out.flush().await?;
                    n
                }
                None => bucket
                    .get_object_to_file(&key, range, &output)
                    .await
                    .with_context(|| format!("failed to download {key}"))?,
            };
            info!(key = %key, bytes = written, output = %output.display(), "object downloaded");
        }
        Commands::Head { key } => {
            let head = bucket
                .head_object(&key)
                .await
                .with_context(|| format!("failed to inspect {key}"))?;
            let summary = serde_json::json!({
                "key": key,
                "content_length": head.attributes.content_length,
                "content_md5": head.attributes.content_md5,
                "metadata": head.attributes.metadata,
                "encrypted": head.envelope.is_some(),
                "wrap_algorithm": head.envelope.as_ref().map(|e| e.wrap_algorithm.as_str()),
                "content_algorithm": head.envelope.as_ref().map(|e| e.content_algorithm.as_str()),
                "material_descriptor": head.envelope.as_ref().map(|e| e.material_descriptor.as_str()),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

async fn put_multipart(
    bucket: &CryptoBucket,
    cfg: &Config,
    key: &str,
    file: &Path,
    metadata: Metadata,
) -> Result<()> {
    let size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("failed to stat {}", file.display()))?
        .len();
    let upload = Arc::new(
        bucket
            .initiate_multipart_upload(key, Some(size), cfg.part_size, metadata)
            .await
            .with_context(|| format!("failed to start multipart upload of {key}"))?,
    );

    match upload_parts(bucket, &upload, file, cfg.upload_concurrency).await {
        Ok(parts) => {
            bucket.complete_multipart_upload(&upload, parts).await?;
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, key, "part upload failed; aborting multipart upload");
            if let Err(abort) = bucket.abort_multipart_upload(&upload).await {
                warn!(error = %abort, key, "abort failed; parts may linger");
            }
            Err(e)
        }
    }
}

/// Upload every part with at most `concurrency` in flight. The first failure
/// cancels the remaining tasks.
async fn upload_parts(
    bucket: &CryptoBucket,
    upload: &Arc<MultipartUpload>,
    file: &Path,
    concurrency: usize,
) -> Result<Vec<UploadedPart>> {
    let count = upload
        .context
        .part_count()
        .context("object has too many parts for the configured part size")?;
    let limit = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    for part_number in 1..=count {
        let bucket = bucket.clone();
        let upload = Arc::clone(upload);
        let limit = Arc::clone(&limit);
        let path = file.to_path_buf();
        tasks.spawn(async move {
            let _permit = limit.acquire_owned().await?;
            let offset = upload.context.part_offset(part_number)?;
            let len = upload.context.part_len(part_number).unwrap_or(0);

            let mut source = tokio::fs::File::open(&path).await?;
            source.seek(SeekFrom::Start(offset)).await?;
            let body: ByteReader = Box::pin(source.take(len));
            let part = bucket.upload_part(&upload, part_number, body, len).await?;
            Ok::<_, anyhow::Error>(part)
        });
    }

    let mut parts = Vec::with_capacity(count as usize);
    while let Some(joined) = tasks.join_next().await {
        let part = joined.context("part upload task failed")??;
        parts.push(part);
    }
    Ok(parts)
}
