//! cloudmirror: mirror a local directory into a remote object store.
//!
//! ```text
//! cloudmirror <local-dir> --config <file.json> [--path P] [--delete] [--only-delete]
//!             [--dry-run] [--concurrency N] [--timeout-ms N] [--checksums] [--json]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use cloudmirror_lib::config::AppConfig;
use cloudmirror_lib::core::{LocalScanner, ScanConfig, SyncEngine, SyncEvent};
use cloudmirror_lib::logging::init_logging;
use cloudmirror_lib::storage::{create_store, LocalSource};

#[derive(Parser, Debug)]
#[command(
    name = "cloudmirror",
    version,
    about = "Mirror a local directory into a remote object store",
    long_about = None,
)]
struct Cli {
    /// Local directory to upload
    local_dir: PathBuf,

    /// JSON config file with the store definition and sync defaults
    #[arg(long, short)]
    config: PathBuf,

    /// Remote directory to sync into (overrides the config file)
    #[arg(long)]
    path: Option<String>,

    /// Remove remote entries absent from the local directory
    #[arg(long)]
    delete: bool,

    /// Only remove remote orphans, upload nothing
    #[arg(long)]
    only_delete: bool,

    /// Walk and compare without changing the remote
    #[arg(long, short = 'n')]
    dry_run: bool,

    /// Maximum number of concurrent remote operations
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-operation timeout warning in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Compute local MD5 digests while scanning
    #[arg(long)]
    checksums: bool,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(&cli.config)?;
    let _guard = init_logging(&config.log);

    let mut options = config.sync;
    if let Some(path) = cli.path {
        options.path = path;
    }
    options.delete |= cli.delete;
    options.only_delete |= cli.only_delete;
    options.dry_run |= cli.dry_run;
    if let Some(n) = cli.concurrency {
        options.concurrency = n;
    }
    if cli.timeout_ms.is_some() {
        options.timeout_ms = cli.timeout_ms;
    }

    let store_config = config
        .store
        .context("config file has no \"store\" section")?;
    let store = create_store(&store_config)?;

    let scan = ScanConfig {
        checksums: cli.checksums,
        ..Default::default()
    };
    let manifest = LocalScanner::with_config(&cli.local_dir, scan).scan().await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SyncEvent::File { name, status, .. } => println!("{status:>6}  {name}"),
                SyncEvent::Deleted { path, .. } => println!("delete  {path}"),
                SyncEvent::TimedOut { label, error } => eprintln!("slow    {label}: {error}"),
                _ => {}
            }
        }
    });

    let mut builder = SyncEngine::builder(manifest, options)
        .store(store)
        .source(LocalSource::new(&cli.local_dir))
        .events(tx);
    if !cli.checksums {
        // 两边都没有摘要时按需计算本地 MD5
        builder = builder.checksum_fetch(LocalSource::new(&cli.local_dir));
    }
    let report = builder.build()?.run().await;
    // 引擎结束后发送端已释放
    let _ = printer.await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let summary = report.summary();
        println!(
            "{} sent, {} unchanged, {} deleted, {} failed in {:?}",
            summary.sent,
            summary.matched,
            summary.deleted,
            summary.failed,
            report.duration()
        );
    }

    if let Some(err) = &report.first_error {
        eprintln!("first error: {err}");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
