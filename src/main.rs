use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use bireus::download::HttpDownloadService;
use bireus::event::PatchEventListener;
use bireus::service::RepositoryService;
use bireus::version_graph::PatchHop;

#[derive(Parser)]
#[command(name = "bireus", about = "Incremental checkout of BiReUS binary repositories")]
struct Cli {
    /// Path to the repository root (contains the .bireus folder)
    #[arg(long, short, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the repository descriptor
    Info,
    /// Check out a specific version
    Checkout {
        /// Target version
        version: String,
    },
    /// Refresh metadata from the origin and check out the latest version
    CheckoutLatest,
}

/// Prints coarse progress to stdout; fine-grained events go to tracing.
struct ConsoleListener;

impl PatchEventListener for ConsoleListener {
    fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    fn checked_out_already(&self, version: &str) {
        println!("Version {version} is already checked out.");
    }

    fn found_patch_path(&self, hops: &[PatchHop]) {
        let route: Vec<&str> = std::iter::once(hops[0].from.as_str())
            .chain(hops.iter().map(|h| h.to.as_str()))
            .collect();
        println!("Patch path: {}", route.join(" -> "));
    }

    fn begin_download_patch(&self, url: &str) {
        println!("Downloading {url}...");
    }

    fn begin_apply_patch(&self, from_version: &str, to_version: &str) {
        println!("Applying patch {from_version} -> {to_version}...");
    }
}

fn open_service(repo: &Path) -> anyhow::Result<RepositoryService> {
    RepositoryService::open(
        repo,
        Box::new(HttpDownloadService::new()),
        Box::new(ConsoleListener),
    )
    .with_context(|| format!("Failed to open repository at {}", repo.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info => {
            let service = open_service(&cli.repo)?;
            let repo = service.repository();
            println!("Repository: {}", repo.name);
            println!("  Origin: {}", repo.url);
            println!("  Protocol: {}", repo.protocol_version);
            println!("  First version: {}", repo.first_version);
            println!("  Current version: {}", repo.current_version);
            println!("  Latest version: {}", repo.latest_version);
        }
        Commands::Checkout { version } => {
            let mut service = open_service(&cli.repo)?;

            let start = Instant::now();
            service.checkout(&version)?;
            let elapsed = start.elapsed();

            println!("Checked out {} in {:.3}s", version, elapsed.as_secs_f64());
        }
        Commands::CheckoutLatest => {
            let mut service = open_service(&cli.repo)?;

            let start = Instant::now();
            service.checkout_latest()?;
            let elapsed = start.elapsed();

            println!(
                "Checked out {} in {:.3}s",
                service.repository().current_version,
                elapsed.as_secs_f64()
            );
        }
    }

    Ok(())
}
