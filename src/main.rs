//! Command line interface for operating the login service. Supports
//! initializing the identity store, serving the HTTP login endpoint, and
//! offline verification of candidate NIP-98 events.

mod config;
mod directory;
mod event;
mod identity;
mod server;
mod verify;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::bail;
use clap::{Parser, Subcommand};
use config::Settings;
use directory::FileDirectory;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "authstr",
    author,
    version,
    about = "Nostr NIP-98 login verification service",
    short_flag = 'v',
    long_flag = "version"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the identity store at `STORE_ROOT`.
    Init,
    /// Launch the HTTP login endpoint.
    Serve,
    /// Verify a candidate event file against the configured login URL.
    Verify {
        /// Path to a JSON event file.
        file: String,
        /// Expected URL; defaults to `AUTH_URL` from the environment.
        #[arg(long)]
        url: Option<String>,
        /// Expected HTTP method.
        #[arg(long, default_value = "POST")]
        method: String,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let store = FileDirectory::open(cfg.store_root.clone())?;
    match cli.command {
        Commands::Init => {
            // Create the on-disk directory structure.
            store.init()?;
        }
        Commands::Serve => {
            // Initialize storage then start the HTTP server.
            store.init()?;
            let http_addr: SocketAddr = cfg.bind_http.as_str().parse()?;
            server::serve_http(http_addr, store, cfg, std::future::pending()).await?;
        }
        Commands::Verify { file, url, method } => {
            let raw = fs::read_to_string(&file)?;
            let ctx = verify::VerificationContext {
                expected_url: url.unwrap_or(cfg.auth_url),
                expected_method: method,
                now: verify::unix_now(),
            };
            match verify::verify(&raw, &ctx) {
                Ok(claim) => println!("verified pubkey {}", claim.pubkey),
                Err(e) => bail!("rejected: {e}"),
            }
        }
    }
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("authstr-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:7777\n");
    content.push_str("AUTH_URL=http://127.0.0.1:7777/login\n");
    content.push_str("RELAYS=\n");
    content.push_str("VERBOSE=0\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
