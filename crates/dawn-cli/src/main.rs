//! CLI entry point - the composition root.
//!
//! Parses configuration, wires the default stores, and runs the web
//! adapter until the process is stopped or an admin requests a restart
//! (exit code 75 tells the supervisor to relaunch).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dawn_web::{GatewayConfig, TlsPaths, bootstrap};

/// Exit code asking the supervisor for a relaunch.
const EXIT_RESTART: u8 = 75;

#[derive(Debug, Parser)]
#[command(name = "dawn", version = dawn_build_info::LONG_VERSION, about = "dawn voice assistant server")]
struct Cli {
    /// Listening port.
    #[arg(long, env = "DAWN_PORT", default_value_t = 8443)]
    port: u16,

    /// Bind address.
    #[arg(long, env = "DAWN_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Document root for the web UI.
    #[arg(long, env = "DAWN_WWW", default_value = "www")]
    document_root: PathBuf,

    /// TLS certificate path (PEM). Requires --tls-key.
    #[arg(long, env = "DAWN_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// TLS private key path (PEM).
    #[arg(long, env = "DAWN_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Refuse to start without TLS material.
    #[arg(long, env = "DAWN_REQUIRE_HTTPS", default_value_t = false)]
    require_https: bool,

    /// Maximum concurrent client sessions.
    #[arg(long, env = "DAWN_MAX_CLIENTS", default_value_t = 16)]
    max_clients: usize,

    /// Outbound audio chunk bound, in bytes.
    #[arg(long, env = "DAWN_AUDIO_CHUNK", default_value_t = 8192)]
    audio_chunk_bytes: usize,

    /// Seed an admin user as `username:password` (development only).
    #[arg(long, env = "DAWN_SEED_ADMIN")]
    seed_admin: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(restart) if restart => ExitCode::from(EXIT_RESTART),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    info!(version = dawn_build_info::LONG_VERSION, "starting dawn");

    let tls = match (cli.tls_cert, cli.tls_key) {
        (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
        _ => None,
    };

    let config = GatewayConfig {
        port: cli.port,
        bind_addr: cli.bind,
        document_root: cli.document_root,
        tls,
        require_https: cli.require_https,
        max_clients: cli.max_clients,
        audio_chunk_bytes: cli.audio_chunk_bytes,
        ..GatewayConfig::default()
    };

    let ctx = bootstrap(config)?;

    if let Some(seed) = cli.seed_admin.as_deref() {
        let Some((username, password)) = seed.split_once(':') else {
            anyhow::bail!("--seed-admin expects username:password");
        };
        dawn_web::bootstrap::seed_user(&ctx, username, password, true).await?;
    }

    let server = tokio::spawn(dawn_web::tls::serve(ctx.clone()));

    // run until the listener fails or an admin asks for a restart
    tokio::select! {
        result = server => {
            result??;
            Ok(false)
        }
        () = ctx.restart.notified() => {
            info!("restart requested, shutting down");
            Ok(true)
        }
    }
}
