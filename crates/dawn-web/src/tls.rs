//! Listener setup: plain HTTP or TLS with ALPN pinned to HTTP/1.1.
//!
//! The pin matters: WebSocket over HTTP/2 trips frame-size limits on large
//! transcript replays, so when TLS is on we advertise only `http/1.1`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum_server::tls_rustls::RustlsConfig;
use tokio::fs;
use tracing::info;

use crate::bootstrap::{ServerContext, TlsPaths};
use crate::outbound;
use crate::routes::create_router;

/// Bind and serve until the process ends. Spawns the outbound dispatcher
/// and the expiry sweep alongside the listener.
pub async fn serve(ctx: Arc<ServerContext>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.bind_addr, ctx.config.port)
        .parse()
        .context("parsing bind address")?;

    tokio::spawn(outbound::dispatch_loop(Arc::clone(&ctx)));
    tokio::spawn(outbound::sweep_loop(Arc::clone(&ctx)));

    let tls = ctx.config.tls.clone();
    let app = create_router(Arc::clone(&ctx))
        .into_make_service_with_connect_info::<SocketAddr>();

    match tls {
        Some(paths) => {
            let config = rustls_config(&paths).await?;
            info!(%addr, "listening with TLS (ALPN http/1.1)");
            axum_server::bind_rustls(addr, config)
                .serve(app)
                .await
                .context("TLS server error")
        }
        None => {
            info!(%addr, "listening without TLS");
            axum_server::bind(addr)
                .serve(app)
                .await
                .context("server error")
        }
    }
}

/// Load certificate material and pin ALPN to `http/1.1`.
async fn rustls_config(paths: &TlsPaths) -> Result<RustlsConfig> {
    let cert_pem = fs::read(&paths.cert)
        .await
        .with_context(|| format!("reading certificate {}", paths.cert.display()))?;
    let key_pem = fs::read(&paths.key)
        .await
        .with_context(|| format!("reading key {}", paths.key.display()))?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .context("parsing certificate PEM")?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .context("parsing key PEM")?
        .context("no private key in PEM")?;

    let mut server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS config")?;
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}
