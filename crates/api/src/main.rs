// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{convert::Infallible, error::Error, sync::Arc};

use chalbox_manager::ChallengeManager;
use chalbox_manager::db::Store;
use chalbox_manager::ports::TcpPortProbe;
use chalbox_manager::runtime::ComposeDriver;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

mod config;
mod error;
mod handlers;
mod routes;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Err(e) = dotenv
        && !e.not_found()
    {
        tracing::warn!("Failed to load .env file: {e}");
    }

    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let store = Store::open(&config.database_url).await?;
    // Generates missing settings before the first request
    let settings = store.load_settings().await?;
    tracing::info!(
        "Serving instances on {}://{} from ports {:?}",
        settings.public_scheme,
        settings.public_host,
        settings.port_ranges
    );

    let runtime = ComposeDriver::from_command_line(&config.compose_command)?;
    let manager = Arc::new(ChallengeManager::new(
        store,
        &config.data_dir,
        Arc::new(runtime),
        Arc::new(TcpPortProbe),
    ));

    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!("Listening on http://{}", config.listen_addr);
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Failed to accept connection: {e}");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let manager = manager.clone();

        tokio::spawn(async move {
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(
                    io,
                    service_fn(move |req| {
                        let manager = manager.clone();
                        async move { Ok::<_, Infallible>(routes::handle(manager, req).await) }
                    }),
                )
                .await
            {
                tracing::error!("Error serving connection from {remote_addr}: {e}");
            }
        });
    }
}
