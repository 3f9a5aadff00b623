use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use isoport_runtime::{run_stdio_worker, Dispatcher};
use isoport_server::cli::{BackendArgs, Cli, Command, ServeArgs};
use isoport_server::config::{BackendSettings, ServerConfig};
use isoport_server::{grpc, jsonrpc, registry};
use tokio_util::sync::CancellationToken;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args),
        Command::Worker { log, backends } => worker(log, backends),
    }
}

/// Child side of process isolation. stdout carries the result line, so logs
/// go to stderr.
fn worker(log: String, backends: BackendArgs) -> Result<()> {
    std::env::set_var("RUST_LOG", &log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = BackendSettings::from_args(&backends)?;
    let backends = registry::build_backends(&settings);
    run_stdio_worker(&backends).context("worker i/o failed")
}

#[tokio::main]
async fn serve(args: ServeArgs) -> Result<()> {
    std::env::set_var("RUST_LOG", &args.log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_args(&args)?;
    let backends = Arc::new(registry::build_backends(&config.backends));
    tracing::info!(
        backends = ?backends.names(),
        isolation = ?args.isolation,
        max_workers = config.dispatcher.max_in_flight,
        timeout = ?config.dispatcher.timeout,
        "dispatcher ready"
    );
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.clone(), backends));

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    // gRPC server
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(isoport_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .map_err(|e| anyhow::anyhow!("reflection build failed: {e}"))?;
    let grpc_shutdown = shutdown.clone();
    let grpc = tonic::transport::Server::builder()
        .add_service(grpc::spleeter_service(dispatcher.clone()))
        .add_service(reflection)
        .serve_with_shutdown(config.grpc_addr, async move {
            grpc_shutdown.cancelled().await
        });
    tracing::info!(addr = %config.grpc_addr, "isoportd gRPC listening");

    // JSON-RPC server
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    let http_shutdown = shutdown.clone();
    let http = axum::serve(listener, jsonrpc::router(dispatcher.clone()))
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await });
    tracing::info!(addr = %config.http_addr, "isoportd JSON-RPC listening");

    tokio::try_join!(
        async { grpc.await.context("gRPC server failed") },
        async { http.await.context("JSON-RPC server failed") },
    )?;

    tracing::info!("isoportd stopped");
    Ok(())
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        return;
    }
    tracing::info!("shutdown requested; cancelling in-flight calls");
    shutdown.cancel();
}
