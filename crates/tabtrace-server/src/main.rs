//! tabtrace server
//!
//! HTTP ingestion, tree reconciliation, memory-enhanced classification and
//! dual-store persistence for a stream of browser visits, plus a
//! line-framed JSON retrieval tool channel over stdio for `semantic_search`
//! and `get_content`.

mod consumer;
mod discovery;
mod ingress;
mod tool_channel;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use tabtrace_core::classifier::{LmClassifier, OpenAiClassifier, Pipeline, PooledLmClassifier, StaticClassifier};
use tabtrace_core::config::Config;
use tabtrace_core::coordinator::Coordinator;
use tabtrace_core::embeddings::{CachingEmbedder, EmbeddingService, Embedder};
use tabtrace_core::engine::Engine;
use tabtrace_core::model::Classification;
use tabtrace_core::queue;
use tabtrace_core::reconciler::Reconciler;
use tabtrace_core::storage::Storage;
use tabtrace_core::vectorstore::VectorStore;

/// CLI overrides layered on top of `Config::from_env()`, parsed by hand —
/// no argument-parsing crate for the main binary.
struct CliArgs {
    storage_path: Option<PathBuf>,
    port: Option<u16>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut storage_path = None;
    let mut port = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("tabtrace-server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("HTTP ingestion and retrieval server for browsing history.");
                println!();
                println!("USAGE:");
                println!("    tabtrace-server [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --storage-path <PATH>   Custom data directory");
                println!("    --port <N>              HTTP listen port (default 5000)");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                Log level filter (e.g., debug, info, warn, error)");
                println!("    OPENAI_API_KEY          Enables the LM classification stage");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("tabtrace-server {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--storage-path" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --storage-path requires a path argument");
                    std::process::exit(1);
                }
                storage_path = Some(PathBuf::from(&args[i]));
            }
            "--port" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --port requires a value");
                    std::process::exit(1);
                }
                match args[i].parse() {
                    Ok(p) => port = Some(p),
                    Err(_) => {
                        eprintln!("error: --port must be a number");
                        std::process::exit(1);
                    }
                }
            }
            arg => {
                eprintln!("error: unknown argument '{arg}'");
                eprintln!("Try 'tabtrace-server --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    CliArgs { storage_path, port }
}

#[tokio::main]
async fn main() {
    let cli = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    let mut config = Config::from_env();
    if let Some(path) = cli.storage_path {
        config.storage_path = path;
    }
    if let Some(port) = cli.port {
        config.http_port = port;
    }

    info!("tabtrace server v{} starting", env!("CARGO_PKG_VERSION"));

    // Scoped resources acquired in order: structured store, vector index,
    // HTTP listener, discovery file, LM task pool. Shutdown reverses this.
    let storage = match Storage::new(Some(config.storage_path.clone())) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open structured store: {e}");
            std::process::exit(1);
        }
    };
    let vectors = match VectorStore::new(Some(config.storage_path.clone())) {
        Ok(v) => Arc::new(v),
        Err(e) => {
            error!("failed to open vector store: {e}");
            std::process::exit(1);
        }
    };

    let embeddings: Arc<dyn Embedder> = Arc::new(CachingEmbedder::new(EmbeddingService::new(), 1024));
    if embeddings.embed("readiness probe").is_err() {
        warn!("embedding service not ready; classification and search will degrade until the model loads");
    }

    let coordinator = Coordinator::new(storage.clone(), vectors.clone(), embeddings.clone());
    match coordinator.replay_unreconciled() {
        Ok(retried) if !retried.is_empty() => {
            warn!(count = retried.len(), "unreconciled ids remain orphaned after replay");
        }
        Ok(_) => {}
        Err(e) => error!("failed to replay unreconciled ids: {e}"),
    }

    let lm: Arc<dyn LmClassifier> = match &config.openai_api_key {
        Some(key) => Arc::new(OpenAiClassifier::new(key.clone(), config.lm_max_retries)),
        None => {
            warn!("OPENAI_API_KEY not set; LM classification stage degrades to a fixed 'other' response");
            Arc::new(StaticClassifier(tabtrace_core::classifier::LmResponse {
                page_type: Classification::Other,
                confidence: 0.0,
                reasoning: "lm_fail".to_string(),
                should_process: false,
            }))
        }
    };
    // Bounds concurrent classification calls across the consumer and retry
    // timer tasks, which both classify through this same handle.
    let lm: Arc<dyn LmClassifier> = Arc::new(PooledLmClassifier::new(lm, config.lm_pool_size));

    let reconciler = Reconciler::new(storage.clone());
    let pipeline = Pipeline::new(storage.clone(), embeddings.clone(), lm, config.clone());
    let engine = Arc::new(Engine::new(reconciler, pipeline, coordinator));

    let (queue_tx, queue_rx) = queue::bounded(config.queue_capacity);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind http listener on {addr}: {e}");
            std::process::exit(1);
        }
    };
    let bound_addr = listener.local_addr().unwrap_or(addr);
    info!(%bound_addr, "http ingress listening");

    if let Err(e) = discovery::write(bound_addr.port()) {
        warn!("failed to write discovery file: {e}");
    }

    let consumer_handle = tokio::spawn(consumer::run(engine.clone(), queue_rx));
    let retry_handle = tokio::spawn(consumer::run_retry_timer(
        engine.clone(),
        std::time::Duration::from_secs(config.retry_interval_secs),
        config.max_orphan_age_secs,
        config.max_orphan_retries,
    ));

    let tool_channel_handle = tokio::task::spawn_blocking({
        let tool_channel = tool_channel::ToolChannel::new(vectors.clone(), embeddings.clone());
        move || {
            if let Err(e) = tool_channel.run() {
                error!("tool channel exited: {e}");
            }
        }
    });

    let server_result = ingress::serve(listener, queue_tx, shutdown_signal()).await;

    // Shutdown reverses acquisition order: discovery file, then the
    // background tasks, then the stores (dropped with `storage`/`vectors`
    // when `main` returns). `ingress::serve` returning drops its
    // `VisitQueueSender`, closing the queue so the consumer drains to
    // completion instead of blocking on `recv` forever.
    discovery::remove();

    let consumer_abort = consumer_handle.abort_handle();
    let drain_deadline = std::time::Duration::from_secs(config.shutdown_drain_deadline_secs);
    match tokio::time::timeout(drain_deadline, consumer_handle).await {
        Ok(Ok(())) => info!("consumer drained the queue before shutdown"),
        Ok(Err(e)) => error!("consumer task failed during shutdown: {e}"),
        Err(_) => {
            warn!(
                deadline_secs = config.shutdown_drain_deadline_secs,
                "shutdown drain deadline elapsed; discarding remaining queued visits"
            );
            consumer_abort.abort();
        }
    }

    retry_handle.abort();
    tool_channel_handle.abort();

    if let Err(e) = server_result {
        error!("http ingress error: {e}");
        std::process::exit(1);
    }

    info!("tabtrace server shutting down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
