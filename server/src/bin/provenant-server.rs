use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use provenant_server::{FileBackend, KeyService, MemoryBackend, ServerStorage};
use provenant_signer::{RemoteSigner, SignerTlsConfig};

#[derive(Parser)]
#[command(name = "provenant-server", about = "Provenant trust server")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Listen port
    #[arg(long, default_value = "4430")]
    port: u16,
    /// Directory for persisted metadata. When omitted, metadata is held
    /// in memory and lost on restart.
    #[arg(long, env = "PROVENANT_STORAGE_DIR")]
    storage_dir: Option<std::path::PathBuf>,
    /// URL of an external signing service holding the server role keys.
    /// When omitted, keys are held in process memory.
    #[arg(long, env = "PROVENANT_SIGNER_URL")]
    signer_url: Option<String>,
    /// Client certificate for the signer channel (mutual TLS).
    #[arg(long, requires_all = ["signer_tls_key", "signer_tls_ca"])]
    signer_tls_cert: Option<std::path::PathBuf>,
    /// Client key for the signer channel.
    #[arg(long, requires_all = ["signer_tls_cert", "signer_tls_ca"])]
    signer_tls_key: Option<std::path::PathBuf>,
    /// CA certificate pinning the signer channel.
    #[arg(long, requires_all = ["signer_tls_cert", "signer_tls_key"])]
    signer_tls_ca: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let keys = match &args.signer_url {
        Some(url) => {
            let tls = SignerTlsConfig {
                client_cert: args.signer_tls_cert.clone(),
                client_key: args.signer_tls_key.clone(),
                ca_cert: args.signer_tls_ca.clone(),
            };
            let signer = match RemoteSigner::new(url, tls) {
                Ok(signer) => signer,
                Err(e) => {
                    eprintln!("Error: signer configuration: {}", e);
                    std::process::exit(1);
                }
            };
            tracing::info!(%url, "using remote signing service");
            Arc::new(KeyService::with_signer(Arc::new(signer)))
        }
        None => {
            tracing::warn!("holding role keys in process memory; configure --signer-url for production");
            Arc::new(KeyService::new())
        }
    };

    let storage: Arc<dyn ServerStorage> = match &args.storage_dir {
        Some(dir) => match FileBackend::new(dir) {
            Ok(backend) => {
                tracing::info!(dir = %dir.display(), "persisting metadata on disk");
                Arc::new(backend)
            }
            Err(e) => {
                eprintln!("Error: could not open storage directory {}: {}", dir.display(), e);
                std::process::exit(1);
            }
        },
        None => Arc::new(MemoryBackend::new()),
    };
    let app = provenant_server::build_router(storage, keys);

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!(%addr, "trust server listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: could not bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Error: trust server terminated: {}", e);
        std::process::exit(2);
    }
}
