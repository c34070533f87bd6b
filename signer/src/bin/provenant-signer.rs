use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use provenant_tuf::signer::{LocalSigner, PassphraseRetriever, Signer, StaticPassphrase};

#[derive(Parser)]
#[command(name = "provenant-signer", about = "Provenant signing service")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Listen port
    #[arg(long, default_value = "4443")]
    port: u16,
    /// Directory holding encrypted private keys
    #[arg(long, default_value = "./signer-keys")]
    key_dir: std::path::PathBuf,
    /// Passphrase protecting the key directory.
    /// Can also be set via PROVENANT_SIGNER_PASSPHRASE.
    #[arg(long, env = "PROVENANT_SIGNER_PASSPHRASE")]
    passphrase: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let retriever: Box<dyn PassphraseRetriever> =
        Box::new(StaticPassphrase(args.passphrase.clone()));
    let signer = match LocalSigner::new(&args.key_dir, "", retriever) {
        Ok(signer) => signer,
        Err(e) => {
            eprintln!("Error: could not open key directory {}: {}", args.key_dir.display(), e);
            std::process::exit(1);
        }
    };
    let signer: Arc<dyn Signer> = Arc::new(signer);

    let app = provenant_signer::build_router(signer);
    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!(%addr, key_dir = %args.key_dir.display(), "signing service listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: could not bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Error: signing service terminated: {}", e);
        std::process::exit(2);
    }
}
