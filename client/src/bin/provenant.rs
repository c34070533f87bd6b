use std::io::Read as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use provenant_client::{EnvPassphrase, TrustedCollection};
use provenant_tuf::data::RoleName;
use provenant_tuf::error::TufError;

#[derive(Parser)]
#[command(name = "provenant", about = "Sign and verify trusted collections of content")]
struct Cli {
    /// Directory for keys, certificates and cached trust data.
    /// Can also be set via PROVENANT_TRUST_DIR.
    #[arg(long, env = "PROVENANT_TRUST_DIR", default_value = ".provenant")]
    trust_dir: PathBuf,
    /// Trust server URL. Can also be set via PROVENANT_SERVER.
    #[arg(long, env = "PROVENANT_SERVER")]
    server: Option<String>,
    /// Verbose logging.
    #[arg(long, short)]
    verbose: bool,
    /// Emit raw JSON instead of human-readable output.
    #[arg(long)]
    raw: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a new trusted collection
    Init { gun: String },
    /// Stage adding a target from a file
    Add { gun: String, target: String, file: PathBuf },
    /// Stage removing a target
    Remove { gun: String, target: String },
    /// List trusted targets
    List { gun: String },
    /// Show trust data for one target
    Lookup { gun: String, target: String },
    /// Verify stdin against the trust data for a target
    Verify { gun: String, target: String },
    /// Push staged changes to the trust server
    Publish { gun: String },
    /// Show staged, unpublished changes
    Status { gun: String },
    /// Rotate a locally held role key (targets or snapshot)
    Rotate { gun: String, role: String },
}

impl Command {
    fn gun(&self) -> &str {
        match self {
            Command::Init { gun }
            | Command::Add { gun, .. }
            | Command::Remove { gun, .. }
            | Command::List { gun }
            | Command::Lookup { gun, .. }
            | Command::Verify { gun, .. }
            | Command::Publish { gun }
            | Command::Status { gun }
            | Command::Rotate { gun, .. } => gun,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

/// 1 is a validation or user error; transport and unknown failures get 2.
fn exit_code(err: &TufError) -> i32 {
    if err.is_verification_failure() {
        return 1;
    }
    match err {
        TufError::InvalidOperation { .. }
        | TufError::NotFound(_)
        | TufError::RepoNotInitialized
        | TufError::InsufficientKeys { .. }
        | TufError::PassphraseInvalid(_)
        | TufError::Conflict { .. } => 1,
        _ => 2,
    }
}

async fn run(cli: &Cli) -> Result<(), TufError> {
    let collection = TrustedCollection::open(
        &cli.trust_dir,
        cli.command.gun(),
        cli.server.clone(),
        Box::new(EnvPassphrase::new(true)),
    )
    .await?;

    match &cli.command {
        Command::Init { gun } => {
            collection.init().await?;
            println!("Initialized trust data for {}", gun);
        }
        Command::Add { target, file, .. } => {
            let payload = std::fs::read(file)?;
            collection.stage_add_target(target, &payload)?;
            println!("Staged addition of {} ({} bytes)", target, payload.len());
        }
        Command::Remove { target, .. } => {
            collection.stage_remove_target(target)?;
            println!("Staged removal of {}", target);
        }
        Command::List { .. } => {
            let mut targets = collection.list_targets().await?;
            targets.sort_by(|a, b| a.0.cmp(&b.0));
            if cli.raw {
                let value: serde_json::Map<String, serde_json::Value> = targets
                    .into_iter()
                    .map(|(name, meta)| (name, serde_json::to_value(meta).unwrap_or_default()))
                    .collect();
                println!("{}", serde_json::Value::Object(value));
            } else {
                for (name, meta) in targets {
                    let digest = meta.sha256().map(hex::encode).unwrap_or_default();
                    println!("{}\t{}\t{}", name, meta.length, digest);
                }
            }
        }
        Command::Lookup { target, .. } => {
            let meta = collection.lookup(target).await?;
            if cli.raw {
                println!("{}", serde_json::to_string(&meta)?);
            } else {
                let digest = meta.sha256().map(hex::encode).unwrap_or_default();
                println!("{}\t{}\t{}", target, meta.length, digest);
            }
        }
        Command::Verify { target, .. } => {
            let mut payload = Vec::new();
            std::io::stdin().lock().read_to_end(&mut payload)?;
            collection.verify_payload(target, &payload).await?;
            use std::io::Write as _;
            std::io::stdout().lock().write_all(&payload)?;
        }
        Command::Publish { gun } => {
            collection.publish().await?;
            println!("Published {}", gun);
        }
        Command::Status { gun } => {
            let changes = collection.staged_changes()?;
            if changes.is_empty() {
                println!("No unpublished changes for {}", gun);
            } else if cli.raw {
                println!("{}", serde_json::to_string(&changes)?);
            } else {
                for change in changes {
                    println!("{:?}\t{:?}\t{}", change.action, change.scope, change.path);
                }
            }
        }
        Command::Rotate { role, .. } => {
            let role: RoleName = role.parse()?;
            let key = collection.rotate_key(role).await?;
            println!("Staged rotation of {} key to {}", role, key.key_id());
        }
    }
    Ok(())
}
