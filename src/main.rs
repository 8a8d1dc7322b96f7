use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facevault::{config, vault::SecretFields, CipherKey, FaceVault, Strategy};
use log::info;

#[derive(Parser)]
#[command(name = "facevault")]
#[command(
    version,
    about = "Face-embedding identity matching with an encrypted secret vault"
)]
struct Cli {
    /// Config file (defaults to the installed location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face embedding for a user
    Enroll {
        /// User to enroll (defaults to current user)
        #[arg(short, long)]
        user: Option<String>,
        /// JSON file holding the embedding as an array of numbers
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Find the enrolled identity matching a face
    Login {
        #[arg(short, long)]
        embedding: PathBuf,
        /// Override the configured login strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// Check whether two embeddings belong to the same face
    Verify { first: PathBuf, second: PathBuf },
    /// Remove a user's identity and vault entries
    Purge {
        /// User to purge (defaults to current user)
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Rebuild the cluster index and print its statistics
    IndexStats,
    /// Diagnose how a face compares against every enrolled identity
    SearchStats {
        #[arg(short, long)]
        embedding: PathBuf,
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Store and read secrets, authenticated by face
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },
    /// Print a fresh operator key for FACEVAULT_KEY
    Keygen,
    /// Open config file in editor
    Config,
}

#[derive(Subcommand)]
enum VaultCommands {
    /// Add an entry
    Put {
        #[arg(short, long)]
        embedding: PathBuf,
        #[arg(short, long)]
        name: String,
        /// login, email, credit_card, id or medical
        #[arg(short, long)]
        category: String,
        /// Category fields as a JSON object
        #[arg(short, long)]
        fields: String,
    },
    /// List entries without decrypting them
    List {
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Decrypt and print one entry
    Show {
        #[arg(short, long)]
        embedding: PathBuf,
        #[arg(long)]
        id: uuid::Uuid,
    },
    /// Delete one entry
    Delete {
        #[arg(short, long)]
        embedding: PathBuf,
        #[arg(long)]
        id: uuid::Uuid,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum StrategyArg {
    Linear,
    Greedy,
    Clustered,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Linear => Strategy::Linear,
            StrategyArg::Greedy => Strategy::Greedy,
            StrategyArg::Clustered => Strategy::Clustered,
        }
    }
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Keygen => keygen(),
        Commands::Config => open_config(config_path),
        command => {
            let cfg = config::load_config(config_path)?;
            let app = FaceVault::open(&cfg).context("Failed to open data directory")?;
            run(&app, command)
        }
    }
}

fn run(app: &FaceVault, command: Commands) -> Result<()> {
    let max_dim = app.engine.settings().max_dimension;
    let load = |path: &Path| facevault::app::load_embedding(path, max_dim);

    match command {
        Commands::Enroll { user, embedding } => {
            let user = user.map_or_else(default_user, Ok)?;
            info!("Enrolling user: {}", user);
            let id = app.enroll(&user, &load(&embedding)?)?;
            info!("✓ Enrolled {} as identity {}", user, id);
            Ok(())
        }
        Commands::Login {
            embedding,
            strategy,
        } => {
            let query = load(&embedding)?;
            let found = match strategy {
                Some(s) => app
                    .engine
                    .find(&query, s.into(), app.engine.settings().threshold)?,
                None => app.engine.login_match(&query)?,
            };
            let Some(id) = found else {
                anyhow::bail!("Authentication failed: no enrolled identity matches");
            };
            let label = app.identities.label_of(id)?.unwrap_or_default();
            info!("✓ Matched identity {} ({})", id, label);
            Ok(())
        }
        Commands::Verify { first, second } => {
            if app.engine.verify_pair(&load(&first)?, &load(&second)?)? {
                info!("✓ Same face");
                Ok(())
            } else {
                anyhow::bail!("Different faces")
            }
        }
        Commands::Purge { user } => {
            let user = user.map_or_else(default_user, Ok)?;
            info!("Purging identity for user: {}", user);
            let removed = app.purge(&user)?;
            info!("✓ Purged {} ({} vault entries)", user, removed);
            Ok(())
        }
        Commands::IndexStats => {
            let stats = app.engine.rebuild_index()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::SearchStats {
            embedding,
            threshold,
        } => {
            let threshold = threshold.unwrap_or(app.engine.settings().threshold);
            let stats = app.engine.search_stats(&load(&embedding)?, threshold)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Vault { command } => vault(app, command, load),
        Commands::Keygen | Commands::Config => unreachable!("handled before opening the store"),
    }
}

fn vault(
    app: &FaceVault,
    command: VaultCommands,
    load: impl Fn(&Path) -> Result<facevault::Embedding>,
) -> Result<()> {
    match command {
        VaultCommands::Put {
            embedding,
            name,
            category,
            fields,
        } => {
            let (owner, user) = app.authenticate(&load(&embedding)?)?;
            let fields: serde_json::Value =
                serde_json::from_str(&fields).context("--fields must be a JSON object")?;
            let fields = SecretFields::parse(&category, fields)?;
            let entry = app.vault.put(owner, &name, &fields)?;
            info!("✓ Stored {} for {} as {}", entry.identifier, user, entry.id);
            Ok(())
        }
        VaultCommands::List { embedding } => {
            let (owner, _) = app.authenticate(&load(&embedding)?)?;
            for entry in app.vault.list(owner)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.id, entry.category, entry.name, entry.identifier
                );
            }
            Ok(())
        }
        VaultCommands::Show { embedding, id } => {
            let (owner, _) = app.authenticate(&load(&embedding)?)?;
            let (entry, secret) = app.vault.get(owner, id)?;
            let out = serde_json::json!({
                "id": entry.id,
                "name": entry.name,
                "category": entry.category,
                "identifier": entry.identifier,
                "created_at": entry.created_at,
                "fields": secret.to_json(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        VaultCommands::Delete { embedding, id } => {
            let (owner, _) = app.authenticate(&load(&embedding)?)?;
            app.vault.delete(owner, id)?;
            info!("✓ Deleted {}", id);
            Ok(())
        }
    }
}

fn default_user() -> Result<String> {
    env::var("SUDO_USER")
        .or_else(|_| env::var("USER"))
        .context("No --user given and $USER is unset")
}

fn keygen() -> Result<()> {
    let (key, encoded) = CipherKey::generate();
    info!("Generated key with fingerprint {}", key.fingerprint());
    println!("{encoded}");
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH).as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
