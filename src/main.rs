//! journalcrypt - Client-side journal encryption tool
//!
//! Usage:
//!   journalcrypt init                       - Create the key hierarchy
//!   journalcrypt encrypt <in> <out>         - Encrypt a file into a record
//!   journalcrypt decrypt <in> <out>         - Decrypt a record
//!   journalcrypt change-secret              - Rotate the master key
//!   journalcrypt export <out> <records...>  - Build a password-protected export
//!   journalcrypt status                     - Show hierarchy status

use clap::{Parser, Subcommand};
use journalcrypt::{
    config::Config,
    export::{ExportItem, ExportPackage, ExportReader},
    record::{Category, EncryptedRecord, RecordMetadata},
    rotation::{CancelToken, RotationTrigger},
    CryptoContext, Error, Result,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "journalcrypt")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "End-to-end encryption for journal entries and voice recordings")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/journalcrypt/config.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Read the secret from a file instead of prompting
    #[arg(long, global = true)]
    secret_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the master key and the initial data keys
    Init,

    /// Check the secret and show the key catalog
    Unlock,

    /// Change the secret, rewrapping every data key
    ChangeSecret {
        /// Finish an interrupted secret change
        #[arg(long)]
        resume: bool,
    },

    /// Rotate data keys
    Rotate {
        /// Category to rotate (journal, emotional, export)
        #[arg(long)]
        category: Option<Category>,

        /// Rotate every category after a suspected compromise
        #[arg(long, conflicts_with = "category")]
        security_event: Option<String>,
    },

    /// Rotate data keys older than the configured maximum age
    RotateDue,

    /// Rewrap recording keys still wrapped under superseded data keys
    Sweep {
        #[arg(long, default_value = "journal")]
        category: Category,
    },

    /// Encrypt a file into a record
    Encrypt {
        input: PathBuf,
        output: PathBuf,

        #[arg(long, default_value = "journal")]
        category: Category,

        /// Encrypt as a voice recording under its own media key
        #[arg(long)]
        recording: bool,

        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },

    /// Decrypt a record
    Decrypt { input: PathBuf, output: PathBuf },

    /// Build a password-protected export package from records
    Export {
        output: PathBuf,

        #[arg(required = true)]
        records: Vec<PathBuf>,
    },

    /// Open an export package into a directory
    OpenExport { input: PathBuf, output_dir: PathBuf },

    /// Show hierarchy status
    Status,
}

fn main() {
    let cli = Cli::parse();

    let config_path = expand_tilde(&cli.config);
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        config.logging.level.parse().unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    if let Err(e) = run_command(cli.command, &config, cli.secret_file.as_deref()) {
        error!("{}", e);
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(path)
    } else {
        Config::from_env()
    }
}

fn run_command(command: Commands, config: &Config, secret_file: Option<&Path>) -> Result<()> {
    config.ensure_directories()?;
    let ctx = CryptoContext::from_config(config)?;

    match command {
        Commands::Init => cmd_init(&ctx, secret_file),
        Commands::Unlock => cmd_unlock(&ctx, secret_file),
        Commands::ChangeSecret { resume } => cmd_change_secret(&ctx, resume),
        Commands::Rotate {
            category,
            security_event,
        } => {
            unlock(&ctx, secret_file)?;
            cmd_rotate(&ctx, category, security_event)
        }
        Commands::RotateDue => {
            unlock(&ctx, secret_file)?;
            let rotated = ctx.rotation.rotate_due(chrono::Utc::now())?;
            if rotated.is_empty() {
                println!("No data keys are due for rotation");
            }
            for (category, version) in rotated {
                println!("{}: now v{}", category, version);
            }
            Ok(())
        }
        Commands::Sweep { category } => {
            unlock(&ctx, secret_file)?;
            let report = ctx.rotation.sweep(category, &CancelToken::new())?;
            println!(
                "{}: {} media keys examined, {} rewrapped",
                category, report.examined, report.rewrapped
            );
            for version in report.retired {
                println!("{}: retired v{}", category, version);
            }
            Ok(())
        }
        Commands::Encrypt {
            input,
            output,
            category,
            recording,
            content_type,
        } => {
            unlock(&ctx, secret_file)?;
            cmd_encrypt(&ctx, &input, &output, category, recording, content_type)
        }
        Commands::Decrypt { input, output } => {
            unlock(&ctx, secret_file)?;
            let record = read_record(&input)?;
            let plaintext = Zeroizing::new(ctx.engine.decrypt_payload(&record)?);
            std::fs::write(&output, plaintext.as_slice())?;
            info!("Decrypted {:?} -> {:?}", input, output);
            Ok(())
        }
        Commands::Export { output, records } => {
            unlock(&ctx, secret_file)?;
            cmd_export(&ctx, &output, &records)
        }
        Commands::OpenExport { input, output_dir } => cmd_open_export(&input, &output_dir),
        Commands::Status => cmd_status(&ctx, config),
    }
}

fn read_secret(prompt: &str, secret_file: Option<&Path>) -> Result<Zeroizing<String>> {
    let secret = match secret_file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::Internal(format!("Failed to read secret file: {}", e)))?
            .trim_end_matches(['\r', '\n'])
            .to_string(),
        None => rpassword::prompt_password(prompt).map_err(|e| Error::Internal(e.to_string()))?,
    };
    Ok(Zeroizing::new(secret))
}

fn read_new_secret(prompt: &str) -> Result<Zeroizing<String>> {
    let first = read_secret(prompt, None)?;
    let second = read_secret("Repeat: ", None)?;
    if *first != *second {
        return Err(Error::InvalidConfig("Secrets do not match".to_string()));
    }
    if first.is_empty() {
        return Err(Error::InvalidConfig("Secret must not be empty".to_string()));
    }
    Ok(first)
}

fn unlock(ctx: &CryptoContext, secret_file: Option<&Path>) -> Result<()> {
    let secret = read_secret("Enter secret: ", secret_file)?;
    ctx.unlock(secret.as_bytes())
}

fn cmd_init(ctx: &CryptoContext, secret_file: Option<&Path>) -> Result<()> {
    if ctx.derivation.is_initialized()? {
        return Err(Error::AlreadyInitialized);
    }
    let secret = match secret_file {
        Some(_) => read_secret("", secret_file)?,
        None => read_new_secret("Choose a secret: ")?,
    };
    ctx.initialize(secret.as_bytes())?;

    let record = ctx.derivation.record()?;
    println!("Key hierarchy initialized");
    println!("Salt: {}", record.salt.to_hex());
    println!("KDF: {:?}", record.kdf);
    Ok(())
}

fn cmd_unlock(ctx: &CryptoContext, secret_file: Option<&Path>) -> Result<()> {
    unlock(ctx, secret_file)?;
    let catalog = ctx.hierarchy.catalog()?;
    println!("Unlocked (master generation {})", ctx.hierarchy.master_generation()?);
    for (category, keys) in &catalog.categories {
        let versions: Vec<String> = keys
            .versions
            .iter()
            .map(|(v, info)| format!("v{} {:?}", v, info.status))
            .collect();
        println!("  {}: active v{} [{}]", category, keys.active, versions.join(", "));
    }
    Ok(())
}

fn cmd_change_secret(ctx: &CryptoContext, resume: bool) -> Result<()> {
    let pending = ctx.rotation.pending_secret_change()?;
    if pending.is_some() && !resume {
        return Err(Error::RotationIncomplete(
            "a secret change was interrupted; run with --resume".to_string(),
        ));
    }

    let old = read_secret("Current secret: ", None)?;
    let new = read_new_secret("New secret: ")?;
    let cancel = CancelToken::new();

    if pending.is_some() {
        warn!("Resuming interrupted secret change");
        ctx.rotation
            .resume_secret_change(old.as_bytes(), new.as_bytes(), &cancel)?;
    } else {
        ctx.unlock(old.as_bytes())?;
        ctx.rotation
            .change_secret(old.as_bytes(), new.as_bytes(), &cancel)?;
    }
    println!("Secret changed");
    Ok(())
}

fn cmd_rotate(
    ctx: &CryptoContext,
    category: Option<Category>,
    security_event: Option<String>,
) -> Result<()> {
    let rotated = match (category, security_event) {
        (_, Some(reason)) => ctx.rotation.on_security_event(&reason)?,
        (Some(category), None) => {
            let version = ctx.rotation.rotate_dek(category, RotationTrigger::Manual)?;
            vec![(category, version)]
        }
        (None, None) => {
            return Err(Error::InvalidConfig(
                "pass --category or --security-event".to_string(),
            ))
        }
    };
    for (category, version) in rotated {
        println!("{}: now v{}", category, version);
    }
    Ok(())
}

fn cmd_encrypt(
    ctx: &CryptoContext,
    input: &Path,
    output: &Path,
    category: Category,
    recording: bool,
    content_type: String,
) -> Result<()> {
    let plaintext = Zeroizing::new(std::fs::read(input)?);
    let item_id = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let metadata = RecordMetadata::new(content_type).with_item_id(item_id);

    let record = if recording {
        let (record, blob) = ctx.engine.encrypt_recording(&plaintext, &metadata)?;
        info!("Recording key stored as {}", blob.key_id);
        record
    } else {
        ctx.engine.encrypt_payload(category, &plaintext, &metadata)?
    };

    std::fs::write(output, record.to_bytes()?)?;
    info!(
        "Encrypted {:?} -> {:?} ({} v{})",
        input, output, record.key_ref.category, record.key_ref.version
    );
    Ok(())
}

fn cmd_export(ctx: &CryptoContext, output: &Path, records: &[PathBuf]) -> Result<()> {
    let items = records
        .iter()
        .map(|path| {
            let id = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(ExportItem::new(id, read_record(path)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let password = read_new_secret("Export password: ")?;
    let package = ctx.export.build_package(&items, password.as_bytes())?;
    package.write_to(output)?;
    println!("Exported {} items to {:?}", package.len(), output);
    Ok(())
}

fn cmd_open_export(input: &Path, output_dir: &Path) -> Result<()> {
    let package = ExportPackage::read_from(input)?;
    let password = read_secret("Export password: ", None)?;
    let reader = ExportReader::open(package, password.as_bytes())?;

    std::fs::create_dir_all(output_dir)?;
    for (id, plaintext) in reader.open_all()? {
        let name = Path::new(&id)
            .file_name()
            .ok_or_else(|| Error::InvalidRecord(format!("Bad item id: {}", id)))?;
        let plaintext = Zeroizing::new(plaintext);
        std::fs::write(output_dir.join(name), plaintext.as_slice())?;
        println!("Recovered {}", id);
    }
    Ok(())
}

fn cmd_status(ctx: &CryptoContext, config: &Config) -> Result<()> {
    println!("journalcrypt Status");
    println!("===================");
    println!();
    println!("Data directory: {:?}", config.data_dir);
    println!("Vault: {:?} at {:?}", config.vault.backend, config.vault_path());
    println!("DEK max age: {} days", config.rotation.dek_max_age_days);

    if !ctx.recovery.is_recoverable()? {
        println!("Key hierarchy: not initialized (run 'journalcrypt init')");
        return Ok(());
    }

    let record = ctx.derivation.record()?;
    println!("Master generation: {}", record.generation);
    println!("KDF: {:?}", record.kdf);
    println!("Secret last set: {}", record.created_at);

    match ctx.rotation.pending_secret_change()? {
        Some(journal) => println!(
            "Pending secret change: {:?} since {} (run 'journalcrypt change-secret --resume')",
            journal.phase, journal.started_at
        ),
        None => println!("Pending secret change: none"),
    }
    println!("Recording keys: {}", ctx.hierarchy.list_meks()?.len());
    Ok(())
}

fn read_record(path: &Path) -> Result<EncryptedRecord> {
    EncryptedRecord::from_bytes(&std::fs::read(path)?)
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
