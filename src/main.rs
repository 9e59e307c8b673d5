//! Wallet Core CLI
//!
//! Offline key tooling and a file-backed keyring for the wallet background.

use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wallet_core::background::BackgroundRunner;
use wallet_core::derivation::{self, ChainKind};
use wallet_core::{Config, Error, Result, MNEMONIC_ENV, PASSWORD_ENV, PRIVATE_KEY_ENV};

#[derive(Parser)]
#[command(name = "wallet-core")]
#[command(about = "Multi-chain wallet core: key derivation and encrypted keyring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new mnemonic
    Generate {
        /// Number of words (12, 15, 18, 21 or 24)
        #[arg(short, long, default_value_t = 12)]
        words: usize,
    },

    /// Derive credentials from the mnemonic in WALLET_MNEMONIC
    Derive {
        /// HD path; omit to key straight off the seed
        #[arg(short, long)]
        path: Option<String>,

        /// BIP39 passphrase
        #[arg(long)]
        passphrase: Option<String>,

        /// Print the private key too
        #[arg(long)]
        show_secret: bool,
    },

    /// Show the public credentials of the key in WALLET_PRIVATE_KEY
    Inspect,

    /// Initialize the keyring (password from WALLET_PASSWORD, optional WALLET_MNEMONIC)
    Setup,

    /// Unlock the keyring and list its accounts
    Accounts {
        /// Also create a new HD account on this chain (tezos, evm)
        #[arg(long)]
        create: Option<String>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins when set
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Generate { words } => {
            let mnemonic = derivation::generate_mnemonic(words)?;
            println!("{}", mnemonic.expose_secret());
        }
        Commands::Derive {
            path,
            passphrase,
            show_secret,
        } => {
            run_derive(path, passphrase, show_secret)?;
        }
        Commands::Inspect => {
            let private_key = secret_from_env(PRIVATE_KEY_ENV)?;
            let creds = derivation::private_key_to_account_creds(private_key.expose_secret())?;
            print_json(&serde_json::json!({
                "chainKind": creds.chain_kind,
                "address": creds.address,
                "publicKey": creds.public_key,
            }))?;
        }
        Commands::Setup => {
            run_setup(config).await?;
        }
        Commands::Accounts { create } => {
            run_accounts(config, create).await?;
        }
        Commands::Config => {
            print_json(&config)?;
        }
    }

    Ok(())
}

fn run_derive(path: Option<String>, passphrase: Option<String>, show_secret: bool) -> Result<()> {
    let mnemonic = secret_from_env(MNEMONIC_ENV)?;
    let derived = derivation::mnemonic_to_private_key(
        mnemonic.expose_secret(),
        passphrase.as_deref(),
        path.as_deref(),
    )?;
    let creds = derivation::private_key_to_account_creds(derived.private_key.expose_secret())?;

    let mut output = serde_json::json!({
        "chainKind": creds.chain_kind,
        "derivationPath": path,
        "address": creds.address,
        "publicKey": creds.public_key,
    });
    if show_secret {
        output["privateKey"] = serde_json::Value::String(creds.private_key.expose_secret().to_string());
    } else {
        output["privateKey"] = serde_json::Value::String("[REDACTED]".to_string());
    }
    print_json(&output)
}

async fn run_setup(config: Config) -> Result<()> {
    let runner = BackgroundRunner::new(config);
    let keyring = runner.keyring(runner.storage());
    let password = secret_from_env(PASSWORD_ENV)?;
    let mnemonic = std::env::var(MNEMONIC_ENV).ok().map(SecretString::from);
    let generated = mnemonic.is_none();

    let accounts = keyring.setup(password.expose_secret(), mnemonic).await?;
    tracing::info!(
        accounts = accounts.len(),
        generated_mnemonic = generated,
        "Keyring initialized"
    );
    print_json(&accounts)
}

async fn run_accounts(config: Config, create: Option<String>) -> Result<()> {
    let runner = BackgroundRunner::new(config);
    let keyring = runner.keyring(runner.storage());
    let password = secret_from_env(PASSWORD_ENV)?;
    keyring.unlock(password.expose_secret()).await?;

    if let Some(chain) = create {
        let chain_kind: ChainKind = serde_json::from_value(serde_json::Value::String(chain.to_lowercase()))
            .map_err(|_| Error::InvalidArgument(format!("Unknown chain: {}", chain)))?;
        let account = keyring.create_hd_account(chain_kind, None).await?;
        tracing::info!(address = %account.address, "Account created");
    }

    let accounts = keyring.accounts().await?;
    keyring.lock().await;
    print_json(&accounts)
}

fn secret_from_env(var_name: &str) -> Result<SecretString> {
    std::env::var(var_name)
        .map(SecretString::from)
        .map_err(|_| Error::Config(format!("{} not set", var_name)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
