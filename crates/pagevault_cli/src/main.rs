//! PageVault CLI
//!
//! Command-line tools for PageVault encrypted database files.
//!
//! # Commands
//!
//! - `inspect` - Display the cleartext header (no key needed)
//! - `verify` - Authenticate every page and list damaged ones
//! - `rekey` - Re-encrypt a database under a new key
//! - `export` - Copy a database to a new file with a new key or cipher

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// PageVault command-line database tools.
#[derive(Parser)]
#[command(name = "pagevault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the cleartext header and file layout
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Authenticate every page
    Verify {
        /// Key: a passphrase, or x'<64 hex digits>' for a raw key
        #[arg(short, long)]
        key: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Re-encrypt the database under a new key
    Rekey {
        /// Current key
        #[arg(short, long)]
        key: String,

        /// New key
        #[arg(short, long)]
        new_key: String,
    },

    /// Copy the database into a new file
    Export {
        /// Current key
        #[arg(short, long)]
        key: String,

        /// Destination file (must not exist)
        #[arg(short, long)]
        output: PathBuf,

        /// Key for the destination (defaults to the current key)
        #[arg(short, long)]
        new_key: Option<String>,

        /// Cipher for the destination (aes-256-cbc, aes-256-ctr)
        #[arg(long)]
        cipher: Option<String>,

        /// HMAC for the destination (hmac-sha1, hmac-sha256, hmac-sha512)
        #[arg(long)]
        hmac: Option<String>,

        /// KDF for the destination (pbkdf2-hmac-sha1, -sha256, -sha512)
        #[arg(long)]
        kdf: Option<String>,

        /// KDF iterations for the destination
        #[arg(long)]
        kdf_iterations: Option<u32>,

        /// IV rule for the destination (page-derived, random-per-write)
        #[arg(long)]
        iv_rule: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { key, format } => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path, &key, &format)?;
        }
        Commands::Rekey { key, new_key } => {
            let path = cli.path.ok_or("Database path required for rekey")?;
            commands::rekey::run(&path, &key, &new_key)?;
        }
        Commands::Export {
            key,
            output,
            new_key,
            cipher,
            hmac,
            kdf,
            kdf_iterations,
            iv_rule,
        } => {
            let path = cli.path.ok_or("Database path required for export")?;
            let options = commands::export::ExportOptions {
                new_key,
                cipher,
                hmac,
                kdf,
                kdf_iterations,
                iv_rule,
            };
            commands::export::run(&path, &key, &output, &options)?;
        }
        Commands::Version => {
            println!("PageVault CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("PageVault Core v{}", pagevault_core::VERSION);
        }
    }

    Ok(())
}
