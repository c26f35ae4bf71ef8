//! Fathom license tool
//!
//! Issuer and support-desk helper around the `fathom-license` engine:
//! 1. Generate issuer key pairs and sign licenses
//! 2. Report this machine's fingerprints
//! 3. Validate a license and explain a hardware mismatch
//!
//! Usage:
//!   fathom-license-tool keygen --key-id fathom-2026-01 --out-dir keys
//!   fathom-license-tool issue --template doc.json --private-key keys/fathom-2026-01.private.b64 \
//!       --key-id fathom-2026-01 --bind-current --compact
//!   fathom-license-tool validate --config engine.toml --key FOS-PRO-...

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use fathom_license::HardwareFingerprintCollector;
use fathom_license_tool::{IssueOptions, LicenseSource};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "fathom-license-tool")]
#[command(about = "Issue, inspect and validate Fathom licenses")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an issuer key pair
    Keygen {
        /// Key id recorded in signed licenses
        #[arg(long)]
        key_id: String,

        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Print this machine's id and hardware fingerprints
    Fingerprint {
        /// Show per-component availability
        #[arg(long)]
        diagnostics: bool,
    },

    /// Sign a license document template
    Issue {
        /// Unsigned license document (JSON)
        #[arg(long)]
        template: PathBuf,

        /// Base64 private key file from `keygen`
        #[arg(long)]
        private_key: PathBuf,

        #[arg(long)]
        key_id: String,

        /// Bind the license to this machine
        #[arg(long)]
        bind_current: bool,

        /// Required fingerprint matches
        #[arg(long)]
        threshold: Option<usize>,

        /// Also write the license file here
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print a compact license key instead of the file form
        #[arg(long)]
        compact: bool,
    },

    /// Validate a license on this machine
    #[command(group(ArgGroup::new("source").args(["file", "key"])))]
    Validate {
        /// Engine configuration (TOML)
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long)]
        key: Option<String>,

        /// Treat the license as revoked
        #[arg(long)]
        revoked: bool,
    },

    /// Compare a license's hardware binding with this machine
    Diagnose {
        #[arg(long)]
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(args.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when a validated license is not usable.
fn run(command: Command) -> Result<bool> {
    let collector = HardwareFingerprintCollector::new();

    match command {
        Command::Keygen { key_id, out_dir } => {
            let (private, public) = fathom_license_tool::keygen(&key_id, &out_dir)?;
            println!("Private key: {}", private.display());
            println!("Public key:  {}", public.display());
            println!("\nKeep the private key offline. Add the public key to engine.toml:");
            println!("  [keys]");
            println!(
                "  \"{key_id}\" = \"{}\"",
                std::fs::read_to_string(&public)?.trim()
            );
        }
        Command::Fingerprint { diagnostics } => {
            print!("{}", fathom_license_tool::fingerprint_report(&collector, diagnostics));
        }
        Command::Issue {
            template,
            private_key,
            key_id,
            bind_current,
            threshold,
            out,
            compact,
        } => {
            let (bind_to, machine_id) = if bind_current {
                info!("binding license to this machine");
                (Some(collector.generate()), Some(collector.generate_primary()))
            } else {
                (None, None)
            };
            let issued = fathom_license_tool::issue(&IssueOptions {
                template,
                private_key,
                key_id,
                bind_to,
                machine_id,
                threshold,
                out,
                compact,
            })?;
            println!("{issued}");
        }
        Command::Validate {
            config,
            file,
            key,
            revoked,
        } => {
            let source = match (file, key) {
                (Some(path), _) => LicenseSource::File(path),
                (None, Some(key)) => LicenseSource::Key(key),
                (None, None) => LicenseSource::Configured,
            };
            let result =
                fathom_license_tool::validate(&config, &source, collector.generate(), revoked)?;
            print!("{}", fathom_license_tool::render_result(&result));
            return Ok(result.is_valid);
        }
        Command::Diagnose { file } => {
            print!("{}", fathom_license_tool::diagnose(&file, &collector.generate())?);
        }
    }
    Ok(true)
}
