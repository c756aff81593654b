//! Command-line front end for ferry: publishing artifacts, generating host
//! bootstrap descriptors and scripts, and running the bootstrap natively.

mod artifacts;
mod config;
mod host;
mod logging;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ferry_bootstrap::BootstrapError;
use host::FingerprintSource;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ferryctl")]
#[command(about = "Publish versioned artifacts and bootstrap hosts from them")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "FERRY_CONFIG", default_value = "ferry.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an artifact under a new versioned key and update the alias
    Publish {
        /// Artifact file
        file: PathBuf,
    },
    /// List versioned entries with their fingerprints
    Versions,
    /// Show the metadata carried by the alias
    Alias,
    /// Delete versioned entries older than the retention period
    Prune {
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Override the configured retention period
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Emit a bootstrap descriptor as TOML
    Descriptor {
        #[command(flatten)]
        expected: ExpectedArgs,
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Emit the standalone bootstrap script
    Render {
        #[command(flatten)]
        source: RenderSource,
        /// Write to a file (mode 0755) instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Emit base64 user data instead of the raw script
        #[arg(long)]
        base64: bool,
    },
    /// Run or inspect the bootstrap on this host
    Bootstrap {
        #[command(subcommand)]
        command: BootstrapCommands,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ExpectedArgs {
    /// Expected SHA-256 fingerprint (hex)
    #[arg(long)]
    fingerprint: Option<String>,
    /// Read the expected fingerprint from the alias metadata
    #[arg(long)]
    from_alias: bool,
}

impl From<ExpectedArgs> for FingerprintSource {
    fn from(args: ExpectedArgs) -> Self {
        match args.fingerprint {
            Some(hex) => FingerprintSource::Explicit(hex),
            None => FingerprintSource::FromAlias,
        }
    }
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct RenderSource {
    /// Expected SHA-256 fingerprint (hex)
    #[arg(long)]
    fingerprint: Option<String>,
    /// Read the expected fingerprint from the alias metadata
    #[arg(long)]
    from_alias: bool,
    /// Render an existing descriptor file
    #[arg(long)]
    descriptor: Option<PathBuf>,
}

#[derive(Subcommand)]
enum BootstrapCommands {
    /// Fetch, verify and apply the artifact unless already complete
    Run {
        #[arg(long)]
        descriptor: PathBuf,
    },
    /// Report whether the completion marker is present
    Status {
        #[arg(long)]
        descriptor: PathBuf,
    },
    /// Remove the completion marker so the next run applies again
    Reset {
        #[arg(long)]
        descriptor: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Failures before dispatch installed a subscriber still get logged.
            logging::init(None);
            tracing::error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Bootstrap failures carry their own exit code; everything else is 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<BootstrapError>())
        .map(BootstrapError::exit_code)
        .unwrap_or(1)
}

async fn dispatch(cli: Cli) -> Result<()> {
    let command = match cli.command {
        Commands::Bootstrap { command } => return bootstrap(command).await,
        other => other,
    };

    logging::init(None);
    let config = config::load(&cli.config)?;

    match command {
        Commands::Publish { file } => artifacts::publish(&config, &file).await,
        Commands::Versions => artifacts::versions(&config).await,
        Commands::Alias => artifacts::alias(&config).await,
        Commands::Prune {
            dry_run,
            retention_days,
        } => artifacts::prune(&config, retention_days, dry_run).await,
        Commands::Descriptor { expected, output } => {
            let descriptor = host::build_descriptor(&config, expected.into()).await?;
            host::descriptor(&descriptor, output.as_deref())
        }
        Commands::Render {
            source,
            output,
            base64,
        } => {
            let descriptor = match (source.descriptor, source.fingerprint) {
                (Some(path), _) => host::read_descriptor(&path)?,
                (None, Some(hex)) => {
                    host::build_descriptor(&config, FingerprintSource::Explicit(hex)).await?
                }
                (None, None) => {
                    host::build_descriptor(&config, FingerprintSource::FromAlias).await?
                }
            };
            host::render(&descriptor, output.as_deref(), base64)
        }
        Commands::Bootstrap { command } => bootstrap(command).await,
    }
}

/// Bootstrap subcommands work from the descriptor alone; the configuration
/// file is not consulted so a host needs nothing else.
async fn bootstrap(command: BootstrapCommands) -> Result<()> {
    match command {
        BootstrapCommands::Run { descriptor } => {
            let descriptor = host::read_descriptor(&descriptor)?;
            logging::init(Some(&descriptor.paths.log_file));
            host::run(descriptor).await
        }
        BootstrapCommands::Status { descriptor } => {
            let descriptor = host::read_descriptor(&descriptor)?;
            logging::init(None);
            host::status(&descriptor).await
        }
        BootstrapCommands::Reset { descriptor } => {
            let descriptor = host::read_descriptor(&descriptor)?;
            logging::init(None);
            host::reset(&descriptor).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_descriptor_flags_are_exclusive() {
        let both = Cli::try_parse_from([
            "ferryctl",
            "descriptor",
            "--fingerprint",
            "00",
            "--from-alias",
        ]);
        assert!(both.is_err());

        let neither = Cli::try_parse_from(["ferryctl", "descriptor"]);
        assert!(neither.is_err());
    }

    #[test]
    fn test_render_accepts_descriptor_file() {
        let cli = Cli::try_parse_from(["ferryctl", "render", "--descriptor", "d.toml", "--base64"])
            .unwrap();
        match cli.command {
            Commands::Render { source, base64, .. } => {
                assert_eq!(source.descriptor, Some(PathBuf::from("d.toml")));
                assert!(base64);
            }
            _ => panic!("expected render"),
        }
    }

    #[test]
    fn test_exit_code_follows_bootstrap_error() {
        let plain = anyhow::anyhow!("boom");
        assert_eq!(exit_code(&plain), 1);

        let failed: anyhow::Error = BootstrapError::Failed {
            state: ferry_bootstrap::State::WaitDependency,
            reason: ferry_bootstrap::FailureReason::DependencyUnavailable,
            source: ferry_bootstrap::FailureCause::NotReady { attempts: 3 },
        }
        .into();
        assert_eq!(exit_code(&failed.context("bootstrap run")), 10);
    }
}
