// # pimctl - Proxy IP Manager CLI
//
// The pimctl tool is responsible for:
// 1. Reading configuration from environment variables
// 2. Opening the config store and registering the built-in providers
// 3. Running one registry or updater operation per invocation
//
// All proxy IP logic lives in pim-core; this binary only wires it together.
//
// ## Configuration
//
// - `PIM_STORE_PATH`: Path of the JSON config store (default `proxy_ip_manager.json`)
// - `PIM_LOG_LEVEL`: trace, debug, info, warn or error (default `info`)
//
// Log records go to stderr; command output and the update narration go to
// stdout.
//
// ## Example
//
// ```bash
// export PIM_STORE_PATH=/var/lib/pim/config.json
//
// pimctl register cdn http --enabled
// pimctl configure cdn --set url=https://www.cloudflare.com/ips-v4
// pimctl test cdn
// pimctl auto-update --enable --interval 3600
// pimctl update --if-due          # from cron
// ```

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pim_core::registry::{ProviderCatalog, ProviderRegistry};
use pim_core::schedule::UpdateSchedule;
use pim_core::state::FileConfigStore;
use pim_core::traits::{ConfigStore, Configuration};
use pim_core::updater::{ConsoleSink, Updater, Verbosity};
use pim_core::UpdaterConfig;
use serde_json::Value;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, debug, error};
use tracing_subscriber::FmtSubscriber;

/// Default location of the config store
const DEFAULT_STORE_PATH: &str = "proxy_ip_manager.json";

/// Exit codes
///
/// - 0: Success
/// - 1: Configuration or usage error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PimExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<PimExitCode> for ExitCode {
    fn from(code: PimExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Manage the providers of trusted proxy IP addresses
#[derive(Debug, Parser)]
#[command(name = "pimctl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered providers and the auto-update status
    List,

    /// Fetch the addresses of one provider without saving anything
    Test {
        /// Provider handle
        handle: String,
    },

    /// Run an update cycle over the enabled providers
    Update {
        /// Only run if auto-updating is enabled and the interval has elapsed
        #[arg(long)]
        if_due: bool,

        /// Show more of the update narration (-vv for everything)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Print nothing
        #[arg(short, long, conflicts_with = "verbose")]
        quiet: bool,

        /// Skip faulting providers instead of aborting the cycle
        #[arg(long)]
        isolate_faults: bool,
    },

    /// Include a provider in update cycles
    Enable {
        /// Provider handle
        handle: String,
    },

    /// Exclude a provider from update cycles
    Disable {
        /// Provider handle
        handle: String,
    },

    /// Register a provider under a new handle
    Register {
        /// Unique handle for the new provider
        handle: String,

        /// Provider implementation (e.g. "manual" or "http")
        reference: String,

        /// Enable the provider right away
        #[arg(long)]
        enabled: bool,
    },

    /// Remove a provider
    Unregister {
        /// Provider handle
        handle: String,
    },

    /// Show or change the configuration of a configurable provider
    Configure {
        /// Provider handle
        handle: String,

        /// Configuration entry; values are read as JSON, falling back to a string
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        set: Vec<(String, Value)>,
    },

    /// Show or change the auto-update settings
    AutoUpdate {
        /// Turn auto-updating on
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Turn auto-updating off
        #[arg(long)]
        disable: bool,

        /// Seconds between two automatic cycles
        #[arg(long, value_name = "SECONDS")]
        interval: Option<u64>,
    },
}

/// Parse a `key=value` pair
fn parse_key_value(input: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got \"{}\"", input))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in \"{}\"", input));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Application configuration
struct Config {
    store_path: String,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        Self {
            store_path: env::var("PIM_STORE_PATH")
                .unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string()),
            log_level: env::var("PIM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.store_path.trim().is_empty() {
            anyhow::bail!("PIM_STORE_PATH cannot be empty");
        }

        self.tracing_level()?;
        Ok(())
    }

    fn tracing_level(&self) -> Result<Level> {
        Ok(match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => anyhow::bail!(
                "PIM_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        })
    }
}

/// Console printing the update narration on stdout
struct StdoutConsole {
    verbosity: Verbosity,
}

impl ConsoleSink for StdoutConsole {
    fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn write_line(&self, line: &str) {
        println!("{}", line);
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not errors
            let code = if e.use_stderr() {
                PimExitCode::ConfigError
            } else {
                PimExitCode::Success
            };
            let _ = e.print();
            return code.into();
        }
    };

    let config = Config::from_env();
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return PimExitCode::ConfigError.into();
    }

    // Validated above
    let log_level = config.tracing_level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return PimExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return PimExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run(cli.command, &config).await {
            Ok(()) => PimExitCode::Success,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                exit_code_for(&e)
            }
        }
    });

    code.into()
}

/// Classify a failed command
fn exit_code_for(err: &anyhow::Error) -> PimExitCode {
    match err.downcast_ref::<pim_core::Error>() {
        Some(e) if e.is_registry_contract() => PimExitCode::ConfigError,
        Some(pim_core::Error::InvalidConfiguration { .. } | pim_core::Error::Config(_)) => {
            PimExitCode::ConfigError
        }
        _ => PimExitCode::RuntimeError,
    }
}

/// Providers compiled into this binary
#[allow(unused_mut)]
fn build_catalog() -> ProviderCatalog {
    let mut catalog = ProviderCatalog::new();

    #[cfg(feature = "manual")]
    pim_provider_manual::register(&mut catalog);

    #[cfg(feature = "http")]
    pim_provider_http::register(&mut catalog);

    catalog
}

/// Run one command against the config store
async fn run(command: Command, config: &Config) -> Result<()> {
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(&config.store_path).await?);
    debug!("Using config store {}", config.store_path);

    let registry = Arc::new(ProviderRegistry::new(Arc::clone(&store), build_catalog()));
    let schedule = UpdateSchedule::new(Arc::clone(&store));

    match command {
        Command::List => list(&registry, &schedule).await,
        Command::Test { handle } => {
            let updater = Updater::new(registry, store);
            let probe = updater.probe_provider(&handle).await?;
            for address in &probe.addresses {
                println!("{}", address);
            }
            for error in &probe.errors {
                eprintln!("{}", error);
            }
            Ok(())
        }
        Command::Update {
            if_due,
            verbose,
            quiet,
            isolate_faults,
        } => {
            if if_due && !schedule.is_due(Utc::now()).await? {
                debug!("Automatic update not due, skipping");
                return Ok(());
            }

            let console = Arc::new(StdoutConsole {
                verbosity: Verbosity::from_flags(verbose, quiet),
            });
            Updater::new(registry, store)
                .with_config(UpdaterConfig::default().with_isolate_provider_faults(isolate_faults))
                .attach_console(console)
                .process_enabled_providers()
                .await;
            Ok(())
        }
        Command::Enable { handle } => Ok(registry.set_enabled(&handle, true).await?),
        Command::Disable { handle } => Ok(registry.set_enabled(&handle, false).await?),
        Command::Register {
            handle,
            reference,
            enabled,
        } => Ok(registry.register(&handle, &reference, enabled).await?),
        Command::Unregister { handle } => Ok(registry.unregister(&handle).await?),
        Command::Configure { handle, set } => configure(&registry, &handle, set).await,
        Command::AutoUpdate {
            enable,
            disable,
            interval,
        } => {
            if let Some(interval) = interval {
                schedule.set_interval(interval).await?;
            }
            if enable || disable {
                schedule.set_enabled(enable).await?;
            }

            let settings = schedule.settings().await?;
            println!(
                "Automatic updates: {}",
                if settings.enabled { "enabled" } else { "disabled" }
            );
            println!("Interval: {} seconds", settings.interval_secs);
            Ok(())
        }
    }
}

async fn list(registry: &ProviderRegistry, schedule: &UpdateSchedule) -> Result<()> {
    let summaries = registry.summaries().await?;
    if summaries.is_empty() {
        println!("No providers registered.");
    }
    for summary in &summaries {
        println!(
            "{}\t{}\t{}{}",
            summary.handle,
            if summary.enabled { "enabled" } else { "disabled" },
            summary.name,
            if summary.configurable {
                " (configurable)"
            } else {
                ""
            }
        );
    }

    println!(
        "Available provider types: {}",
        registry.catalog().references().join(", ")
    );

    let now = Utc::now();
    match schedule.last_run().await? {
        Some(last_run) => println!("Last run: {}", last_run.to_rfc3339()),
        None => println!("Last run: never"),
    }
    match schedule.next_run(now).await? {
        Some(next_run) => println!("Next automatic run: {}", next_run.to_rfc3339()),
        None => println!("Automatic updates: disabled"),
    }
    Ok(())
}

/// Print the configuration, or merge `set` into it and save through validation
async fn configure(
    registry: &ProviderRegistry,
    handle: &str,
    set: Vec<(String, Value)>,
) -> Result<()> {
    let mut configuration: Configuration = registry
        .get_configuration(handle)
        .await?
        .ok_or_else(|| pim_core::Error::NotConfigurable(handle.to_string()))?;

    if !set.is_empty() {
        configuration.extend(set);
        configuration = registry.configure(handle, &configuration).await?;
    }

    println!("{}", serde_json::to_string_pretty(&configuration)?);
    Ok(())
}
