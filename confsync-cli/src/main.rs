//! confsync CLI: render configuration files from a key/value store, once or
//! continuously.

mod logging;

use anyhow::Context;
use clap::Parser;
use confsync_core::config::{
    AdminOverrides, BackendOverrides, ConfigOverrides, LogOverrides, TemplateOverrides,
};
use confsync_core::{BackendKind, ConfsyncConfig};
use std::path::PathBuf;
use tracing::{error, info};

/// confsync: keep local configuration files in sync with Redis
#[derive(Parser, Debug)]
#[command(name = "confsync", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store backend: redis or memory
    #[arg(long, value_parser = ["redis", "memory"])]
    backend: Option<String>,

    /// Store endpoint, `host:port[/db]` or `socket-path[/db]` (repeatable, comma-separated)
    #[arg(short, long = "node", value_delimiter = ',')]
    nodes: Vec<String>,

    /// Password for the store
    #[arg(long)]
    password: Option<String>,

    /// Seconds between renders in interval mode
    #[arg(short, long)]
    interval: Option<u64>,

    /// Render on store change notifications
    #[arg(short, long)]
    watch: bool,

    /// Render once and exit
    #[arg(long)]
    onetime: bool,

    /// Render without writing destination files
    #[arg(long)]
    noop: bool,

    /// Key prefix applied to every template resource
    #[arg(short, long)]
    prefix: Option<String>,

    /// Directory holding conf.d/ and templates/
    #[arg(long)]
    confdir: Option<PathBuf>,

    /// Port for the admin HTTP server
    #[arg(long)]
    admin_port: Option<u16>,

    /// Disable the admin HTTP server
    #[arg(long)]
    no_admin: bool,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let kind = self.backend.as_deref().map(|b| match b {
            "memory" => BackendKind::Memory,
            _ => BackendKind::Redis,
        });
        ConfigOverrides {
            interval_secs: self.interval,
            watch: self.watch.then_some(true),
            onetime: self.onetime.then_some(true),
            backend: BackendOverrides {
                kind,
                nodes: (!self.nodes.is_empty()).then(|| self.nodes.clone()),
                password: self.password.clone(),
            },
            template: TemplateOverrides {
                confdir: self.confdir.clone(),
                prefix: self.prefix.clone(),
                noop: self.noop.then_some(true),
            },
            admin: AdminOverrides {
                enabled: self.no_admin.then_some(false),
                port: self.admin_port,
            },
            log: LogOverrides {
                level: self.log_level.clone(),
            },
        }
    }
}

async fn run(config: ConfsyncConfig) -> anyhow::Result<()> {
    let store = confsync_core::new_store_client(&config.backend)
        .await
        .context("Unable to connect to the store")?;
    let summary = confsync_core::supervisor::run(&config, store).await?;
    info!(
        processor_errors = summary.processor_errors,
        signals = summary.signals,
        "confsync stopped"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let loaded = confsync_core::load_config(cli.config.as_deref(), &cli.overrides());

    let configured_level = match &loaded {
        Ok(config) => config.log.level.clone(),
        Err(_) => cli.log_level.clone().unwrap_or_else(|| "info".to_string()),
    };
    let log_dir = loaded.as_ref().ok().and_then(|c| c.log.dir.clone());
    let guard = logging::init(
        &logging::filter_for(cli.verbose, &configured_level),
        log_dir.as_deref(),
    );

    let result = match loaded {
        Ok(config) => run(config).await,
        Err(e) => Err(anyhow::Error::new(e).context("Configuration error")),
    };

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            error!("Fatal: {e:#}");
            1
        }
    };
    drop(guard);
    std::process::exit(code);
}
