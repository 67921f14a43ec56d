//! Agent monitor: real-time dashboard for coding-agent tasks.
//!
//! Polls every configured provider and the device fleet, shows the merged
//! view in the terminal and alerts once for every task that completes.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use color_eyre::Result;
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

use agent_monitor::app::{self, App, AppConfig};
use agent_monitor::monitor::demo::demo_registry;
use agent_monitor::monitor::feed::FileFeed;
use agent_monitor::monitor::{
    Monitor, MonitorConfig, ProviderAdapter, ProviderRegistry, TerminalTrigger,
    DEFAULT_DEVICE_STALE_AFTER_SECS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PROVIDER_TIMEOUT_MS,
    DEFAULT_STALE_GRACE_CYCLES,
};

#[derive(Debug, Parser)]
#[command(name = "agent-monitor", version, about = "Monitor coding-agent tasks across providers")]
struct Args {
    /// Milliseconds between poll cycles
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    interval_ms: u64,

    /// Only poll when asked to (press `r`)
    #[arg(long)]
    no_auto_poll: bool,

    /// Per-provider fetch timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_PROVIDER_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Successful cycles a vanished task is kept before it is dropped
    #[arg(long, default_value_t = DEFAULT_STALE_GRACE_CYCLES)]
    grace_cycles: u32,

    /// Seconds without a heartbeat before a device is stale
    #[arg(long, default_value_t = DEFAULT_DEVICE_STALE_AFTER_SECS)]
    device_stale_secs: u64,

    /// Read a provider's records from a JSON file, e.g. `jules=./sessions.json`
    #[arg(long = "feed", value_name = "KIND=PATH")]
    feeds: Vec<FileFeed>,

    /// Also notify on failed and cancelled tasks
    #[arg(long)]
    notify_failures: bool,

    /// Use simulated providers for every source without a feed
    #[arg(long)]
    demo: bool,

    /// No terminal UI; print notifications as JSON lines
    #[arg(long)]
    headless: bool,

    /// Log file for the terminal UI mode
    #[arg(long, default_value = "agent-monitor.log")]
    log_file: PathBuf,
}

impl Args {
    fn monitor_config(&self) -> MonitorConfig {
        let mut notify_on = vec![TerminalTrigger::Completed];
        if self.notify_failures {
            notify_on.extend([TerminalTrigger::Failed, TerminalTrigger::Cancelled]);
        }
        MonitorConfig {
            poll_interval_ms: self.interval_ms,
            auto_poll: !self.no_auto_poll,
            provider_timeout_ms: self.timeout_ms,
            stale_grace_cycles: self.grace_cycles,
            device_stale_after_secs: self.device_stale_secs,
            notify_on,
        }
    }

    fn providers(&self) -> ProviderRegistry {
        let mut registry = if self.demo {
            demo_registry()
        } else {
            ProviderRegistry::new()
        };
        for feed in &self.feeds {
            tracing::info!(provider = %feed.kind(), path = %feed.path().display(), "using feed");
            registry.register(feed.clone());
        }
        registry
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    setup_logging(&args)?;

    let config = args.monitor_config();
    config.validate()?;
    let providers = args.providers();
    if providers.is_empty() {
        eyre::bail!("no providers configured; pass --feed KIND=PATH or --demo");
    }

    let monitor = Arc::new(Monitor::new(providers, config));

    if args.headless {
        return app::run_headless(monitor).await;
    }

    let mut app = App::new(Arc::clone(&monitor), AppConfig::new());
    monitor.start()?;

    setup_terminal()?;
    let result = app.run_with_crossterm().await;
    restore_terminal()?;

    monitor.stop().await;
    result
}

fn setup_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if args.headless {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        // Keep the terminal clean while the dashboard owns it.
        let file = File::create(&args.log_file)
            .wrap_err_with(|| format!("cannot create log file {}", args.log_file.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

fn setup_terminal() -> Result<()> {
    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    Ok(())
}

fn restore_terminal() -> Result<()> {
    crossterm::execute!(io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    crossterm::terminal::disable_raw_mode()?;
    Ok(())
}
