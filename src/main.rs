use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use mailwatch::{AccountConfig, MailWatcher, Message, WatchConfig};

/// Prints a line for every new message that arrives in a mailbox
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to config file
    #[clap(short, long, default_value = "~/.config/mailwatch/config.json")]
    config: String,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    /// Polling interval in seconds, overrides the config file
    #[clap(short, long)]
    interval: Option<u64>,

    /// Mailbox to watch, overrides the config file
    #[clap(short, long)]
    mailbox: Option<String>,
}

/// Without a config file, credentials come from EMAIL, PASS and ADDR.
fn config_from_env() -> Result<WatchConfig> {
    let user = env::var("EMAIL").context("EMAIL is not set")?;
    let pass = env::var("PASS").context("PASS is not set")?;
    let addr = env::var("ADDR").context("ADDR is not set")?;
    let account = AccountConfig::from_address(&user, &pass, &addr)?;
    Ok(WatchConfig::new(account))
}

fn print_message(message: Message) {
    println!("[+] got new mail! (uid {})", message.uid());
    println!("from: {}", message.sender().unwrap_or_default());
    println!("subject: {}", message.subject().unwrap_or_default());
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();

    let config_path = shellexpand::tilde(&args.config).into_owned();
    let mut config = if Path::new(&config_path).exists() {
        WatchConfig::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?
    } else {
        log::info!("No config found at {}, reading credentials from the environment", config_path);
        config_from_env()?
    };

    if let Some(interval) = args.interval {
        config.interval_secs = interval;
    }
    if let Some(mailbox) = args.mailbox {
        config.mailbox = mailbox;
    }

    let watcher = MailWatcher::start(&config).context("Failed to start watcher")?;

    println!("[#] Waiting...");
    watcher.watch_func(config.interval(), print_message);

    Ok(())
}
