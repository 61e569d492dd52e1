use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use feedreader::config::{Config, DEFAULT_FEED_NAME};
use feedreader::feed::{EntryEvent, FeedEvent, MetadataEvent, MetadataValue};
use feedreader::storage::StoreConfig;
use feedreader::FeedRuntime;

/// Store name used for `--state-db`.
const CLI_STORE: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "feedreader", about = "Stream new entries from RSS/Atom feeds")]
struct Args {
    /// Feed URL (replaces any feeds from the config file)
    url: Option<String>,

    /// Poll interval in seconds (0 = check once)
    #[arg(short, long, value_name = "SECS")]
    interval: Option<u64>,

    /// Parser to use (rss, atom, generic); autodetected when omitted
    #[arg(long, value_name = "NAME")]
    reader: Option<String>,

    /// SQLite database for seen entries
    #[arg(long, value_name = "PATH", requires = "state_key")]
    state_db: Option<PathBuf>,

    /// Key of this feed's state in --state-db
    #[arg(long, value_name = "KEY", requires = "state_db")]
    state_key: Option<String>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Fold command line overrides into `config`.
    ///
    /// A URL replaces the configured feeds. The other flags land in
    /// `[defaults]`, so they only fill in what a configured feed leaves unset.
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.url {
            config.feeds.clear();
            config.defaults.url = Some(url.clone());
        }

        let defaults = &mut config.defaults;
        if let Some(interval) = self.interval {
            defaults.interval_secs = Some(interval);
        }
        if let Some(reader) = &self.reader {
            defaults.reader = Some(reader.clone());
        }
        if let (Some(path), Some(key)) = (&self.state_db, &self.state_key) {
            defaults.store = Some(CLI_STORE.to_string());
            defaults.state_key = Some(key.clone());
            config.stores.insert(
                CLI_STORE.to_string(),
                StoreConfig::backend("sqlite").with_path(path.clone()),
            );
        }
    }
}

/// A line of output, tagged with the feed name.
enum Output {
    Entry(String, EntryEvent),
    Metadata(String, MetadataEvent),
}

fn print_event(output: &Output, json: bool) {
    match (output, json) {
        (Output::Entry(feed, event), true) => {
            let line = serde_json::json!({ "feed": feed, "entry": &*event.entry });
            println!("{line}");
        }
        (Output::Metadata(feed, event), true) => {
            let line = serde_json::json!({ "feed": feed, "metadata": &*event.changes });
            println!("{line}");
        }
        (Output::Entry(feed, event), false) => {
            let entry = &event.entry;
            let published = entry
                .published
                .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "----------------".to_string());
            let prefix = match feed.as_str() {
                DEFAULT_FEED_NAME => String::new(),
                name => format!("[{name}] "),
            };
            println!(
                "{prefix}{published}  {}  {}",
                entry.title.as_deref().unwrap_or("(untitled)"),
                entry.link.as_deref().unwrap_or(&event.feed_url)
            );
        }
        (Output::Metadata(feed, event), false) => {
            for (field, value) in event.changes.iter() {
                let value = match value {
                    MetadataValue::Text(text) => text.clone(),
                    MetadataValue::List(list) => list.join(", "),
                    MetadataValue::Timestamp(ts) => ts.to_rfc3339(),
                };
                eprintln!("[{feed}] {field}: {value}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => Config::default(),
    };
    args.apply(&mut config);

    if config.resolved_feeds().is_empty() {
        anyhow::bail!("No feed configured: pass a URL or a config file with [feeds]");
    }

    let runtime = FeedRuntime::from_config(&config)
        .await
        .context("Failed to set up feeds")?;

    // Forward every session's events into one channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Output>();
    for (name, session) in runtime.sessions() {
        let mut events = session.events().subscribe();
        let tx = tx.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            loop {
                let output = match events.recv().await {
                    Ok(FeedEvent::EntryDiscovered(event)) => Output::Entry(name.clone(), event),
                    Ok(FeedEvent::MetadataChanged(event)) => Output::Metadata(name.clone(), event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(feed = %name, skipped, "Output fell behind, events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if tx.send(output).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    runtime.start().await.context("Failed to start feeds")?;

    // First cycle right away instead of after one interval
    for (name, session) in runtime.sessions() {
        if let Err(e) = session.update().await {
            tracing::warn!(feed = %name, url = %session.url(), error = %e, "Initial update failed");
        }
    }

    if runtime.sessions().all(|(_, session)| session.interval().is_none()) {
        // No timers: print what the first cycle found and exit.
        // Dropping the sessions closes their event channels.
        runtime.shutdown().await;
        drop(runtime);
        while let Some(output) = rx.recv().await {
            print_event(&output, args.json);
        }
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            output = rx.recv() => match output {
                Some(output) => print_event(&output, args.json),
                None => break,
            },
        }
    }

    runtime.shutdown().await;
    Ok(())
}
