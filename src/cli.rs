//! Command-Line Interface (CLI) argument parsing.
//!
//! The flags are parsed with `clap` at startup and merged, as the highest
//! priority layer, over the `gaswatch.toml` file and the environment.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Sends a push alert to every registered device when the gas detector
/// reports a leak.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Minimum time between two alerts, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub cooldown: Option<u64>,

    /// Log notifications instead of sending them.
    #[arg(long)]
    pub dry_run: bool,

    /// JSON file holding the registered push tokens.
    #[arg(long, value_name = "FILE")]
    pub subscribers: Option<PathBuf>,

    /// Maximum number of concurrent sends.
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(cooldown) = self.cooldown {
            dict.insert("alerting".into(), nested("cooldown_seconds", Value::from(cooldown)));
        }

        if self.dry_run {
            dict.insert("transport".into(), nested("kind", Value::from("log")));
        }

        if let Some(path) = &self.subscribers {
            dict.insert(
                "subscribers".into(),
                nested("store_path", Value::from(path.to_string_lossy().into_owned())),
            );
        }

        if let Some(n) = self.max_concurrency {
            dict.insert("dispatch".into(), nested("max_concurrency", Value::from(n as u64)));
        }

        if self.json_logs {
            dict.insert("log_format".into(), Value::from("json"));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}

fn nested(key: &str, value: Value) -> Value {
    let mut dict = Dict::new();
    dict.insert(key.to_string(), value);
    Value::from(dict)
}
