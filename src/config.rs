use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::endpoints::Endpoints;
use crate::retry::RetryPolicy;
use crate::{fs_utils, paths};

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub endpoints: Endpoints,
    pub polling: PollingConfig,
}

/// How long to wait for the service to finish rendering a clip.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    pub max_attempts: u32,
    pub interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 300,
            interval_secs: 1,
        }
    }
}

impl PollingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_attempts,
            delay: Duration::from_secs(self.interval_secs),
        }
    }
}

#[derive(Debug, Args)]
#[command(about = "Manage endpoint and polling settings")]
pub struct ConfigArgs {
    #[arg(long, help = "Point every endpoint at another host (e.g. https://home.nest.com)")]
    pub home_url: Option<String>,
    #[arg(long, help = "Give up on a clip after this many failed download attempts")]
    pub poll_attempts: Option<u32>,
    #[arg(long, help = "Seconds to wait between download attempts")]
    pub poll_interval: Option<u64>,
    #[arg(long, help = "Print the current configuration")]
    pub show: bool,
}

pub fn run(args: ConfigArgs) -> Result<()> {
    let has_updates =
        args.home_url.is_some() || args.poll_attempts.is_some() || args.poll_interval.is_some();

    if !args.show && !has_updates {
        bail!("at least one flag is required; use --home-url, --poll-attempts, --poll-interval, or --show");
    }

    let mut config = load_config()?;
    if args.show && !has_updates {
        print_config(&config)?;
        return Ok(());
    }

    if let Some(url) = args.home_url {
        reqwest::Url::parse(&url).with_context(|| format!("invalid home URL: {url}"))?;
        config.endpoints = Endpoints::for_host(&url);
    }

    if let Some(value) = args.poll_attempts {
        config.polling.max_attempts = value;
    }

    if let Some(value) = args.poll_interval {
        config.polling.interval_secs = value;
    }

    let path = paths::config_path()?;
    fs_utils::write_json_private(&path, &config)?;
    println!("Config updated at {}", path.display());
    if args.show {
        print_config(&config)?;
    }
    Ok(())
}

pub(crate) fn load_config() -> Result<Config> {
    let path = paths::config_path()?;
    if !path.exists() {
        return Ok(Config::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    Ok(config)
}

fn print_config(config: &Config) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("failed to format config")?;
    println!("{json}");
    Ok(())
}
