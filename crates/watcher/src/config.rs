//! Layered configuration (§4.11): compiled-in defaults, an optional JSON
//! config file, environment variable overrides, then `clap`-parsed CLI
//! flags, with each later layer winning. `clap`'s `env` attribute already
//! resolves CLI-vs-env precedence per field, so the file layer is the only
//! one this module has to merge by hand.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pipeline::watcher::PipelineConfig;
use serde::Deserialize;

/// Command-line flags, each overridable by the like-named environment
/// variable and falling back to the config file / compiled-in default when
/// neither is given.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "Watches an art site for new submissions and delivers matches to subscribed chat destinations")]
pub struct WatcherArgs {
    /// Optional JSON config file, layered beneath environment variables and CLI flags.
    #[clap(long, env = "WATCHER_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    #[clap(long, env = "WATCHER_ENABLED")]
    pub enabled: Option<bool>,

    #[clap(long, env = "WATCHER_NUM_DATA_FETCHERS")]
    pub num_data_fetchers: Option<usize>,

    #[clap(long, env = "WATCHER_NUM_MEDIA_DOWNLOADERS")]
    pub num_media_downloaders: Option<usize>,

    #[clap(long, env = "WATCHER_NUM_MEDIA_UPLOADERS")]
    pub num_media_uploaders: Option<usize>,

    #[clap(long, env = "WATCHER_MAX_READY_FOR_UPLOAD")]
    pub max_ready_for_upload: Option<usize>,

    #[clap(long, env = "WATCHER_FETCH_REFRESH_LIMIT")]
    pub fetch_refresh_limit: Option<u32>,

    #[clap(long, env = "WATCHER_BROWSE_POLL_INTERVAL_SECS")]
    pub browse_poll_interval_secs: Option<u64>,

    #[clap(long, env = "WATCHER_SEEN_IDS_CAPACITY")]
    pub seen_ids_capacity: Option<usize>,

    #[clap(long, env = "WATCHER_SUBSCRIPTIONS_PATH")]
    pub subscriptions_path: Option<PathBuf>,
}

/// The config file's shape: every field optional, since a file may set only
/// a subset and leave the rest to environment/CLI/defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    enabled: Option<bool>,
    num_data_fetchers: Option<usize>,
    num_media_downloaders: Option<usize>,
    num_media_uploaders: Option<usize>,
    max_ready_for_upload: Option<usize>,
    fetch_refresh_limit: Option<u32>,
    browse_poll_interval_secs: Option<u64>,
    seen_ids_capacity: Option<usize>,
    subscriptions_path: Option<PathBuf>,
}

/// Fully-resolved configuration handed to the entrypoint: whether the
/// watcher should run at all, the worker-count/backpressure knobs passed
/// straight through to [`PipelineConfig`], and the persisted store's path.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub pipeline: PipelineConfig,
    pub subscriptions_path: PathBuf,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pipeline: PipelineConfig::default(),
            subscriptions_path: PathBuf::from("subscriptions.json"),
        }
    }
}

impl WatcherConfig {
    pub fn load(args: WatcherArgs) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(path) = &args.config {
            let data = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
            let file: ConfigFile = serde_json::from_str(&data).with_context(|| format!("parsing config file {}", path.display()))?;
            config.apply_file(file);
        }
        config.apply_args(args);
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.enabled {
            self.enabled = v;
        }
        if let Some(v) = file.num_data_fetchers {
            self.pipeline.num_data_fetchers = v;
        }
        if let Some(v) = file.num_media_downloaders {
            self.pipeline.num_media_downloaders = v;
        }
        if let Some(v) = file.num_media_uploaders {
            self.pipeline.num_media_uploaders = v;
        }
        if let Some(v) = file.max_ready_for_upload {
            self.pipeline.max_ready_for_upload = v;
        }
        if let Some(v) = file.fetch_refresh_limit {
            self.pipeline.fetch_refresh_limit = v;
        }
        if let Some(v) = file.browse_poll_interval_secs {
            self.pipeline.browse_poll_interval = std::time::Duration::from_secs(v);
        }
        if let Some(v) = file.seen_ids_capacity {
            self.pipeline.seen_ids_capacity = v;
        }
        if let Some(v) = file.subscriptions_path {
            self.subscriptions_path = v;
        }
    }

    fn apply_args(&mut self, args: WatcherArgs) {
        if let Some(v) = args.enabled {
            self.enabled = v;
        }
        if let Some(v) = args.num_data_fetchers {
            self.pipeline.num_data_fetchers = v;
        }
        if let Some(v) = args.num_media_downloaders {
            self.pipeline.num_media_downloaders = v;
        }
        if let Some(v) = args.num_media_uploaders {
            self.pipeline.num_media_uploaders = v;
        }
        if let Some(v) = args.max_ready_for_upload {
            self.pipeline.max_ready_for_upload = v;
        }
        if let Some(v) = args.fetch_refresh_limit {
            self.pipeline.fetch_refresh_limit = v;
        }
        if let Some(v) = args.browse_poll_interval_secs {
            self.pipeline.browse_poll_interval = std::time::Duration::from_secs(v);
        }
        if let Some(v) = args.seen_ids_capacity {
            self.pipeline.seen_ids_capacity = v;
        }
        if let Some(v) = args.subscriptions_path {
            self.subscriptions_path = v;
        }
    }
}
