use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Marker embedded in weight filenames, followed by the model iteration
pub const WEIGHT_MARKER: &str = "weight_iter_";

/// Server run configuration, immutable for the lifetime of a run.
///
/// Loaded from a TOML file; every field has a default so a minimal file
/// works. CLI flags may override individual fields (see the server binary).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP address the server listens on
    pub bind: String,
    /// Root directory of the run: `model/`, `sgf/` and the log files
    pub training_dir: PathBuf,
    /// First iteration of this run (inclusive)
    pub start_iteration: i64,
    /// Last iteration of this run (inclusive)
    pub end_iteration: i64,
    /// Number of fresh self-play games collected per iteration
    pub games_per_iteration: usize,
    /// Replay-buffer window, in iterations
    pub replay_buffer: i64,
    /// Current weight filename, e.g. `weight_iter_0.pt`
    pub nn_file: String,
    /// Seed for the server RNG (per-worker self-play seeds derive from it)
    pub seed: u64,
    /// Seed the RNG from the wall clock instead of `seed`
    pub auto_seed: bool,
    /// Accept self-play records produced by a model other than the current one
    pub accept_different_model_games: bool,
    /// Keep-alive probe period, in seconds
    pub keep_alive: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9999".to_owned(),
            training_dir: ".".into(),
            start_iteration: 1,
            end_iteration: 100,
            games_per_iteration: 2000,
            replay_buffer: 20,
            nn_file: format!("{}0.pt", WEIGHT_MARKER),
            seed: 0,
            auto_seed: false,
            accept_different_model_games: false,
            keep_alive: 60,
        }
    }
}

impl ServerConfig {
    /// Loads the configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        let config: ServerConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
    fn validate(&self) -> Result<()> {
        if self.start_iteration < 1 || self.end_iteration < self.start_iteration {
            return Err(Error::config(format!(
                "invalid iteration range [{}, {}]",
                self.start_iteration, self.end_iteration
            )));
        }
        if self.games_per_iteration == 0 {
            return Err(Error::config("games_per_iteration must be positive"));
        }
        weight_iteration(&self.nn_file)?;
        Ok(())
    }
    /// The model iteration encoded in the configured weight filename
    pub fn initial_model_iteration(&self) -> Result<i64> {
        weight_iteration(&self.nn_file)
    }
    /// Keep-alive probe period
    pub fn keep_alive_period(&self) -> Duration {
        Duration::from_secs(self.keep_alive)
    }
    /// Directory the per-iteration record files are written to
    pub fn record_dir(&self) -> PathBuf {
        self.training_dir.join("sgf")
    }
    /// Path of the weight file for the given model iteration
    pub fn weight_path(&self, model_iteration: i64) -> String {
        format!(
            "{}/model/{}{}.pt",
            self.training_dir.display(),
            WEIGHT_MARKER,
            model_iteration
        )
    }
}

/// Extracts the model iteration from a weight filename: the integer between
/// the `weight_iter_` marker and the following `.`
pub fn weight_iteration(name: &str) -> Result<i64> {
    let start = name
        .find(WEIGHT_MARKER)
        .ok_or_else(|| Error::config(format!("no `{}` in weight filename: {}", WEIGHT_MARKER, name)))?
        + WEIGHT_MARKER.len();
    let rest = &name[start..];
    let digits = &rest[..rest.find('.').unwrap_or(rest.len())];
    digits
        .parse()
        .map_err(|_| Error::config(format!("malformed weight filename: {}", name)))
}
