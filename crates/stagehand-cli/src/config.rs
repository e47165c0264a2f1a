//! Configuration Vault – reads/writes `~/.stagehand/config.toml`.

use serde::{Deserialize, Serialize};
use stagehand_runtime::OrchestratorConfig;
use stagehand_types::StageError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted operator configuration stored in `~/.stagehand/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket port of the cockpit.
    #[serde(default = "default_cockpit_port")]
    pub cockpit_port: u16,

    /// Title of the game window to attach to.
    #[serde(default = "default_window")]
    pub window: String,

    /// Detection models to load.
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// Model active at startup.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Pause between perception cycles, in milliseconds.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Frames per second pushed to cockpit observers.
    #[serde(default = "default_stream_fps")]
    pub stream_fps: u32,

    /// Draw detection boxes on streamed frames.
    #[serde(default = "default_annotate")]
    pub annotate_frames: bool,

    /// SQLite file of the similarity memory; disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_path: Option<PathBuf>,
}

fn default_cockpit_port() -> u16 {
    stagehand_cockpit::DEFAULT_PORT
}
fn default_window() -> String {
    "gakumas".to_string()
}
fn default_models() -> Vec<String> {
    vec![default_model()]
}
fn default_model() -> String {
    "base_ui".to_string()
}
fn default_frame_interval_ms() -> u64 {
    50
}
fn default_stream_fps() -> u32 {
    10
}
fn default_annotate() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cockpit_port: default_cockpit_port(),
            window: default_window(),
            models: default_models(),
            default_model: default_model(),
            frame_interval_ms: default_frame_interval_ms(),
            stream_fps: default_stream_fps(),
            annotate_frames: default_annotate(),
            memory_path: None,
        }
    }
}

impl Config {
    /// Orchestrator settings derived from this file; everything else keeps
    /// its default.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            stream_fps: self.stream_fps,
            annotate_frames: self.annotate_frames,
            ..OrchestratorConfig::default()
        }
    }

    /// Models to load: the configured list plus the default model.
    pub fn model_names(&self) -> Vec<String> {
        let mut names = self.models.clone();
        if !names.contains(&self.default_model) {
            names.push(self.default_model.clone());
        }
        names
    }
}

/// Return the path to `~/.stagehand/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".stagehand").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, StageError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, StageError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        StageError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| StageError::Config(format!("failed to parse config: {e}")))
}

/// Apply `STAGEHAND_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STAGEHAND_COCKPIT_PORT` | `cockpit_port` |
/// | `STAGEHAND_MODEL` | `default_model` |
/// | `STAGEHAND_WINDOW` | `window` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("STAGEHAND_COCKPIT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.cockpit_port = port;
    }
    if let Ok(v) = std::env::var("STAGEHAND_MODEL") {
        cfg.default_model = v;
    }
    if let Ok(v) = std::env::var("STAGEHAND_WINDOW") {
        cfg.window = v;
    }
}

/// Save the config to disk, creating `~/.stagehand/` if necessary.
pub fn save(cfg: &Config) -> Result<(), StageError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), StageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StageError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                StageError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| StageError::Config(format!("failed to serialize config: {e}")))?;
    let write_error =
        |e: std::io::Error| StageError::Config(format!("failed to write config at {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_error)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_error)?;
    Ok(())
}
