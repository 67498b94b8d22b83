use std::env;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::model::{EntityKind, FloatWindow};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "NotesSync";
const APP_NAME: &str = "notesync";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<SyncConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let default_cfg = SyncConfig::default();
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }
        self.load()
    }

    pub fn load(&self) -> Result<SyncConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: SyncConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.sanitize();
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &SyncConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("NOTESYNC_CONFIG").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_dir.join("state"));
        let log_dir = state_dir.join("logs");

        Ok(Self {
            config_dir,
            config_file,
            state_dir,
            log_dir,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.state_dir, &self.log_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Client-side sync tuning. Everything here is a latency/traffic trade-off;
/// none of it changes correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub cache: CacheOptions,
    pub writeback: WritebackOptions,
    pub floating: FloatDefaults,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache: CacheOptions::default(),
            writeback: WritebackOptions::default(),
            floating: FloatDefaults::default(),
        }
    }
}

impl SyncConfig {
    fn sanitize(&mut self) {
        if self.cache.capacity == 0 {
            tracing::warn!("cache capacity 0 in config, falling back to default");
            self.cache.capacity = CacheOptions::default().capacity;
        }
        if self.writeback.debounce_ms == 0 {
            self.writeback.debounce_ms = WritebackOptions::default().debounce_ms;
        }
        if self.writeback.retry_ms == 0 {
            self.writeback.retry_ms = WritebackOptions::default().retry_ms;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Maximum number of content bodies kept per entity kind.
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            capacity: crate::cache::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WritebackOptions {
    /// Quiet period after the last geometry event before a flush.
    pub debounce_ms: u64,
    /// Re-check interval when a flush finds a write already in flight.
    pub retry_ms: u64,
}

impl Default for WritebackOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            retry_ms: 100,
        }
    }
}

/// Default placement of a detached floating view, applied when a listed
/// entity has never been placed (zero extent).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowDefault {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl WindowDefault {
    pub fn place(&self, float: FloatWindow) -> FloatWindow {
        if float.is_unset() {
            FloatWindow {
                x: self.x,
                y: self.y,
                w: self.w,
                h: self.h,
                show: float.show,
            }
        } else {
            float
        }
    }
}

impl Default for WindowDefault {
    fn default() -> Self {
        Self {
            x: 80.0,
            y: 80.0,
            w: 320.0,
            h: 300.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FloatDefaults {
    pub note: WindowDefault,
    pub task: WindowDefault,
}

impl FloatDefaults {
    pub fn for_kind(&self, kind: EntityKind) -> WindowDefault {
        match kind {
            EntityKind::Note => self.note,
            EntityKind::Task => self.task,
        }
    }
}

impl Default for FloatDefaults {
    fn default() -> Self {
        Self {
            note: WindowDefault::default(),
            task: WindowDefault {
                h: 360.0,
                ..WindowDefault::default()
            },
        }
    }
}
