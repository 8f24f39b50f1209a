pub mod capture;
pub mod format;
pub mod output;
pub mod shm;
pub mod utils;

use std::path::Path;

use capture::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, Plane, VideoParams};
pub use output::ShmOutput;
pub use shm::SegmentReader;

/// Segment name used when none is configured
pub const DEFAULT_BUFFER_NAME: &str = "shmvo";

/// Environment variable prefix, e.g. `SHMVO_OUTPUT__BUFFER_NAME`
pub const ENV_PREFIX: &str = "SHMVO";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub source: SourceConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Name readers attach to
    #[serde(alias = "buffer-name")]
    pub buffer_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub format: PixelFormat,
    /// Stop after this many frames; run until interrupted when unset
    pub frames: Option<u64>,
    /// Extra bytes at the end of every source row
    pub padding: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            buffer_name: DEFAULT_BUFFER_NAME.to_owned(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            format: PixelFormat::Yuv420p,
            frames: None,
            padding: 0,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "shmvo=info".to_owned(),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` if given, then `SHMVO_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
