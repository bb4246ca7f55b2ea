use std::{path::PathBuf, time::Duration};

use vulkanalia::Version;

pub const VALIDATION_ENABLED: bool = cfg!(debug_assertions);
pub const SHADER_DIR_VAR: &str = "TRIGON_SHADER_DIR";

/// Startup settings for the engine. There is no configuration
/// file: defaults are compiled in and the shader directory can
/// be overridden from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub title: String,
    /// Initial window size in physical pixels.
    pub width: u32,
    pub height: u32,
    pub shader_dir: PathBuf,
    /// Bound on the frame-complete fence wait and on image
    /// acquisition.
    pub frame_timeout: Duration,
    pub validation: bool,
    pub min_api_version: Version,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "trigon".to_string(),
            width: 1700,
            height: 900,
            shader_dir: PathBuf::from("shaders"),
            frame_timeout: Duration::from_secs(1),
            validation: VALIDATION_ENABLED,
            min_api_version: Version::new(1, 1, 0),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(SHADER_DIR_VAR) {
            config.shader_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn shader_path(&self, name: &str) -> PathBuf {
        self.shader_dir.join(name)
    }
}
