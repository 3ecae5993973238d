use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::{
    DEFAULT_RECORD_SECONDS, DEFAULT_SAMPLE_RATE, DEFAULT_TEMPO_BPM, MAX_RECORD_SECONDS,
    MAX_TEMPO_BPM, MIN_RECORD_SECONDS, MIN_TEMPO_BPM, NUM_CHANNELS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Per-track recording limit in seconds.
    pub record_seconds: u32,
    /// Size of the preallocated track buffers in seconds.
    pub max_record_seconds: u32,
    pub tempo_bpm: f64,
    pub patch_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            record_seconds: DEFAULT_RECORD_SECONDS,
            max_record_seconds: MAX_RECORD_SECONDS,
            tempo_bpm: DEFAULT_TEMPO_BPM,
            patch_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        Ok(config.sanitized())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Clamp every field into the range the engine accepts.
    pub fn sanitized(mut self) -> Self {
        if self.sample_rate == 0 {
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        self.max_record_seconds = self.max_record_seconds.max(MIN_RECORD_SECONDS);
        self.record_seconds = self
            .record_seconds
            .clamp(MIN_RECORD_SECONDS, self.max_record_seconds);
        if !self.tempo_bpm.is_finite() {
            self.tempo_bpm = DEFAULT_TEMPO_BPM;
        }
        self.tempo_bpm = self.tempo_bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM);
        self
    }

    /// Samples (not frames) each track buffer is allocated with.
    pub fn buffer_samples(&self) -> usize {
        self.max_record_seconds as usize * self.sample_rate as usize * NUM_CHANNELS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("tempo_bpm = 96.0\n").unwrap();
        assert_eq!(config.tempo_bpm, 96.0);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.record_seconds, 120);
        assert_eq!(config.max_record_seconds, 300);
        assert!(config.patch_dir.is_none());
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let text = "record_seconds = 5\nmax_record_seconds = 60\ntempo_bpm = 900.0\n";
        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.record_seconds, 10);
        assert_eq!(config.max_record_seconds, 60);
        assert_eq!(config.tempo_bpm, 300.0);

        let config = EngineConfig::from_toml_str("record_seconds = 500\n").unwrap();
        assert_eq!(config.record_seconds, 300);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(EngineConfig::from_toml_str("tempo_bpm = \"fast\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join("fourtrack_config_test.toml");
        std::fs::write(&path, "sample_rate = 48000\npatch_dir = \"/tmp/patches\"\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.patch_dir, Some(PathBuf::from("/tmp/patches")));
        assert_eq!(config.buffer_samples(), 300 * 48000 * 2);
    }
}
