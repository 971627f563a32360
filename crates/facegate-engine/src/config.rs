use facegate_core::{DetectorKind, MatcherConfig, ScoreWeights, DEFAULT_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding one record file per identity.
    pub store_dir: PathBuf,
    /// Default recognition threshold in [0, 1].
    pub threshold: f32,
    /// Detector, extraction layout and score weights.
    pub matcher: MatcherConfig,
}

/// Optional TOML overlay named by `FACEGATE_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    store_dir: Option<PathBuf>,
    threshold: Option<f32>,
    detector: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    equalize: Option<bool>,
    parallel: Option<bool>,
    histogram_bins: Option<usize>,
    canonical_size: Option<u32>,
    weights: Option<ScoreWeights>,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    ///
    /// When `FACEGATE_CONFIG` names a TOML file it is applied first;
    /// environment variables override it. A model path selects the cascade
    /// detector unless a detector is named explicitly.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self {
            store_dir: default_store_dir(&lookup),
            threshold: DEFAULT_THRESHOLD,
            matcher: MatcherConfig::default(),
        };

        let mut detector_named = false;
        if let Some(path) = lookup("FACEGATE_CONFIG") {
            let file = load_file(Path::new(&path))?;
            detector_named = file.detector.is_some();
            config.apply_file(&file);
        }

        if let Some(dir) = lookup("FACEGATE_STORE_DIR") {
            config.store_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse(&lookup, "FACEGATE_THRESHOLD")? {
            config.threshold = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEGATE_HISTOGRAM_BINS")? {
            config.matcher.extractor.histogram_bins = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEGATE_CANONICAL_SIZE")? {
            config.matcher.extractor.canonical_size = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEGATE_DETECTOR")? {
            config.matcher.detector = v;
            detector_named = true;
        }
        if let Some(path) = lookup("FACEGATE_MODEL_PATH") {
            config.matcher.model_path = Some(PathBuf::from(path));
        }
        if !detector_named && config.matcher.model_path.is_some() {
            config.matcher.detector = DetectorKind::Cascade;
        }
        if let Some(v) = env_flag(&lookup, "FACEGATE_EQUALIZE") {
            config.matcher.locator.equalize = v;
        }
        if let Some(v) = env_flag(&lookup, "FACEGATE_PARALLEL") {
            config.matcher.parallel = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: &FileConfig) {
        if let Some(dir) = &file.store_dir {
            self.store_dir = dir.clone();
        }
        if let Some(v) = file.threshold {
            self.threshold = v;
        }
        if let Some(v) = file.detector {
            self.matcher.detector = v;
        }
        if let Some(path) = &file.model_path {
            self.matcher.model_path = Some(path.clone());
        }
        if let Some(v) = file.equalize {
            self.matcher.locator.equalize = v;
        }
        if let Some(v) = file.parallel {
            self.matcher.parallel = v;
        }
        if let Some(v) = file.histogram_bins {
            self.matcher.extractor.histogram_bins = v;
        }
        if let Some(v) = file.canonical_size {
            self.matcher.extractor.canonical_size = v;
        }
        if let Some(w) = file.weights {
            self.matcher.weights = w;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        if self.matcher.detector == DetectorKind::Cascade && self.matcher.model_path.is_none() {
            return Err(ConfigError::Invalid(
                "the cascade detector needs FACEGATE_MODEL_PATH".into(),
            ));
        }
        self.matcher
            .weights
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.matcher
            .extractor
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "config file loaded");
    Ok(file)
}

/// `$XDG_DATA_HOME/facegate/faces`, falling back to `~/.local/share`.
fn default_store_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
        .join("faces")
}

fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

fn env_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).map(|v| v.trim() != "0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("HOME", "/home/ada")]).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/home/ada/.local/share/facegate/faces"));
        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.matcher, MatcherConfig::default());
        assert!(config.matcher.parallel);
        assert!(!config.matcher.locator.equalize);
    }

    #[test]
    fn test_xdg_data_home() {
        let config = load(&[("XDG_DATA_HOME", "/data"), ("HOME", "/home/ada")]).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/data/facegate/faces"));
    }

    #[test]
    fn test_env_overrides() {
        let config = load(&[
            ("FACEGATE_STORE_DIR", "/srv/faces"),
            ("FACEGATE_THRESHOLD", "0.65"),
            ("FACEGATE_HISTOGRAM_BINS", "64"),
            ("FACEGATE_CANONICAL_SIZE", "120"),
            ("FACEGATE_DETECTOR", "full-frame"),
            ("FACEGATE_EQUALIZE", "1"),
            ("FACEGATE_PARALLEL", "0"),
        ])
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/srv/faces"));
        assert!((config.threshold - 0.65).abs() < 1e-6);
        assert_eq!(config.matcher.extractor.histogram_bins, 64);
        assert_eq!(config.matcher.extractor.canonical_size, 120);
        assert_eq!(config.matcher.detector, DetectorKind::FullFrame);
        assert!(config.matcher.locator.equalize);
        assert!(!config.matcher.parallel);
    }

    #[test]
    fn test_model_path_selects_cascade() {
        let config = load(&[("FACEGATE_MODEL_PATH", "/opt/seeta_fd_frontal_v1.0.bin")]).unwrap();
        assert_eq!(config.matcher.detector, DetectorKind::Cascade);
        assert_eq!(
            config.matcher.model_path.as_deref(),
            Some(Path::new("/opt/seeta_fd_frontal_v1.0.bin"))
        );

        let config = load(&[
            ("FACEGATE_MODEL_PATH", "/opt/seeta_fd_frontal_v1.0.bin"),
            ("FACEGATE_DETECTOR", "contrast"),
        ])
        .unwrap();
        assert_eq!(config.matcher.detector, DetectorKind::Contrast);
    }

    #[test]
    fn test_cascade_without_model_is_invalid() {
        assert!(matches!(
            load(&[("FACEGATE_DETECTOR", "cascade")]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unparsable_value_is_rejected() {
        let err = load(&[("FACEGATE_THRESHOLD", "high")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "FACEGATE_THRESHOLD", .. }));
        assert!(load(&[("FACEGATE_DETECTOR", "haar")]).is_err());
    }

    #[test]
    fn test_out_of_range_threshold() {
        assert!(matches!(
            load(&[("FACEGATE_THRESHOLD", "1.5")]),
            Err(ConfigError::Invalid(_))
        ));
        assert!(load(&[("FACEGATE_THRESHOLD", "NaN")]).is_err());
    }

    #[test]
    fn test_file_overlay_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facegate.toml");
        std::fs::write(
            &path,
            r#"
store_dir = "/from/file"
threshold = 0.7
detector = "full-frame"

[weights]
intensity = 0.5
texture = 0.5
corner = 0.0
center = 0.0
"#,
        )
        .unwrap();

        let path_str = path.to_string_lossy().into_owned();
        let config = load(&[
            ("FACEGATE_CONFIG", path_str.as_str()),
            ("FACEGATE_THRESHOLD", "0.6"),
        ])
        .unwrap();

        assert_eq!(config.store_dir, PathBuf::from("/from/file"));
        assert!((config.threshold - 0.6).abs() < 1e-6);
        assert_eq!(config.matcher.detector, DetectorKind::FullFrame);
        assert_eq!(config.matcher.weights.intensity, 0.5);
        assert_eq!(config.matcher.weights.corner, 0.0);
    }

    #[test]
    fn test_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let missing_str = missing.to_string_lossy().into_owned();
        assert!(matches!(
            load(&[("FACEGATE_CONFIG", missing_str.as_str())]),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "thresh = 0.5\n").unwrap();
        let bad_str = bad.to_string_lossy().into_owned();
        assert!(matches!(
            load(&[("FACEGATE_CONFIG", bad_str.as_str())]),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_weights_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.toml");
        std::fs::write(&path, "[weights]\nintensity = -1.0\n").unwrap();
        let path_str = path.to_string_lossy().into_owned();
        assert!(matches!(
            load(&[("FACEGATE_CONFIG", path_str.as_str())]),
            Err(ConfigError::Invalid(_))
        ));
    }
}
