//! Configuration – reads/writes `~/.permanence/config.toml`.
//!
//! Every field has a default, so a missing file, an empty file and a file
//! naming only one field are all valid.
//!
//! ```toml
//! actuation_timeout_ms = 30000   # 0 waits forever
//! queue_capacity = 1
//! output_capacity = 64
//!
//! [geometry]
//! known_width_mm = 76.0
//! footprint_divisor = 2.0
//! min_footprint = 10.0
//! approach_fraction = 0.3333
//!
//! [sim]
//! focal_length_x = 296.54
//! focal_length_y = 296.54
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use permanence_middleware::DEFAULT_OUTPUT_CAPACITY;
use permanence_perception::GeometryConfig;
use permanence_runtime::TrackerConfig;
use permanence_types::PermanenceError;
use serde::{Deserialize, Serialize};

/// Camera calibration reported by the simulated body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_focal_length")]
    pub focal_length_x: f32,
    #[serde(default = "default_focal_length")]
    pub focal_length_y: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            focal_length_x: default_focal_length(),
            focal_length_y: default_focal_length(),
        }
    }
}

/// Persisted configuration stored in `~/.permanence/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on one actuation call in milliseconds; `0` is unbounded.
    #[serde(default = "default_actuation_timeout_ms")]
    pub actuation_timeout_ms: u64,

    /// Intake queue slots.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Output events buffered per subscriber.
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,

    #[serde(default)]
    pub geometry: GeometryConfig,

    #[serde(default)]
    pub sim: SimConfig,
}

fn default_actuation_timeout_ms() -> u64 {
    30_000
}
fn default_queue_capacity() -> usize {
    1
}
fn default_output_capacity() -> usize {
    DEFAULT_OUTPUT_CAPACITY
}
fn default_focal_length() -> f32 {
    296.54
}

impl Default for Config {
    fn default() -> Self {
        Self {
            actuation_timeout_ms: default_actuation_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            output_capacity: default_output_capacity(),
            geometry: GeometryConfig::default(),
            sim: SimConfig::default(),
        }
    }
}

impl Config {
    pub fn actuation_timeout(&self) -> Option<Duration> {
        (self.actuation_timeout_ms > 0).then(|| Duration::from_millis(self.actuation_timeout_ms))
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            geometry: self.geometry,
            actuation_timeout: self.actuation_timeout(),
            intake_capacity: self.queue_capacity,
            output_capacity: self.output_capacity,
        }
    }
}

/// Return the path to `~/.permanence/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".permanence").join("config.toml")
}

/// Load the config with environment overrides applied.  Falls back to the
/// defaults when the file does not exist.
pub fn load() -> Result<Config, PermanenceError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the file at `path` as-is.  `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, PermanenceError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        PermanenceError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| PermanenceError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `PERMANENCE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PERMANENCE_ACTUATION_TIMEOUT_MS` | `actuation_timeout_ms` |
/// | `PERMANENCE_QUEUE_CAPACITY` | `queue_capacity` |
/// | `PERMANENCE_KNOWN_WIDTH_MM` | `geometry.known_width_mm` |
/// | `PERMANENCE_FOCAL_LENGTH` | `sim.focal_length_x` and `sim.focal_length_y` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(ms) = env_parse::<u64>("PERMANENCE_ACTUATION_TIMEOUT_MS") {
        cfg.actuation_timeout_ms = ms;
    }
    if let Some(n) = env_parse::<usize>("PERMANENCE_QUEUE_CAPACITY") {
        cfg.queue_capacity = n;
    }
    if let Some(mm) = env_parse::<f32>("PERMANENCE_KNOWN_WIDTH_MM")
        && mm > 0.0
    {
        cfg.geometry.known_width_mm = mm;
    }
    if let Some(f) = env_parse::<f32>("PERMANENCE_FOCAL_LENGTH")
        && f > 0.0
    {
        cfg.sim.focal_length_x = f;
        cfg.sim.focal_length_y = f;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Save the config to `~/.permanence/config.toml`.
pub fn save(cfg: &Config) -> Result<PathBuf, PermanenceError> {
    let path = config_path();
    save_to(cfg, &path)?;
    Ok(path)
}

/// Save `cfg` to `path`, creating the parent directory.  Both are restricted
/// to the owner on Unix.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), PermanenceError> {
    let io_err = |what: &str, e: std::io::Error| {
        PermanenceError::Config(format!("failed to {what} {}: {e}", path.display()))
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("create directory for", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("restrict directory for", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PermanenceError::Config(format!("failed to serialize config: {e}")))?;
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
            .map_err(|e| io_err("write", e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err("write", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tracker_defaults() {
        let tracker = Config::default().tracker_config();
        let expected = TrackerConfig::default();
        assert_eq!(tracker.geometry, expected.geometry);
        assert_eq!(tracker.actuation_timeout, expected.actuation_timeout);
        assert_eq!(tracker.intake_capacity, 1);
        assert_eq!(tracker.output_capacity, expected.output_capacity);
        assert_eq!(tracker.output_capacity, DEFAULT_OUTPUT_CAPACITY);
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let cfg = Config {
            actuation_timeout_ms: 0,
            ..Config::default()
        };
        assert_eq!(cfg.actuation_timeout(), None);
        assert_eq!(
            Config::default().actuation_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "queue_capacity = 4\n[geometry]\nknown_width_mm = 90.0\n").unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.queue_capacity, 4);
        assert_eq!(cfg.geometry.known_width_mm, 90.0);
        assert_eq!(cfg.geometry.footprint_divisor, 2.0);
        assert_eq!(cfg.actuation_timeout_ms, 30_000);
        assert_eq!(cfg.sim, SimConfig::default());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "queue_capacity = \"many\"").unwrap();
        assert!(matches!(load_from(&path), Err(PermanenceError::Config(_))));
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, Config::default());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn config_path_points_to_permanence_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.permanence/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn env_overrides_timeout() {
        // SAFETY: each env test owns a distinct variable.
        unsafe { std::env::set_var("PERMANENCE_ACTUATION_TIMEOUT_MS", "0") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.actuation_timeout(), None);
        unsafe { std::env::remove_var("PERMANENCE_ACTUATION_TIMEOUT_MS") };
    }

    #[test]
    fn env_overrides_focal_length_on_both_axes() {
        // SAFETY: each env test owns a distinct variable.
        unsafe { std::env::set_var("PERMANENCE_FOCAL_LENGTH", "512.5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.sim.focal_length_x, 512.5);
        assert_eq!(cfg.sim.focal_length_y, 512.5);
        unsafe { std::env::remove_var("PERMANENCE_FOCAL_LENGTH") };
    }

    #[test]
    fn env_overrides_ignore_invalid_values() {
        // SAFETY: each env test owns a distinct variable.
        unsafe { std::env::set_var("PERMANENCE_KNOWN_WIDTH_MM", "wide") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.geometry.known_width_mm, 76.0);
        unsafe { std::env::set_var("PERMANENCE_KNOWN_WIDTH_MM", "-3") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.geometry.known_width_mm, 76.0);
        unsafe { std::env::remove_var("PERMANENCE_KNOWN_WIDTH_MM") };
    }
}
