//! Configuration for the intake monitor
//!
//! The config document is overlaid onto the built-in defaults: mapping values
//! merge key by key, anything else (scalars, lists) replaces the default
//! wholesale. Loading never fails; a missing or unreadable document yields
//! the defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Location the daemon reads its config from when none is given
pub const DEFAULT_CONFIG_PATH: &str = "/app/config/monitor.json";

/// Token in the processor command replaced by the input directory or file
pub const INPUT_PLACEHOLDER: &str = "{input}";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Main monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Directory watched for incoming media
    pub input_directory: PathBuf,
    /// Directory the external processor writes into
    pub output_directory: PathBuf,
    /// Daemon log file (rotated daily, retention applies to its directory)
    pub log_file: PathBuf,
    /// Engine state snapshot location
    pub state_file: PathBuf,
    /// Accepted file suffixes, matched case-insensitively
    pub video_extensions: Vec<String>,
    /// Minimum size a file must reach before it qualifies
    pub min_file_size_mb: f64,
    /// Seconds between the two samples of one stability check
    pub stability_check_interval: f64,
    /// Consecutive stable checks required before a file is ready
    pub stability_check_count: u32,
    /// Ceiling on a single processor invocation, in seconds
    pub max_processing_time: u64,
    /// Seconds between directory scans
    pub check_interval: f64,
    /// Fingerprint files before handing them to the processor
    pub enable_hash_check: bool,
    /// Log files older than this many days are removed
    pub cleanup_days: u64,
    /// External processor invocation
    pub processor: ProcessorConfig,
    /// Filesystem event assistance
    pub watch: WatchConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            input_directory: PathBuf::from("/app/input"),
            output_directory: PathBuf::from("/app/output"),
            log_file: PathBuf::from("/app/logs/monitor.log"),
            state_file: PathBuf::from("/app/logs/monitor_state.json"),
            video_extensions: default_video_extensions(),
            min_file_size_mb: 200.0,
            stability_check_interval: 10.0,
            stability_check_count: 3,
            max_processing_time: 3600,
            check_interval: 60.0,
            enable_hash_check: true,
            cleanup_days: 7,
            processor: ProcessorConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

fn default_video_extensions() -> Vec<String> {
    [
        ".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".m4v", ".m2ts", ".ts", ".vob", ".iso",
        ".rmvb", ".rm", ".3gp", ".f4v", ".webm", ".strm", ".mpg", ".mpeg",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// How the external processor is pointed at its work
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorMode {
    /// One run over the whole input directory resolves every ready job
    #[default]
    Directory,
    /// One run per job, given the file path
    PerFile,
}

/// External processor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Program and arguments; `{input}` is substituted with the target path
    pub command: Vec<String>,
    /// Working directory for the child process
    pub working_dir: Option<PathBuf>,
    /// Directory or per-file invocation
    pub mode: ProcessorMode,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "/app/.venv/bin/javsp".to_string(),
                "-i".to_string(),
                INPUT_PLACEHOLDER.to_string(),
            ],
            working_dir: Some(PathBuf::from("/app")),
            mode: ProcessorMode::Directory,
        }
    }
}

/// Filesystem event configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Wake the scan loop early on create/modify events
    pub fs_events: bool,
    /// Quiet period before a burst of events triggers a scan
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            fs_events: true,
            debounce_ms: 2_000,
        }
    }
}

impl MonitorConfig {
    /// Load config from `path`, falling back to defaults, and create the
    /// directories the daemon needs.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let config = Self::load_or_default(path);
        if let Err(e) = config.ensure_directories() {
            tracing::warn!("Failed to create monitor directories: {}", e);
        }
        config
    }

    /// Load config from `path` without touching the filesystem otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::read_overrides(path) {
            Ok(Some(overrides)) => match Self::from_overrides(overrides) {
                Ok(config) => {
                    tracing::info!("Configuration loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid configuration in {}, using defaults: {}",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Ok(None) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read config {}, using defaults: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Read the user document as a JSON value. `.toml` files are parsed as
    /// TOML, everything else as JSON. Returns `None` when the file is absent.
    pub fn read_overrides(path: &Path) -> Result<Option<Value>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let value = if is_toml {
            let parsed: toml::Value = toml::from_str(&raw)?;
            serde_json::to_value(parsed)?
        } else {
            serde_json::from_str(&raw)?
        };

        if !value.is_object() {
            return Err(Error::config("config document must be a mapping"));
        }
        Ok(Some(value))
    }

    /// Overlay `overrides` onto the defaults and validate the result.
    pub fn from_overrides(overrides: Value) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        merge_values(&mut merged, overrides);
        let config: Self = serde_json::from_value(merged)?;
        Ok(config.validated())
    }

    /// Replace out-of-range values with defaults and normalize extensions.
    fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.stability_check_count == 0 {
            tracing::warn!("stability_check_count must be at least 1, using default");
            self.stability_check_count = defaults.stability_check_count;
        }
        if !(self.stability_check_interval.is_finite() && self.stability_check_interval > 0.0) {
            tracing::warn!("stability_check_interval must be positive, using default");
            self.stability_check_interval = defaults.stability_check_interval;
        }
        if !(self.check_interval.is_finite() && self.check_interval > 0.0) {
            tracing::warn!("check_interval must be positive, using default");
            self.check_interval = defaults.check_interval;
        }
        if !(self.min_file_size_mb.is_finite() && self.min_file_size_mb >= 0.0) {
            tracing::warn!("min_file_size_mb must not be negative, using default");
            self.min_file_size_mb = defaults.min_file_size_mb;
        }
        if self.max_processing_time == 0 {
            tracing::warn!("max_processing_time must be positive, using default");
            self.max_processing_time = defaults.max_processing_time;
        }
        if self.processor.command.is_empty() {
            tracing::warn!("processor.command is empty, using default");
            self.processor.command = defaults.processor.command;
        }

        self.video_extensions = self
            .video_extensions
            .iter()
            .map(|ext| ext.trim().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| {
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();

        self
    }

    /// Create input, output and log directories if absent.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.log_directory())?;
        std::fs::create_dir_all(&self.input_directory)?;
        std::fs::create_dir_all(&self.output_directory)?;
        Ok(())
    }

    /// Directory holding the log file and its rotated siblings
    pub fn log_directory(&self) -> PathBuf {
        self.log_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Minimum qualifying file size in bytes
    pub fn min_file_size_bytes(&self) -> u64 {
        (self.min_file_size_mb * BYTES_PER_MB) as u64
    }

    /// Whether `path` carries one of the accepted suffixes
    pub fn accepts_extension(&self, path: &Path) -> bool {
        matches_extension(path, &self.video_extensions)
    }

    pub fn stability_interval(&self) -> Duration {
        Duration::from_secs_f64(self.stability_check_interval)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.max_processing_time)
    }

    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(self.cleanup_days.saturating_mul(24 * 60 * 60))
    }
}

/// Case-insensitive suffix match of the file name against `extensions`
/// (already lowercased with a leading dot).
pub(crate) fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_lowercase();
    extensions.iter().any(|ext| name.ends_with(ext.as_str()))
}

/// Recursive overlay: mappings merge key by key, everything else replaces.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.video_extensions.len(), 19);
        assert_eq!(config.min_file_size_bytes(), 200 * 1024 * 1024);
        assert_eq!(config.stability_check_count, 3);
        assert_eq!(config.scan_interval(), Duration::from_secs(60));
        assert_eq!(config.log_retention(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.processor.mode, ProcessorMode::Directory);
    }

    #[test]
    fn test_nested_mapping_merges_key_by_key() {
        let config = MonitorConfig::from_overrides(json!({
            "processor": { "mode": "per_file" }
        }))
        .unwrap();

        assert_eq!(config.processor.mode, ProcessorMode::PerFile);
        // Sibling keys of the nested mapping keep their defaults
        assert_eq!(config.processor.command, ProcessorConfig::default().command);
    }

    #[test]
    fn test_sequences_replace_wholesale() {
        let config = MonitorConfig::from_overrides(json!({
            "video_extensions": ["MKV", "mp4"]
        }))
        .unwrap();

        assert_eq!(config.video_extensions, vec![".mkv", ".mp4"]);
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let config = MonitorConfig::default();
        assert!(config.accepts_extension(Path::new("/in/Movie.MKV")));
        assert!(config.accepts_extension(Path::new("/in/clip.m2ts")));
        assert!(!config.accepts_extension(Path::new("/in/notes.txt")));
        assert!(!config.accepts_extension(Path::new("/in/mkv")));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = MonitorConfig::from_overrides(json!({
            "stability_check_count": 0,
            "check_interval": -5,
            "processor": { "command": [] }
        }))
        .unwrap();

        assert_eq!(config.stability_check_count, 3);
        assert_eq!(config.check_interval, 60.0);
        assert!(!config.processor.command.is_empty());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig::load_or_default(dir.path().join("absent.json"));
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = MonitorConfig::load_or_default(&path);
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_toml_document_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(
            &path,
            r#"
min_file_size_mb = 1
check_interval = 5

[watch]
fs_events = false
"#,
        )
        .unwrap();

        let config = MonitorConfig::load_or_default(&path);
        assert_eq!(config.min_file_size_bytes(), 1024 * 1024);
        assert_eq!(config.check_interval, 5.0);
        assert!(!config.watch.fs_events);
        assert_eq!(config.watch.debounce_ms, 2_000);
    }

    #[test]
    fn test_load_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        let root = dir.path();
        std::fs::write(
            &path,
            json!({
                "input_directory": root.join("in"),
                "output_directory": root.join("out"),
                "log_file": root.join("logs/monitor.log"),
            })
            .to_string(),
        )
        .unwrap();

        MonitorConfig::load(&path);
        assert!(root.join("in").is_dir());
        assert!(root.join("out").is_dir());
        assert!(root.join("logs").is_dir());
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
        ]
    }

    fn document() -> impl Strategy<Value = Value> {
        scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-c]", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Every leaf path in `overlay` ends up in the merged document unchanged.
    fn assert_overlay_wins(merged: &Value, overlay: &Value) {
        match (merged, overlay) {
            (Value::Object(m), Value::Object(o)) => {
                for (key, value) in o {
                    assert_overlay_wins(&m[key], value);
                }
            }
            (m, o) => assert_eq!(m, o),
        }
    }

    proptest! {
        #[test]
        fn prop_overlay_values_always_win(base in document(), overlay in document()) {
            let mut merged = base.clone();
            merge_values(&mut merged, overlay.clone());
            assert_overlay_wins(&merged, &overlay);
        }

        #[test]
        fn prop_keys_absent_from_overlay_survive(
            base in prop::collection::btree_map("[a-c]", scalar(), 0..4),
            overlay in prop::collection::btree_map("[d-f]", scalar(), 0..4),
        ) {
            let mut merged = Value::Object(base.clone().into_iter().collect());
            merge_values(&mut merged, Value::Object(overlay.into_iter().collect()));
            for (key, value) in base {
                prop_assert_eq!(&merged[&key], &value);
            }
        }
    }
}
