use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the render debounce, in milliseconds.
pub const DEBOUNCE_ENV: &str = "HBS_PREVIEW_DEBOUNCE_MS";

/// Default delay between a non-immediate render request and the render.
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Companion module extensions, tried in order after the template path.
pub const DEFAULT_COMPANION_EXTENSIONS: &[&str] = &[".js", ".ts"];

/// Runtime configuration for the preview tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Delay applied to non-immediate render requests.
    #[serde(with = "duration_ms")]
    pub debounce: Duration,

    /// Known workspace folders. Templates inside one get it as their
    /// processing context's workspace folder.
    pub workspace_folders: Vec<PathBuf>,

    /// Companion module suffixes appended to the template path.
    pub companion_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            workspace_folders: Vec::new(),
            companion_extensions: DEFAULT_COMPANION_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Create a config for `cwd`, applying environment overrides.
    #[must_use]
    pub fn from_env(cwd: PathBuf) -> Self {
        let mut config = Self::new(cwd);
        if let Some(ms) = std::env::var(DEBOUNCE_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.debounce = Duration::from_millis(ms);
        }
        config
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set the render debounce delay.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Add a workspace folder. Relative folders are taken from `cwd`.
    #[must_use]
    pub fn with_workspace_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        let folder = crate::paths::absolutize(&folder.into(), &self.cwd);
        if !self.workspace_folders.contains(&folder) {
            self.workspace_folders.push(folder);
        }
        self
    }

    /// The workspace folder containing `path`, preferring the deepest match.
    #[must_use]
    pub fn workspace_folder_for(&self, path: &std::path::Path) -> Option<PathBuf> {
        self.workspace_folders
            .iter()
            .filter(|folder| path.starts_with(folder))
            .max_by_key(|folder| folder.components().count())
            .cloned()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
