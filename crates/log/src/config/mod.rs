//! Logger configuration

mod presets;

use serde::{Deserialize, Serialize};

/// Complete logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directive string, e.g. `info,sluice_pool=debug`
    pub level: String,
    /// Output format
    pub format: Format,
    /// What to print alongside each event
    pub display: DisplayConfig,
    /// Fields attached to every event through a root span
    pub fields: Fields,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Compact,
            display: DisplayConfig::default(),
            fields: Fields::default(),
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human oriented
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl Format {
    /// Parse a format name, falling back to [`Format::Compact`].
    #[must_use]
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Per-event decorations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DisplayConfig {
    /// Print timestamps
    pub time: bool,
    /// Print the event target
    pub target: bool,
    /// Print file and line
    pub source: bool,
    /// Print thread names (workers are named `sluice-worker-N`)
    pub thread_names: bool,
    /// Print thread ids
    pub thread_ids: bool,
    /// ANSI colors
    pub colors: bool,
    /// Flatten event fields into the top-level JSON object
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time: true,
            target: true,
            source: false,
            thread_names: true,
            thread_ids: false,
            colors: true,
            flatten: false,
        }
    }
}

impl DisplayConfig {
    /// Override flags from `SLUICE_LOG_*` environment variables.
    pub fn parse_env(&mut self) {
        let flag = |name: &str| std::env::var(name).ok().map(|v| parse_bool(&v));
        if let Some(Some(colors)) = flag("SLUICE_LOG_COLORS") {
            self.colors = colors;
        }
        if let Some(Some(source)) = flag("SLUICE_LOG_SOURCE") {
            self.source = source;
        }
        if let Some(Some(time)) = flag("SLUICE_LOG_TIME") {
            self.time = time;
        }
    }
}

/// Global fields, recorded on a root span
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fields {
    /// Service name
    pub service: Option<String>,
    /// Deployment environment
    pub env: Option<String>,
}

impl Fields {
    /// Read `SLUICE_SERVICE` and `SLUICE_ENV`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            service: std::env::var("SLUICE_SERVICE").ok(),
            env: std::env::var("SLUICE_ENV").ok(),
        }
    }

    /// True when no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.service.is_none() && self.env.is_none()
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
