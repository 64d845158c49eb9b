//! Configuration presets

use super::{Config, DisplayConfig, Fields, Format};

impl Config {
    /// Build from the environment.
    ///
    /// Level comes from `SLUICE_LOG`, then `RUST_LOG`. Format from
    /// `SLUICE_LOG_FORMAT`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("SLUICE_LOG") {
            config.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            config.level = level;
        }

        if let Ok(format) = std::env::var("SLUICE_LOG_FORMAT") {
            config.format = Format::parse_lossy(&format);
        }

        config.display.parse_env();
        config.fields = Fields::from_env();
        config
    }

    /// Pretty output at debug level
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Pretty,
            display: DisplayConfig {
                colors: true,
                source: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// JSON output at info level
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                source: false,
                flatten: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Set the filter directive
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the service name recorded on the root span
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.fields.service = Some(service.into());
        self
    }
}
