//! Logger builder

use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{Config, DisplayConfig, Format};
use crate::error::{LogError, LogResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Keeps the root span with global fields entered
///
/// Dropping it leaves the subscriber installed but stops attaching the
/// fields to new events on this thread.
#[derive(Debug)]
pub struct LoggerGuard {
    _root_span: Option<tracing::span::EnteredSpan>,
}

/// Apply shared display flags to a fmt layer and box it. `without_time`
/// changes the layer type, hence the macro.
macro_rules! finish_layer {
    ($layer:expr, $display:expr) => {{
        let display: &DisplayConfig = $display;
        let layer = $layer
            .with_ansi(display.colors)
            .with_target(display.target)
            .with_file(display.source)
            .with_line_number(display.source)
            .with_thread_names(display.thread_names)
            .with_thread_ids(display.thread_ids);
        if display.time {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    }};
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Parse the filter without touching global state
    pub fn filter(&self) -> LogResult<EnvFilter> {
        EnvFilter::try_new(&self.config.level).map_err(|e| LogError::Filter {
            filter: self.config.level.clone(),
            reason: e.to_string(),
        })
    }

    /// Build and install the global subscriber
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = self.filter()?;
        let display = &self.config.display;

        let fmt_layer: BoxedLayer = match self.config.format {
            Format::Pretty => finish_layer!(fmt::layer().pretty(), display),
            Format::Compact => finish_layer!(fmt::layer().compact(), display),
            Format::Json => finish_layer!(
                fmt::layer().json().flatten_event(display.flatten),
                display
            ),
        };

        Registry::default()
            .with(fmt_layer)
            .with(filter)
            .try_init()
            .map_err(|e| LogError::Init(e.to_string()))?;

        let root_span = (!self.config.fields.is_empty()).then(|| {
            let fields = &self.config.fields;
            tracing::info_span!(
                "app",
                service = fields.service.as_deref().unwrap_or(""),
                env = fields.env.as_deref().unwrap_or("")
            )
            .entered()
        });

        tracing::debug!(
            level = %self.config.level,
            format = ?self.config.format,
            "logger initialized"
        );

        Ok(LoggerGuard {
            _root_span: root_span,
        })
    }
}
