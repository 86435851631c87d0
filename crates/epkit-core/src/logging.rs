//! Structured logging for hosts and plugins.
//!
//! Process-wide output is configured once with [`init_logging`]. Hosts hand
//! plugins a [`Logger`] handle; plugins write through it and never close it.
//! Events emitted from hot paths should go through [`Logger::log_limited`],
//! which throttles repeated messages per key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Trace-level logging (most verbose)
    Trace,
    /// Debug-level logging
    Debug,
    /// Info-level logging
    Info,
    /// Warn-level logging
    Warn,
    /// Error-level logging (least verbose)
    Error,
}

impl Severity {
    fn to_tracing_level(self) -> Level {
        match self {
            Severity::Trace => Level::TRACE,
            Severity::Debug => Level::DEBUG,
            Severity::Info => Level::INFO,
            Severity::Warn => Level::WARN,
            Severity::Error => Level::ERROR,
        }
    }
}

/// Process-wide logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level to display when `RUST_LOG` is not set.
    pub level: Severity,
    /// Whether to include thread IDs
    pub with_thread_ids: bool,
    /// Whether to include source code locations
    pub with_source_location: bool,
    /// Whether to log span events (enter/exit)
    pub with_span_events: bool,
    /// Whether to output in JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Severity::Info,
            with_thread_ids: false,
            with_source_location: false,
            with_span_events: false,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum log level.
    pub fn with_level(mut self, level: Severity) -> Self {
        self.level = level;
        self
    }

    /// Enable or disable thread IDs.
    pub fn with_thread_ids(mut self, enable: bool) -> Self {
        self.with_thread_ids = enable;
        self
    }

    /// Enable or disable source code locations.
    pub fn with_source_location(mut self, enable: bool) -> Self {
        self.with_source_location = enable;
        self
    }

    /// Enable or disable JSON output format.
    pub fn with_json_format(mut self, enable: bool) -> Self {
        self.json_format = enable;
        self
    }

    /// Verbose configuration for plugin development.
    pub fn development() -> Self {
        Self {
            level: Severity::Debug,
            with_thread_ids: true,
            with_source_location: true,
            with_span_events: true,
            json_format: false,
        }
    }
}

/// Install the global subscriber. Later calls are ignored.
///
/// # Example
///
/// ```no_run
/// use epkit_core::logging::{init_logging, LoggingConfig};
///
/// init_logging(LoggingConfig::development());
/// ```
pub fn init_logging(config: LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_tracing_level().as_str()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let span_events = if config.with_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_current_span(true)
            .with_thread_ids(config.with_thread_ids)
            .with_file(config.with_source_location)
            .with_line_number(config.with_source_location);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(span_events)
            .with_thread_ids(config.with_thread_ids)
            .with_file(config.with_source_location)
            .with_line_number(config.with_source_location)
            .with_target(config.with_source_location);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
}

/// Initialize logging with default configuration.
pub fn init_default_logging() {
    init_logging(LoggingConfig::default());
}

/// Fixed-window limiter keyed by message class.
#[derive(Debug)]
pub struct RateLimiter {
    max_events: u32,
    window: Duration,
    windows: DashMap<String, (Instant, u32)>,
    suppressed: AtomicU64,
}

impl RateLimiter {
    /// Allow at most `max_events` per key within each `window`.
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            windows: DashMap::new(),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Record an event for `key`; returns false if it should be dropped.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert((now, 0));
        let (start, count) = entry.value_mut();

        if now.duration_since(*start) >= self.window {
            *start = now;
            *count = 0;
        }

        if *count < self.max_events {
            *count += 1;
            true
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Number of events dropped so far.
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(16, Duration::from_secs(1))
    }
}

/// Logger handle a host lends to plugins.
///
/// Cloning is cheap and clones share the rate limiter.
#[derive(Debug, Clone)]
pub struct Logger {
    name: Arc<str>,
    min_severity: Severity,
    limiter: Arc<RateLimiter>,
}

impl Logger {
    /// Create a logger that forwards everything at `Debug` and above.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            min_severity: Severity::Debug,
            limiter: Arc::new(RateLimiter::default()),
        }
    }

    /// Set the minimum severity forwarded to the subscriber.
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Replace the rate limiter used by [`Logger::log_limited`].
    pub fn with_rate_limit(mut self, max_events: u32, window: Duration) -> Self {
        self.limiter = Arc::new(RateLimiter::new(max_events, window));
        self
    }

    /// Logger name, attached to every event.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether events at `severity` are forwarded.
    pub fn is_enabled(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    /// Emit an event.
    pub fn log(&self, severity: Severity, message: &str) {
        if !self.is_enabled(severity) {
            return;
        }

        match severity {
            Severity::Trace => tracing::trace!(logger = %self.name, "{}", message),
            Severity::Debug => tracing::debug!(logger = %self.name, "{}", message),
            Severity::Info => tracing::info!(logger = %self.name, "{}", message),
            Severity::Warn => tracing::warn!(logger = %self.name, "{}", message),
            Severity::Error => tracing::error!(logger = %self.name, "{}", message),
        }
    }

    /// Emit an event unless `key` exceeded its rate. Returns whether it was emitted.
    pub fn log_limited(&self, key: &str, severity: Severity, message: &str) -> bool {
        if !self.is_enabled(severity) || !self.limiter.allow(key) {
            return false;
        }
        self.log(severity, message);
        true
    }

    /// Events dropped by the rate limiter.
    pub fn suppressed_events(&self) -> u64 {
        self.limiter.suppressed()
    }
}
