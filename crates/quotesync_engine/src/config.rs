//! Configuration for the sync engine.

use std::time::Duration;

/// Content fields compared during reconciliation.
///
/// Administrative metadata (`version`, `updatedAt`) is never watched; only
/// the names listed here take part in conflict detection, in this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFields(Vec<String>);

impl WatchedFields {
    /// Creates a watched-field set. Duplicates keep their first position.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !fields.contains(&name) {
                fields.push(name);
            }
        }
        Self(fields)
    }

    /// Returns true if `name` is watched.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|f| f == name)
    }

    /// Iterates over the watched names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of watched fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for WatchedFields {
    /// The content fields of a commercial quotation.
    fn default() -> Self {
        Self::new([
            "empresa",
            "contacto",
            "telefono",
            "direccion",
            "items",
            "subtotal",
            "descuento",
            "iva",
            "total",
            "moneda",
            "vigencia",
            "condiciones",
            "notas",
        ])
    }
}

/// Configuration for the connection monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between reachability probes.
    pub interval: Duration,
    /// Upper bound for a single probe.
    pub probe_timeout: Duration,
}

impl MonitorConfig {
    /// Creates a monitor configuration with the given interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server URL.
    pub server_url: String,
    /// Path of the reachability probe endpoint.
    pub probe_path: String,
    /// Request timeout for record fetches and writes.
    pub timeout: Duration,
    /// Fields compared during reconciliation.
    pub watched_fields: WatchedFields,
    /// Connection monitor settings.
    pub monitor: MonitorConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            probe_path: "/health".into(),
            timeout: Duration::from_secs(30),
            watched_fields: WatchedFields::default(),
            monitor: MonitorConfig::default(),
        }
    }

    /// Sets the probe endpoint path.
    pub fn with_probe_path(mut self, path: impl Into<String>) -> Self {
        self.probe_path = path.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the watched fields.
    pub fn with_watched_fields(mut self, fields: WatchedFields) -> Self {
        self.watched_fields = fields;
        self
    }

    /// Sets the probe interval.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.monitor.interval = interval;
        self
    }

    /// Sets the monitor configuration.
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Full URL of the probe endpoint.
    pub fn probe_url(&self) -> String {
        join_url(&self.server_url, &self.probe_path)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8080")
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("https://quotes.example.com/")
            .with_probe_path("ping")
            .with_timeout(Duration::from_secs(10))
            .with_probe_interval(Duration::from_secs(5))
            .with_watched_fields(WatchedFields::new(["empresa"]));

        assert_eq!(config.probe_url(), "https://quotes.example.com/ping");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.monitor.interval, Duration::from_secs(5));
        assert_eq!(config.watched_fields.len(), 1);
    }

    #[test]
    fn default_interval_is_thirty_seconds() {
        let config = SyncConfig::default();
        assert_eq!(config.monitor.interval, Duration::from_secs(30));
        assert_eq!(config.probe_url(), "http://127.0.0.1:8080/health");
    }

    #[test]
    fn watched_fields_dedup_and_keep_order() {
        let fields = WatchedFields::new(["total", "empresa", "total"]);
        assert_eq!(fields.iter().collect::<Vec<_>>(), vec!["total", "empresa"]);
        assert!(fields.contains("empresa"));
        assert!(!fields.contains("updatedAt"));
    }

    #[test]
    fn default_watched_fields_exclude_metadata() {
        let fields = WatchedFields::default();
        assert!(fields.contains("empresa"));
        assert!(!fields.contains("updatedAt"));
        assert!(!fields.contains("version"));
    }
}
