//! Worker configuration
//!
//! Set once at startup and read-only afterwards. Options come from a
//! string map ([`WorkerConfig::from_options`]), the environment
//! ([`WorkerConfig::from_env`]) or the `with_*` builders.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Configuration errors, all fatal at startup
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one queue required")]
    EmptyQueues,

    #[error("weight must be numeric")]
    NonNumericWeight,

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid value for {option}: {value}")]
    InvalidValue { option: String, value: String },

    #[error("{0} must be at least 1")]
    TooSmall(&'static str),
}

/// Weighted queue rotation
///
/// A queue declared with weight `w` appears `w` times in the rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Queues {
    rotation: Vec<String>,
    strict: bool,
}

impl Queues {
    /// Parse `name` / `name=weight` entries separated by commas
    ///
    /// Empty entries and entries with an empty name are skipped. Ordering is
    /// strict (declaration order is a priority ladder) when no entry
    /// carries an explicit weight.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut rotation = Vec::new();
        for entry in raw.split(',') {
            let (name, weight) = match entry.split_once('=') {
                Some((name, weight)) => (name, Some(weight)),
                None => (entry, None),
            };
            if name.is_empty() {
                continue;
            }
            let weight = match weight {
                None => 1,
                Some(w) => w
                    .parse::<i64>()
                    .map_err(|_| ConfigError::NonNumericWeight)?,
            };
            for _ in 0..weight.max(0) {
                rotation.push(name.to_string());
            }
        }

        if rotation.is_empty() {
            return Err(ConfigError::EmptyQueues);
        }
        Ok(Self {
            rotation,
            strict: !raw.contains('='),
        })
    }

    /// Unweighted queues polled in declaration order
    pub fn strict<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rotation: names.into_iter().map(Into::into).collect(),
            strict: true,
        }
    }

    /// The expanded rotation, one entry per poll attempt
    pub fn rotation(&self) -> &[String] {
        &self.rotation
    }

    /// Distinct queue names in declaration order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for queue in &self.rotation {
            if !names.contains(queue) {
                names.push(queue.clone());
            }
        }
        names
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn len(&self) -> usize {
        self.rotation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotation.is_empty()
    }
}

impl fmt::Display for Queues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.rotation.join(" "))
    }
}

/// Parse an interval given in (possibly fractional) seconds
pub fn parse_interval(raw: &str) -> Result<Duration, ConfigError> {
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidInterval(raw.to_string()))?;
    Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::InvalidInterval(raw.to_string()))
}

/// Accepts the spellings `1 t T TRUE true True 0 f F FALSE false False`
fn parse_bool(option: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            option: option.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn parse_count(option: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            option: option.to_string(),
            value: raw.to_string(),
        })
}

/// Process-wide worker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Queues to poll; there is no default queue
    pub queues: Queues,

    /// Back-off after a sweep that found every queue empty
    pub interval: Duration,

    /// Number of concurrent workers
    pub concurrency: usize,

    /// Connection pool ceiling shared by the poller and all workers
    pub connections: usize,

    /// Store address
    pub uri: String,

    /// Prefix for every key
    pub namespace: String,

    /// Stop once a full sweep finds every queue empty
    pub exit_on_complete: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: Queues::default(),
            interval: Duration::from_secs(5),
            concurrency: 10,
            connections: 2,
            uri: "redis://localhost:6379/".to_string(),
            namespace: "resque:".to_string(),
            exit_on_complete: false,
        }
    }
}

impl WorkerConfig {
    /// Build from a string map of options over the defaults
    ///
    /// Recognized keys: `queues`, `interval`, `concurrency`, `connections`,
    /// `uri`, `namespace`, `exit-on-complete` (or `exitOnComplete`).
    /// Unknown keys are ignored, and an empty `queues` value leaves the queue
    /// list unset.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_options(options)?;
        Ok(config)
    }

    /// Overlay options onto this configuration
    pub fn apply_options(&mut self, options: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(value) = options.get("queues") {
            if !value.is_empty() {
                self.queues = Queues::parse(value)?;
            }
        }
        if let Some(value) = options.get("interval") {
            self.interval = parse_interval(value)?;
        }
        if let Some(value) = options.get("concurrency") {
            self.concurrency = parse_count("concurrency", value)?;
        }
        if let Some(value) = options.get("connections") {
            self.connections = parse_count("connections", value)?;
        }
        if let Some(value) = options.get("uri") {
            self.uri = value.clone();
        }
        if let Some(value) = options.get("namespace") {
            self.namespace = value.clone();
        }
        if let Some(value) = options
            .get("exit-on-complete")
            .or_else(|| options.get("exitOnComplete"))
        {
            self.exit_on_complete = parse_bool("exit-on-complete", value)?;
        }
        Ok(())
    }

    /// Build from `REWORK_*` environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        const VARS: [(&str, &str); 7] = [
            ("REWORK_QUEUES", "queues"),
            ("REWORK_INTERVAL", "interval"),
            ("REWORK_CONCURRENCY", "concurrency"),
            ("REWORK_CONNECTIONS", "connections"),
            ("REWORK_URI", "uri"),
            ("REWORK_NAMESPACE", "namespace"),
            ("REWORK_EXIT_ON_COMPLETE", "exit-on-complete"),
        ];

        let options: HashMap<String, String> = VARS
            .iter()
            .filter_map(|(var, option)| {
                std::env::var(var)
                    .ok()
                    .map(|value| (option.to_string(), value))
            })
            .collect();
        Self::from_options(&options)
    }

    pub fn with_queues(mut self, queues: Queues) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_exit_on_complete(mut self, exit_on_complete: bool) -> Self {
        self.exit_on_complete = exit_on_complete;
        self
    }

    /// Check the settings a run depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::EmptyQueues);
        }
        if self.concurrency < 1 {
            return Err(ConfigError::TooSmall("concurrency"));
        }
        if self.connections < 1 {
            return Err(ConfigError::TooSmall("connections"));
        }
        Ok(())
    }
}

impl fmt::Display for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queues: {} | interval: {} | concurrency: {} | connections: {} | uri: {} | namespace: {} | exitOnComplete: {}",
            self.queues,
            self.interval.as_secs_f64(),
            self.concurrency,
            self.connections,
            self.uri,
            self.namespace,
            self.exit_on_complete
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_queues() {
        let cases: Vec<(&str, Result<Vec<&str>, ConfigError>)> = vec![
            ("", Err(ConfigError::EmptyQueues)),
            ("high", Ok(vec!["high"])),
            ("high,low", Ok(vec!["high", "low"])),
            ("high=2,low=1", Ok(vec!["high", "high", "low"])),
            ("high=2,low", Ok(vec!["high", "high", "low"])),
            ("low=1,high=2", Ok(vec!["low", "high", "high"])),
            ("low=,high=2", Err(ConfigError::NonNumericWeight)),
            ("low=a,high=2", Err(ConfigError::NonNumericWeight)),
            ("low=", Err(ConfigError::NonNumericWeight)),
            ("low=a", Err(ConfigError::NonNumericWeight)),
            ("high=2,,,=1", Ok(vec!["high", "high"])),
            (",,,", Err(ConfigError::EmptyQueues)),
            ("=1", Err(ConfigError::EmptyQueues)),
            ("low=0", Err(ConfigError::EmptyQueues)),
        ];

        for (raw, expected) in &cases {
            let actual = Queues::parse(raw);
            match expected {
                Ok(rotation) => {
                    let queues = actual.unwrap_or_else(|e| panic!("{raw:?}: {e}"));
                    assert_eq!(queues.rotation(), rotation.as_slice(), "{raw:?}");
                }
                Err(err) => assert_eq!(actual.as_ref(), Err(err), "{raw:?}"),
            }
        }
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(ConfigError::EmptyQueues.to_string(), "at least one queue required");
        assert_eq!(ConfigError::NonNumericWeight.to_string(), "weight must be numeric");
    }

    #[test]
    fn test_strict_ordering() {
        assert!(Queues::parse("high,low").unwrap().is_strict());
        assert!(!Queues::parse("high=1,low").unwrap().is_strict());
        assert!(!Queues::parse("high=2,,,=1").unwrap().is_strict());
    }

    #[test]
    fn test_queue_names_are_distinct() {
        let queues = Queues::parse("high=3,low=2").unwrap();
        assert_eq!(queues.len(), 5);
        assert_eq!(queues.names(), vec!["high", "low"]);
    }

    #[test]
    fn test_queues_display() {
        assert_eq!(Queues::parse("high").unwrap().to_string(), "[high]");
        assert_eq!(Queues::parse("high,low").unwrap().to_string(), "[high low]");
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_interval("1").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_interval("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_interval("soon").is_err());
        assert!(parse_interval("-1").is_err());
        assert!(parse_interval("inf").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(config.queues.is_empty());
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.connections, 2);
        assert_eq!(config.uri, "redis://localhost:6379/");
        assert_eq!(config.namespace, "resque:");
        assert!(!config.exit_on_complete);
        assert_eq!(config.validate(), Err(ConfigError::EmptyQueues));
    }

    #[test]
    fn test_from_options() {
        let config = WorkerConfig::from_options(&options(&[
            ("queues", "high=2,low=1"),
            ("interval", "0.25"),
            ("concurrency", "4"),
            ("connections", "3"),
            ("uri", "redis://cache:6380/1"),
            ("namespace", "jobs:"),
            ("exitOnComplete", "true"),
            ("unrelated", "ignored"),
        ]))
        .unwrap();

        assert_eq!(config.queues.rotation(), ["high", "high", "low"]);
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.connections, 3);
        assert_eq!(config.uri, "redis://cache:6380/1");
        assert_eq!(config.namespace, "jobs:");
        assert!(config.exit_on_complete);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_options_rejects_bad_values() {
        assert_eq!(
            WorkerConfig::from_options(&options(&[("queues", "low=a")])),
            Err(ConfigError::NonNumericWeight)
        );
        assert!(matches!(
            WorkerConfig::from_options(&options(&[("concurrency", "many")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            WorkerConfig::from_options(&options(&[("exit-on-complete", "yes")])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_counts() {
        let config = WorkerConfig::default().with_queues(Queues::strict(["default"]));
        assert!(config.validate().is_ok());
        assert_eq!(
            config.clone().with_concurrency(0).validate(),
            Err(ConfigError::TooSmall("concurrency"))
        );
        assert_eq!(
            config.with_connections(0).validate(),
            Err(ConfigError::TooSmall("connections"))
        );
    }

    #[test]
    fn test_display_matches_print_config() {
        let config = WorkerConfig::default()
            .with_queues(Queues::parse("high=2,low").unwrap())
            .with_interval(Duration::from_millis(1500));
        assert_eq!(
            config.to_string(),
            "queues: [high high low] | interval: 1.5 | concurrency: 10 | connections: 2 | uri: redis://localhost:6379/ | namespace: resque: | exitOnComplete: false"
        );
        assert!(WorkerConfig::default().to_string().contains("interval: 5 |"));
    }
}
