use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub database_url: String,
    pub event_bus_capacity: usize,
    /// Upper bound applied to any wait interval a retry adviser asks for.
    pub max_retry_wait_secs: u64,
    /// How long a response nothing waits on is kept before it is dropped.
    pub held_response_ttl_secs: u64,
    pub auto_migrate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            event_bus_capacity: 1000,
            max_retry_wait_secs: 60,
            held_response_ttl_secs: 3600,
            auto_migrate: true,
        }
    }
}

impl EngineConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity;
        self
    }

    pub fn with_max_retry_wait(mut self, secs: u64) -> Self {
        self.max_retry_wait_secs = secs;
        self
    }

    pub fn with_held_response_ttl(mut self, secs: u64) -> Self {
        self.held_response_ttl_secs = secs;
        self
    }

    pub fn held_response_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.held_response_ttl_secs)
    }

    pub fn with_auto_migrate(mut self, auto_migrate: bool) -> Self {
        self.auto_migrate = auto_migrate;
        self
    }

    pub fn retry_wait(&self, requested_secs: u64) -> std::time::Duration {
        std::time::Duration::from_secs(requested_secs.min(self.max_retry_wait_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert!(config.auto_migrate);
        assert_eq!(config.held_response_ttl().as_secs(), 3600);
    }

    #[test]
    fn test_builder_and_retry_cap() {
        let config = EngineConfig::new("sqlite://engine.db")
            .with_max_retry_wait(5)
            .with_event_bus_capacity(16)
            .with_auto_migrate(false);
        assert_eq!(config.event_bus_capacity, 16);
        assert!(!config.auto_migrate);
        assert_eq!(config.retry_wait(30).as_secs(), 5);
        assert_eq!(config.retry_wait(2).as_secs(), 2);
    }

    #[test]
    fn test_partial_deserialization() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "database_url": "sqlite://x.db" }"#).unwrap();
        assert_eq!(config.database_url, "sqlite://x.db");
        assert_eq!(config.max_retry_wait_secs, 60);
    }
}
