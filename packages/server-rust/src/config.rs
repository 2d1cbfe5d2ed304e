/// Runtime configuration for the action pipeline and schema engine.
///
/// Controls list paging bounds, event fan-out capacity, and webhook delivery.
#[derive(Debug, Clone)]
pub struct StencilConfig {
    /// Page size used by `list` actions when the caller gives no `limit`.
    pub default_list_limit: u32,
    /// Largest `limit` a `list` action accepts.
    pub max_list_limit: u32,
    /// Buffered events per subscriber before slow subscribers start lagging.
    pub event_channel_capacity: usize,
    /// Upper bound on a single webhook delivery in milliseconds.
    pub webhook_timeout_ms: u64,
    /// Whether dispatches are written to the audit sink.
    pub audit_enabled: bool,
}

impl Default for StencilConfig {
    fn default() -> Self {
        Self {
            default_list_limit: 50,
            max_list_limit: 100,
            event_channel_capacity: 1024,
            webhook_timeout_ms: 5_000,
            audit_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = StencilConfig::default();
        assert_eq!(config.default_list_limit, 50);
        assert_eq!(config.max_list_limit, 100);
        assert_eq!(config.event_channel_capacity, 1024);
        assert_eq!(config.webhook_timeout_ms, 5_000);
        assert!(config.audit_enabled);
    }
}
