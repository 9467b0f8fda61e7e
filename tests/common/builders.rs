//! Test data builders for creating test objects

use packet_bridge::config::PipelineConfig;
use packet_bridge::Batch;

/// Builder for pipeline timing suited to tests (milliseconds, not seconds)
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig {
                poll_interval_ms: 5,
                publish_delay_ms: 2,
                queue_capacity: 100,
                push_timeout_ms: 20,
                pop_timeout_ms: 2,
                connect_timeout_ms: 1_000,
                flush_timeout_ms: 200,
                poller_join_timeout_ms: Some(2_000),
            },
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn publish_delay_ms(mut self, ms: u64) -> Self {
        self.config.publish_delay_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A batch from packet texts; panics on an empty list
pub fn batch(texts: &[&str]) -> Batch {
    Batch::from_texts(texts.iter().copied()).expect("test batch must not be empty")
}

/// A single-packet batch carrying a sequence number
pub fn numbered(seq: usize) -> Batch {
    Batch::from_texts([seq.to_string()]).expect("non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_builder() {
        let config = PipelineConfigBuilder::new()
            .capacity(3)
            .poll_interval_ms(7)
            .build();

        assert_eq!(config.queue_capacity, 3);
        assert_eq!(config.poll_interval_ms, 7);
        assert_eq!(config.publish_delay_ms, 2);
    }
}
