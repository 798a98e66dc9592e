pub mod config;
pub mod consumer;
pub mod metrics;
pub mod producer;
pub mod shm;

pub use config::{DemoConfig, TrafficConfig};
pub use consumer::{Consumer, ConsumerStats, Step, run_consumer, run_consumer_hooked};
pub use metrics::PipeMetrics;
pub use producer::{ProducerStats, run_producer};
