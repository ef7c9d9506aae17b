//! Brokerbench Core Library
//!
//! Pluggable benchmark drivers for message brokers. A driver provisions
//! destinations, hands out producers and push-based consumers, and tears
//! everything down, over a narrow broker client surface.

pub mod client;
pub mod config;
pub mod consumer;
pub mod driver;
pub mod error;
pub mod producer;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use client::memory::MemoryBroker;
pub use client::{BrokerConnection, BrokerConnector};
pub use config::{ConfigLoader, DriverConfig, Properties};
pub use consumer::{BenchmarkConsumer, ConsumerCallback};
pub use driver::{initialize, initialize_from_file, BenchmarkDriver};
pub use error::{ClientError, ConfigError, DriverError, DriverResult};
pub use producer::BenchmarkProducer;
pub use types::{AckMode, DriverKind, QueueType};
