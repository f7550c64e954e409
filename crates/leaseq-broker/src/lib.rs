pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod metrics;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use dispatcher::Dispatcher;
pub use metrics::BrokerMetrics;
