//! Application use cases. Orchestrate domain logic via ports. Dependency
//! order (leaves first): rate_limiter -> resolver -> history
//! (port, implemented in adapters) -> text_processor -> collector ->
//! pipeline -> monitor.

pub mod auth_service;
pub mod collector;
pub mod monitor;
pub mod pipeline;
pub mod rate_limiter;
pub mod resolver;
pub mod text_processor;

pub use auth_service::AuthService;
pub use collector::{CollectedGroup, CollectorParams, HistoricalCollector};
pub use monitor::{Monitor, MonitorIdentity};
pub use pipeline::{Pipeline, PipelineStats};
pub use rate_limiter::FloodWaitHandler;
pub use resolver::ChannelResolver;
