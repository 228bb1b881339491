pub mod batch;
pub mod clickhouse;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod materializer;
pub mod nats;
pub mod stats;

pub use batch::*;
pub use clickhouse::*;
pub use config::*;
pub use consumer::*;
pub use domain::*;
pub use materializer::*;
pub use nats::*;
pub use stats::*;
