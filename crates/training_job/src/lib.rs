pub mod clickhouse;
pub mod config;
pub mod generator;

pub use clickhouse::*;
pub use config::*;
pub use generator::*;
