pub mod config;
pub mod error;
pub mod gateway;
pub mod shards;
pub mod transport;
