pub mod config;
pub mod enqueue;
pub mod failures;
pub mod stats;
pub mod workers;
