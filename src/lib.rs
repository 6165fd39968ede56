pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod monitor;
pub mod notifier;
pub mod preferences;
pub mod pricing;
pub mod scheduler;
pub mod searches;
pub mod telemetry;
pub mod traits;

#[cfg(test)]
mod testing;
