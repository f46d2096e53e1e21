pub mod assignment;
pub mod audit;
pub mod auth;
pub mod checklist;
pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod idempotency;
pub mod metrics;
pub mod models;
pub mod nats;
pub mod nats_consumer;
pub mod notifications;
pub mod profile;
pub mod services;

pub use config::Config;
pub use errors::{OnboardingError, Result};
