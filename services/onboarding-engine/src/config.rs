use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub nats: NatsConfig,
    pub auth: AuthConfig,
    pub webhooks: WebhookConfig,
    pub assignment: AssignmentConfig,
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub subject_prefix: String,
    pub stream_name: String,
    pub durable_name: String,
    pub max_deliver: i64,
    pub ack_wait_secs: u64,
    pub retry_delay_secs: u64,
}

/// One HS256 identity provider per portal
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub partner_issuer: String,
    pub partner_jwt_secret: String,
    pub admin_issuer: String,
    pub admin_jwt_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub request_timeout_secs: u64,
    pub lease_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AssignmentConfig {
    pub auto_assign: bool,
    pub interval_secs: u64,
    pub lock_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IdempotencySettings {
    pub lock_ttl_secs: u64,
    pub processed_ttl_secs: u64,
}

impl IdempotencySettings {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn processed_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_ttl_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", 4)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.run_migrations", true)?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("nats.url", "nats://localhost:4222")?
            .set_default("nats.subject_prefix", "kyc")?
            .set_default("nats.stream_name", "KYC_SCREENING")?
            .set_default("nats.durable_name", "onboarding-engine")?
            .set_default("nats.max_deliver", 10)?
            .set_default("nats.ack_wait_secs", 30)?
            .set_default("nats.retry_delay_secs", 5)?
            .set_default("auth.partner_issuer", "partner-portal")?
            .set_default("auth.partner_jwt_secret", "")?
            .set_default("auth.admin_issuer", "admin-portal")?
            .set_default("auth.admin_jwt_secret", "")?
            .set_default("webhooks.enabled", true)?
            .set_default("webhooks.poll_interval_ms", 1000)?
            .set_default("webhooks.batch_size", 50)?
            .set_default("webhooks.request_timeout_secs", webhooks::DEFAULT_REQUEST_TIMEOUT_SECONDS)?
            .set_default("webhooks.lease_secs", 60)?
            .set_default("assignment.auto_assign", true)?
            .set_default("assignment.interval_secs", 30)?
            .set_default("assignment.lock_ttl_secs", 60)?
            .set_default("idempotency.lock_ttl_secs", 300)?
            .set_default("idempotency.processed_ttl_secs", 7 * 24 * 3600)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("ONBOARDING_ENGINE")
                .separator("__")
                .list_separator(","),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(redis_url) = env::var("REDIS_URL") {
            builder = builder.set_override("redis.url", redis_url)?;
        }

        if let Ok(nats_url) = env::var("NATS_URL") {
            builder = builder.set_override("nats.url", nats_url)?;
        }

        if let Ok(port) = env::var("SERVICE_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        if let Ok(secret) = env::var("PARTNER_JWT_SECRET") {
            builder = builder.set_override("auth.partner_jwt_secret", secret)?;
        }

        if let Ok(secret) = env::var("ADMIN_JWT_SECRET") {
            builder = builder.set_override("auth.admin_jwt_secret", secret)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.redis.url.is_empty() {
            return Err("Redis URL is required".to_string());
        }

        if self.nats.url.is_empty() {
            return Err("NATS URL is required".to_string());
        }

        if self.nats.max_deliver < 2 {
            return Err("NATS max_deliver must allow at least one redelivery".to_string());
        }

        if self.auth.partner_jwt_secret.len() < 32 || self.auth.admin_jwt_secret.len() < 32 {
            return Err("JWT secrets must be at least 32 bytes".to_string());
        }

        if self.auth.partner_issuer == self.auth.admin_issuer {
            return Err("Partner and admin issuers must differ".to_string());
        }

        if self.webhooks.batch_size <= 0 {
            return Err("Webhook batch size must be positive".to_string());
        }

        if self.webhooks.lease_secs <= self.webhooks.request_timeout_secs {
            return Err("Webhook lease must outlast the request timeout".to_string());
        }

        if self.idempotency.lock_ttl_secs == 0
            || self.idempotency.processed_ttl_secs <= self.idempotency.lock_ttl_secs
        {
            return Err("Processed marker TTL must exceed the lock TTL".to_string());
        }

        Ok(())
    }
}
