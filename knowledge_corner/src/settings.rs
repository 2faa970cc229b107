use anyhow::Context;
use serde::Deserialize;

use crate::documents_repository::PostgresDocumentsRepositoryConfig;

fn default_port() -> u16 {
    5000
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_pass() -> String {
    "postgres".to_string()
}

fn default_db_name() -> String {
    "knowledge_library".to_string()
}

fn default_cors_allowed_origin() -> String {
    "http://localhost:5173".to_string()
}

/// Service configuration read from the environment
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_host")]
    pub db_host: String,
    #[serde(default = "default_db_user")]
    pub db_user: String,
    #[serde(default = "default_db_pass")]
    pub db_pass: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    pub access_token_secret: String,
    #[serde(default)]
    pub use_in_memory_db: bool,
    #[serde(default = "default_cors_allowed_origin")]
    pub cors_allowed_origin: String,
}

impl Settings {
    /// Loads `.env` if there is one, then reads the process environment
    pub fn load() -> anyhow::Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", err);
        }
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> anyhow::Result<Self> {
        config::Config::builder()
            .add_source(environment)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn postgres_config(&self) -> PostgresDocumentsRepositoryConfig {
        PostgresDocumentsRepositoryConfig {
            hostname: self.db_host.clone(),
            username: self.db_user.clone(),
            password: self.db_pass.clone(),
            database: self.db_name.clone(),
        }
    }
}

#[cfg(test)]
mod settings_tests {
    use super::*;

    fn environment(variables: &[(&str, &str)]) -> config::Environment {
        config::Environment::default().source(Some(
            variables
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        ))
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let settings =
            Settings::from_environment(environment(&[("ACCESS_TOKEN_SECRET", "s3cr3t")])).unwrap();

        assert_eq!(settings.port, 5000);
        assert_eq!(settings.db_host, "127.0.0.1");
        assert_eq!(settings.db_name, "knowledge_library");
        assert_eq!(settings.access_token_secret, "s3cr3t");
        assert!(!settings.use_in_memory_db);
        assert_eq!(settings.cors_allowed_origin, "http://localhost:5173");
    }

    #[test]
    fn environment_overrides_defaults() {
        let settings = Settings::from_environment(environment(&[
            ("ACCESS_TOKEN_SECRET", "s3cr3t"),
            ("PORT", "8080"),
            ("DB_HOST", "db.internal"),
            ("DB_USER", "librarian"),
            ("DB_PASS", "hunter2"),
            ("USE_IN_MEMORY_DB", "true"),
        ]))
        .unwrap();

        assert_eq!(settings.port, 8080);
        assert!(settings.use_in_memory_db);
        let postgres_config = settings.postgres_config();
        assert_eq!(postgres_config.hostname, "db.internal");
        assert_eq!(postgres_config.username, "librarian");
        assert_eq!(postgres_config.password, "hunter2");
    }

    #[test]
    fn missing_secret_is_an_error() {
        assert!(Settings::from_environment(environment(&[("PORT", "8080")])).is_err());
    }
}
