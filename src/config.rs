use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub sandbox_url: Option<String>,
    pub sandbox_auth_token: Option<String>,
    pub sandbox_timeout_secs: u64,
    pub sandbox_max_concurrency: usize,
    pub sandbox_local_fallback: bool,
    pub case_timeout_secs: u64,
    pub proctoring_flag_threshold: i32,
    pub proctoring_terminate_threshold: i32,
    pub sweep_interval_secs: u64,
    pub notification_webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub eligibility_url: Option<String>,
    pub public_rps: u32,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    /// Configuration with every optional setting at its default.
    pub fn new(server_address: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            jwt_secret: jwt_secret.into(),
            database_url: None,
            sandbox_url: None,
            sandbox_auth_token: None,
            sandbox_timeout_secs: 10,
            sandbox_max_concurrency: 8,
            sandbox_local_fallback: true,
            case_timeout_secs: 15,
            proctoring_flag_threshold: 3,
            proctoring_terminate_threshold: 5,
            sweep_interval_secs: 30,
            notification_webhook_url: None,
            webhook_secret: None,
            eligibility_url: None,
            public_rps: 100,
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let mut config = Self::new(get_env("SERVER_ADDRESS")?, get_env("JWT_SECRET")?);
        config.database_url = env::var("DATABASE_URL").ok();
        config.sandbox_url = env::var("SANDBOX_URL").ok();
        config.sandbox_auth_token = env::var("SANDBOX_AUTH_TOKEN").ok();
        config.notification_webhook_url = env::var("NOTIFICATION_WEBHOOK_URL").ok();
        config.webhook_secret = env::var("WEBHOOK_SECRET").ok();
        config.eligibility_url = env::var("ELIGIBILITY_URL").ok();

        if let Some(v) = get_env_parse_opt("SANDBOX_TIMEOUT_SECS")? {
            config.sandbox_timeout_secs = v;
        }
        if let Some(v) = get_env_parse_opt("SANDBOX_MAX_CONCURRENCY")? {
            config.sandbox_max_concurrency = v;
        }
        if let Some(v) = get_env_parse_opt("SANDBOX_LOCAL_FALLBACK")? {
            config.sandbox_local_fallback = v;
        }
        if let Some(v) = get_env_parse_opt("CASE_TIMEOUT_SECS")? {
            config.case_timeout_secs = v;
        }
        if let Some(v) = get_env_parse_opt("PROCTORING_FLAG_THRESHOLD")? {
            config.proctoring_flag_threshold = v;
        }
        if let Some(v) = get_env_parse_opt("PROCTORING_TERMINATE_THRESHOLD")? {
            config.proctoring_terminate_threshold = v;
        }
        if let Some(v) = get_env_parse_opt("SWEEP_INTERVAL_SECS")? {
            config.sweep_interval_secs = v;
        }
        if let Some(v) = get_env_parse_opt("PUBLIC_RPS")? {
            config.public_rps = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.proctoring_flag_threshold < 1 {
            return Err(Error::Config(
                "PROCTORING_FLAG_THRESHOLD must be at least 1".to_string(),
            ));
        }
        if self.proctoring_terminate_threshold <= self.proctoring_flag_threshold {
            return Err(Error::Config(
                "PROCTORING_TERMINATE_THRESHOLD must be greater than PROCTORING_FLAG_THRESHOLD"
                    .to_string(),
            ));
        }
        if self.sandbox_max_concurrency == 0 {
            return Err(Error::Config(
                "SANDBOX_MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_opt<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::new("127.0.0.1:0", "secret");
        assert!(config.validate().is_ok());
        assert!(config.sandbox_local_fallback);
    }

    #[test]
    fn terminate_threshold_must_exceed_flag_threshold() {
        let mut config = Config::new("127.0.0.1:0", "secret");
        config.proctoring_terminate_threshold = config.proctoring_flag_threshold;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
