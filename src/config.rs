use std::env;
use std::str::FromStr;

use crate::error::AppError;

/// Where persistent state lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StorageBackend::Mongo),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(AppError::Config(format!("unknown STORAGE_BACKEND '{}'", other))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub frontend_origin: String,
    pub storage_backend: StorageBackend,
    pub mongo_uri: Option<String>,
    pub database_name: String,
    /// When unset, bearer tokens are ignored and every caller is anonymous.
    pub jwt_secret: Option<String>,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            frontend_origin: "http://localhost:3000".to_string(),
            storage_backend: StorageBackend::Mongo,
            mongo_uri: None,
            database_name: "planner".to_string(),
            jwt_secret: None,
            llm_base_url: "https://api.groq.com/openai/v1".to_string(),
            llm_api_key: None,
            llm_model: "llama-3.1-8b-instant".to_string(),
            llm_timeout_secs: 60,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.storage_backend,
        };
        let mongo_uri = env::var("MONGO_URI").ok();
        if storage_backend == StorageBackend::Mongo && mongo_uri.is_none() {
            return Err(AppError::Config(
                "MONGO_URI must be set when STORAGE_BACKEND=mongo".to_string(),
            ));
        }
        let llm_timeout_secs = match env::var("LLM_TIMEOUT_SECS") {
            Ok(v) => v
                .parse()
                .map_err(|_| AppError::Config(format!("LLM_TIMEOUT_SECS is not a number: {}", v)))?,
            Err(_) => defaults.llm_timeout_secs,
        };

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            frontend_origin: env::var("FRONTEND_ORIGIN").unwrap_or(defaults.frontend_origin),
            storage_backend,
            mongo_uri,
            database_name: env::var("DATABASE_NAME").unwrap_or(defaults.database_name),
            jwt_secret: env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
            llm_base_url: env::var("LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            llm_api_key: env::var("LLM_API_KEY").ok().filter(|s| !s.is_empty()),
            llm_model: env::var("LLM_MODEL").unwrap_or(defaults.llm_model),
            llm_timeout_secs,
        })
    }
}
