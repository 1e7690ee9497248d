use std::net::SocketAddr;

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GROQ_API_KEY environment variable is required")]
    MissingApiKey,
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_base: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_completion_tokens: u32,
    pub bind_addr: SocketAddr,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine; env vars may come from the process.
        let _ = dotenvy::dotenv();

        let api_key = std::env::var("GROQ_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let api_base = std::env::var("GROQ_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        let model_name =
            std::env::var("MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let temperature = parse_env("MODEL_TEMPERATURE", DEFAULT_TEMPERATURE)?;
        let max_completion_tokens = parse_env("MAX_COMPLETION_TOKENS", DEFAULT_MAX_TOKENS)?;

        let bind_addr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue("BIND_ADDR", e.to_string())
            })?;

        Ok(AppConfig {
            api_key,
            api_base,
            model_name,
            temperature,
            max_completion_tokens,
            bind_addr,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name, e.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_to_default_when_unset() {
        let value: f32 = parse_env("LEAF_TEST_UNSET_VAR", 0.3).unwrap();
        assert_eq!(value, 0.3);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        std::env::set_var("LEAF_TEST_BAD_TEMP", "warm");
        let result: Result<f32, _> = parse_env("LEAF_TEST_BAD_TEMP", 0.3);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue("LEAF_TEST_BAD_TEMP", _))
        ));
        std::env::remove_var("LEAF_TEST_BAD_TEMP");
    }

    #[test]
    fn parse_env_reads_override() {
        std::env::set_var("LEAF_TEST_MAX_TOKENS", "512");
        let value: u32 = parse_env("LEAF_TEST_MAX_TOKENS", 1024).unwrap();
        assert_eq!(value, 512);
        std::env::remove_var("LEAF_TEST_MAX_TOKENS");
    }
}
