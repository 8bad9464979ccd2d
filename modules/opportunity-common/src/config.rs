use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Contains only secrets and deployment values; pipeline tunables
/// live in the TOML [`PipelineConfig`](crate::PipelineConfig).
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,

    // AI / LLM
    pub openai_api_key: String,
    pub openrouter_api_key: Option<String>,
    /// OpenAI-compatible server hosting miniLM / bge.
    pub embedding_base_url: Option<String>,

    // Reddit
    pub reddit_user_agent: Option<String>,

    // Web server
    pub api_host: String,
    pub api_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY is required")?,
            openrouter_api_key: non_empty_var("OPENROUTER_API_KEY"),
            embedding_base_url: non_empty_var("EMBEDDING_BASE_URL"),
            reddit_user_agent: non_empty_var("REDDIT_USER_AGENT"),
            api_host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("API_PORT must be a number")?,
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
            format!("{}...({} chars)", &val[..n], val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  OPENAI_API_KEY: {}", preview(&self.openai_api_key));
        tracing::info!("  OPENROUTER_API_KEY: {}", preview_opt(&self.openrouter_api_key));
        tracing::info!("  EMBEDDING_BASE_URL: {}", preview_opt(&self.embedding_base_url));
        tracing::info!("  REDDIT_USER_AGENT: {}", preview_opt(&self.reddit_user_agent));
        tracing::info!("  API: {}:{}", self.api_host, self.api_port);
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
