use std::env::VarError;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    /// Only the spider page source needs it.
    pub spider_api_key: Option<String>,
    pub user_agent: String,
    pub batch_size: usize,
    pub max_pages: u32,
    pub max_comment_expansions: u32,
    /// `None` when `BAT_HOME_COUNTRY` is set to an empty string.
    pub home_country: Option<String>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
}

impl Config {
    pub fn require_spider_key(&self) -> Result<&str, ConfigError> {
        self.spider_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("SPIDER_API_KEY".to_string()))
    }
}

/// Load `.env` if present, then read settings from the environment.
pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    build_config(|key| std::env::var(key))
}

fn build_config<F>(lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .trim()
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_year = |var: &str| -> Result<Option<i32>, ConfigError> {
        match lookup(var) {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<i32>()
                .map(Some)
                .map_err(|e| invalid(var, e.to_string())),
            _ => Ok(None),
        }
    };

    let db_path = PathBuf::from(or_default("BAT_DB_PATH", "data/bat.sqlite"));
    let spider_api_key = lookup("SPIDER_API_KEY").ok().filter(|k| !k.trim().is_empty());
    let user_agent = or_default(
        "BAT_USER_AGENT",
        concat!("bat_index/", env!("CARGO_PKG_VERSION")),
    );

    let batch_size = or_default("BAT_BATCH_SIZE", "10")
        .trim()
        .parse::<usize>()
        .map_err(|e| invalid("BAT_BATCH_SIZE", e.to_string()))?;
    if batch_size == 0 {
        return Err(invalid("BAT_BATCH_SIZE", "must be greater than zero".to_string()));
    }

    let max_pages = parse_u32("BAT_MAX_PAGES", "30")?;
    let max_comment_expansions = parse_u32("BAT_MAX_COMMENT_EXPANSIONS", "3")?;

    let home_country = Some(or_default("BAT_HOME_COUNTRY", "United States"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let min_year = parse_year("BAT_MIN_YEAR")?;
    let max_year = parse_year("BAT_MAX_YEAR")?;
    if let (Some(min), Some(max)) = (min_year, max_year) {
        if min > max {
            return Err(invalid("BAT_MIN_YEAR", format!("{min} is after BAT_MAX_YEAR {max}")));
        }
    }

    Ok(Config {
        db_path,
        spider_api_key,
        user_agent,
        batch_size,
        max_pages,
        max_comment_expansions,
        home_country,
        min_year,
        max_year,
    })
}
