use std::{env, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

const REQUIRED_CREDENTIALS: [&str; 4] = [
    "PRODUCT_DATA_API_KEY",
    "GEMINI_API_KEY",
    "RAKUTEN_SERVICE_SECRET",
    "RAKUTEN_LICENSE_KEY",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    #[default]
    Gemini,
    Claude,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "claude" | "anthropic" => Ok(Self::Claude),
            _ => Err(ConfigError::Invalid {
                key: "LLM_PROVIDER",
                value: input.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct RakutenConfig {
    pub base_url: String,
    pub service_secret: String,
    pub license_key: String,
    pub shop_url: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything the service needs, resolved once at startup and handed down
/// explicitly to each component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub gemini: GeminiConfig,
    pub claude: Option<ClaudeConfig>,
    pub provider: LlmProvider,
    pub rakuten: RakutenConfig,
    pub template_path: PathBuf,
    pub output_dir: PathBuf,
    pub database_path: PathBuf,
    pub pacing_delay: Duration,
    pub http: HttpConfig,
    pub port: u16,
    pub queue_capacity: usize,
    /// Finished batch jobs kept queryable before the oldest are dropped.
    pub job_retention: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so tests do not
    /// have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let missing: Vec<&'static str> = REQUIRED_CREDENTIALS
            .iter()
            .copied()
            .filter(|key| get(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        let required = |key: &str| get(key).unwrap_or_default();

        let provider = match get("LLM_PROVIDER") {
            Some(raw) => raw.parse::<LlmProvider>()?,
            None => LlmProvider::default(),
        };

        let claude = get("CLAUDE_API_KEY").map(|api_key| ClaudeConfig {
            base_url: trim_base(get("CLAUDE_API_URL"), "https://api.anthropic.com"),
            api_key,
            model: get("CLAUDE_MODEL").unwrap_or_else(|| "claude-3-5-sonnet-latest".into()),
        });
        if provider == LlmProvider::Claude && claude.is_none() {
            return Err(ConfigError::Missing(vec!["CLAUDE_API_KEY"]));
        }

        Ok(Self {
            source: SourceConfig {
                base_url: trim_base(get("PRODUCT_DATA_API_URL"), "https://api.productdata.com/v1"),
                api_key: required("PRODUCT_DATA_API_KEY"),
            },
            gemini: GeminiConfig {
                base_url: trim_base(
                    get("GEMINI_API_URL"),
                    "https://generativelanguage.googleapis.com",
                ),
                api_key: required("GEMINI_API_KEY"),
                model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-pro".into()),
            },
            claude,
            provider,
            rakuten: RakutenConfig {
                base_url: trim_base(
                    get("RAKUTEN_API_URL"),
                    "https://api.rms.rakuten.co.jp/es/1.0",
                ),
                service_secret: required("RAKUTEN_SERVICE_SECRET"),
                license_key: required("RAKUTEN_LICENSE_KEY"),
                shop_url: trim_base(get("RAKUTEN_SHOP_URL"), "https://item.rakuten.co.jp/yourshop"),
            },
            template_path: get("TEMPLATE_PATH")
                .unwrap_or_else(|| "templates/rakuten_gold_template.html".into())
                .into(),
            output_dir: get("OUTPUT_DIR")
                .unwrap_or_else(|| "output/rakuten_pages".into())
                .into(),
            database_path: get("DATABASE_PATH")
                .unwrap_or_else(|| "rakuten_automation.db".into())
                .into(),
            pacing_delay: Duration::from_millis(parse_or("PACING_DELAY_MS", get("PACING_DELAY_MS"), 1000)?),
            http: HttpConfig {
                timeout: Duration::from_secs(parse_or(
                    "HTTP_TIMEOUT_SECS",
                    get("HTTP_TIMEOUT_SECS"),
                    15,
                )?),
                connect_timeout: Duration::from_secs(parse_or(
                    "HTTP_CONNECT_TIMEOUT_SECS",
                    get("HTTP_CONNECT_TIMEOUT_SECS"),
                    5,
                )?),
            },
            port: parse_or("PORT", get("PORT"), 8000)?,
            queue_capacity: parse_or::<usize>("QUEUE_CAPACITY", get("QUEUE_CAPACITY"), 64)?.max(1),
            job_retention: parse_or::<usize>("JOB_RETENTION", get("JOB_RETENTION"), 256)?.max(1),
        })
    }
}

fn trim_base(value: Option<String>, default: &str) -> String {
    value
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const CREDENTIALS: [(&str, &str); 4] = [
        ("PRODUCT_DATA_API_KEY", "pd-key"),
        ("GEMINI_API_KEY", "gm-key"),
        ("RAKUTEN_SERVICE_SECRET", "secret"),
        ("RAKUTEN_LICENSE_KEY", "license"),
    ];

    #[test]
    fn reports_every_missing_credential() {
        let err = AppConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "x")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec![
                "PRODUCT_DATA_API_KEY",
                "RAKUTEN_SERVICE_SECRET",
                "RAKUTEN_LICENSE_KEY",
            ])
        );
    }

    #[test]
    fn blank_credentials_count_as_missing() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs[3] = ("RAKUTEN_LICENSE_KEY", "   ");
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(err, ConfigError::Missing(vec!["RAKUTEN_LICENSE_KEY"]));
    }

    #[test]
    fn defaults_apply_when_only_credentials_are_set() {
        let config = AppConfig::from_lookup(lookup(&CREDENTIALS)).expect("config");
        assert_eq!(config.source.base_url, "https://api.productdata.com/v1");
        assert_eq!(config.rakuten.base_url, "https://api.rms.rakuten.co.jp/es/1.0");
        assert_eq!(config.gemini.model, "gemini-pro");
        assert_eq!(config.provider, LlmProvider::Gemini);
        assert!(config.claude.is_none());
        assert_eq!(config.pacing_delay, Duration::from_secs(1));
        assert_eq!(config.output_dir, PathBuf::from("output/rakuten_pages"));
        assert_eq!(config.port, 8000);
        assert_eq!(config.job_retention, 256);
    }

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!(" Anthropic ".parse::<LlmProvider>(), Ok(LlmProvider::Claude));
        assert_eq!("GEMINI".parse::<LlmProvider>(), Ok(LlmProvider::Gemini));

        let mut pairs = CREDENTIALS.to_vec();
        pairs.push(("LLM_PROVIDER", "mistral"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "LLM_PROVIDER",
                value: "mistral".into()
            }
        );
    }

    #[test]
    fn claude_provider_requires_its_key() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.push(("LLM_PROVIDER", "claude"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(err, ConfigError::Missing(vec!["CLAUDE_API_KEY"]));

        pairs.push(("CLAUDE_API_KEY", "ck"));
        let config = AppConfig::from_lookup(lookup(&pairs)).expect("config");
        assert_eq!(config.provider, LlmProvider::Claude);
        assert_eq!(config.claude.map(|c| c.api_key), Some("ck".to_string()));
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.push(("PACING_DELAY_MS", "soon"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PACING_DELAY_MS",
                value: "soon".into()
            }
        );
    }

    #[test]
    fn base_urls_lose_trailing_slash() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.push(("RAKUTEN_API_URL", "http://127.0.0.1:9000/"));
        let config = AppConfig::from_lookup(lookup(&pairs)).expect("config");
        assert_eq!(config.rakuten.base_url, "http://127.0.0.1:9000");
    }
}
