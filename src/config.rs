//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::estimation::model::SizeClass;
use crate::llm::{LlmBackend, LlmConfig};

/// Ascending size-classification thresholds, in weeks.
///
/// A value below `thresholds[i]` maps to the i-th label; anything at or above
/// the last threshold is `XXL`. Total over all nonnegative inputs.
#[derive(Debug, Clone)]
pub struct SizeBands {
    thresholds: Vec<(f64, SizeClass)>,
}

impl Default for SizeBands {
    fn default() -> Self {
        Self {
            thresholds: vec![
                (2.0, SizeClass::Xs),
                (4.0, SizeClass::S),
                (8.0, SizeClass::M),
                (16.0, SizeClass::L),
                (26.0, SizeClass::Xl),
            ],
        }
    }
}

impl SizeBands {
    /// Build bands from ascending upper bounds, one per label below XXL.
    pub fn from_bounds(bounds: &[f64]) -> Result<Self, ConfigError> {
        let labels = [
            SizeClass::Xs,
            SizeClass::S,
            SizeClass::M,
            SizeClass::L,
            SizeClass::Xl,
        ];
        if bounds.len() != labels.len() {
            return Err(ConfigError::InvalidValue {
                key: "ESTIMATE_SIZE_BANDS".into(),
                message: format!("expected {} ascending bounds, got {}", labels.len(), bounds.len()),
            });
        }
        if bounds.windows(2).any(|w| w[0] >= w[1]) || bounds[0] <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "ESTIMATE_SIZE_BANDS".into(),
                message: "bounds must be positive and strictly ascending".into(),
            });
        }
        Ok(Self {
            thresholds: bounds.iter().copied().zip(labels).collect(),
        })
    }

    /// Map a nonnegative weeks value to its size class.
    pub fn classify(&self, weeks: f64) -> SizeClass {
        for (bound, label) in &self.thresholds {
            if weeks < *bound {
                return *label;
            }
        }
        SizeClass::Xxl
    }
}

/// Atlassian (Confluence/Jira) credentials.
#[derive(Debug, Clone)]
pub struct AtlassianConfig {
    /// Site base URL, e.g. `https://example.atlassian.net`.
    pub base_url: String,
    pub email: String,
    pub api_token: String,
}

impl AtlassianConfig {
    /// Load from environment, `None` when the site is not configured.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("ATLASSIAN_URL").ok()?;
        let email = std::env::var("ATLASSIAN_USER_EMAIL").ok()?;
        let api_token = std::env::var("ATLASSIAN_API_TOKEN").ok()?;
        Some(Self {
            base_url,
            email,
            api_token,
        })
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port for the REST + WebSocket server.
    pub port: u16,
    /// LLM provider configuration.
    pub llm: LlmConfig,
    /// Sampling temperature for generation.
    pub temperature: f64,
    /// Atlassian credentials (None disables the real fetcher/exporter).
    pub atlassian: Option<AtlassianConfig>,
    /// Root directory for generated artifacts.
    pub artifact_root: PathBuf,
    /// Size-classification thresholds.
    pub size_bands: SizeBands,
    /// Timeout for one content fetch.
    pub fetch_timeout: Duration,
    /// Timeout for one LLM generation call.
    pub llm_timeout: Duration,
    /// Maximum jobs running at once across a batch.
    pub max_parallel_jobs: usize,
    /// Sessions with all-terminal jobs and no subscribers are evicted after
    /// this much inactivity.
    pub session_idle_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            llm: LlmConfig::default(),
            temperature: 0.2,
            atlassian: None,
            artifact_root: PathBuf::from("./data/artifacts"),
            size_bands: SizeBands::default(),
            fetch_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(300),
            max_parallel_jobs: 32,
            session_idle_timeout: Duration::from_secs(1800),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = env_parse("ESTIMATE_PORT", defaults.port)?;
        let temperature = env_parse("ESTIMATE_TEMPERATURE", defaults.temperature)?;

        let backend = match std::env::var("LLM_PROVIDER").as_deref() {
            Ok("openai") => LlmBackend::OpenAi,
            Ok("anthropic") | Err(_) => LlmBackend::Anthropic,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_PROVIDER".into(),
                    message: format!("unknown provider {other:?} (expected anthropic or openai)"),
                });
            }
        };

        let key_var = match backend {
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
            LlmBackend::OpenAi => "OPENAI_API_KEY",
        };
        let api_key = std::env::var(key_var)
            .map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let model = std::env::var("ESTIMATE_MODEL").unwrap_or_else(|_| {
            match backend {
                LlmBackend::Anthropic => "claude-sonnet-4-20250514",
                LlmBackend::OpenAi => "gpt-4o",
            }
            .to_string()
        });

        let llm = LlmConfig {
            backend,
            api_key: secrecy::SecretString::from(api_key),
            model,
        };

        let size_bands = match std::env::var("ESTIMATE_SIZE_BANDS") {
            Ok(raw) => {
                let bounds: Vec<f64> = raw
                    .split(',')
                    .map(|s| {
                        s.trim().parse::<f64>().map_err(|e| ConfigError::InvalidValue {
                            key: "ESTIMATE_SIZE_BANDS".into(),
                            message: e.to_string(),
                        })
                    })
                    .collect::<Result<_, _>>()?;
                SizeBands::from_bounds(&bounds)?
            }
            Err(_) => SizeBands::default(),
        };

        let artifact_root = std::env::var("ESTIMATE_ARTIFACT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.artifact_root);

        let fetch_timeout =
            Duration::from_secs(env_parse("ESTIMATE_FETCH_TIMEOUT_SECS", 30u64)?);
        let llm_timeout = Duration::from_secs(env_parse("ESTIMATE_LLM_TIMEOUT_SECS", 300u64)?);
        let max_parallel_jobs = env_parse("ESTIMATE_MAX_PARALLEL_JOBS", defaults.max_parallel_jobs)?;
        let session_idle_timeout =
            Duration::from_secs(env_parse("ESTIMATE_SESSION_IDLE_SECS", 1800u64)?);

        Ok(Self {
            port,
            llm,
            temperature,
            atlassian: AtlassianConfig::from_env(),
            artifact_root,
            size_bands,
            fetch_timeout,
            llm_timeout,
            max_parallel_jobs,
            session_idle_timeout,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bands_reference_boundaries() {
        let bands = SizeBands::default();
        assert_eq!(bands.classify(0.0), SizeClass::Xs);
        assert_eq!(bands.classify(1.9), SizeClass::Xs);
        assert_eq!(bands.classify(2.0), SizeClass::S);
        assert_eq!(bands.classify(3.9), SizeClass::S);
        assert_eq!(bands.classify(4.0), SizeClass::M);
        assert_eq!(bands.classify(7.9), SizeClass::M);
        assert_eq!(bands.classify(8.0), SizeClass::L);
        assert_eq!(bands.classify(15.9), SizeClass::L);
        assert_eq!(bands.classify(16.0), SizeClass::Xl);
        assert_eq!(bands.classify(25.9), SizeClass::Xl);
        assert_eq!(bands.classify(26.0), SizeClass::Xxl);
        assert_eq!(bands.classify(1000.0), SizeClass::Xxl);
    }

    #[test]
    fn custom_bounds_must_ascend() {
        assert!(SizeBands::from_bounds(&[1.0, 6.0, 12.0, 40.0, 60.0]).is_ok());
        assert!(SizeBands::from_bounds(&[1.0, 6.0, 6.0, 40.0, 60.0]).is_err());
        assert!(SizeBands::from_bounds(&[1.0, 6.0]).is_err());
        assert!(SizeBands::from_bounds(&[0.0, 1.0, 2.0, 3.0, 4.0]).is_err());
    }
}
