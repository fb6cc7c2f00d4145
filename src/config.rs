use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::reconcile::types::Policy;
use crate::render::{parse_labels, DEFAULT_BODY, DEFAULT_TITLE};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub defaults: IssueDefaults,
    #[serde(default)]
    pub jobs: HashMap<String, JobConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    pub token: String,
    /// API root for GitHub Enterprise; github.com when unset.
    #[serde(default)]
    pub api_url: Option<String>,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Deserialize, Clone, Default)]
pub struct RunnerConfig {
    /// Shared secret the job runner signs build webhooks with.
    #[serde(default)]
    pub webhook_secret: String,
}

impl std::fmt::Debug for RunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("webhook_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

/// Labels as a list or as one comma/space separated string.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum LabelSpec {
    List(Vec<String>),
    Joined(String),
}

impl LabelSpec {
    pub fn to_set(&self) -> BTreeSet<String> {
        match self {
            LabelSpec::List(labels) => labels
                .iter()
                .flat_map(|l| parse_labels(l))
                .collect(),
            LabelSpec::Joined(raw) => parse_labels(raw).into_iter().collect(),
        }
    }

    fn is_blank(&self) -> bool {
        self.to_set().is_empty()
    }
}

/// Global issue settings every job falls back to.
#[derive(Debug, Deserialize, Clone)]
pub struct IssueDefaults {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default)]
    pub labels: Option<LabelSpec>,
    #[serde(default)]
    pub repository: Option<String>,
}

impl Default for IssueDefaults {
    fn default() -> Self {
        Self {
            title: default_title(),
            body: default_body(),
            labels: None,
            repository: None,
        }
    }
}

/// Per-job overrides. Blank values fall through to the defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct JobConfig {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Option<LabelSpec>,
    /// Reopen the closed tracked issue instead of filing a new one.
    #[serde(default)]
    pub reopen: bool,
    /// Comment on the open issue on every repeated failure.
    #[serde(default)]
    pub append: bool,
    #[serde(default)]
    pub skip_remote_check: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("/var/lib/failtrack")
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_body() -> String {
    DEFAULT_BODY.to_string()
}

fn non_blank(value: Option<&String>) -> Option<&String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("failtrack").required(false));
        }

        // Environment variable overrides with FAILTRACK_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("FAILTRACK")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn webhook_secret(&self) -> &str {
        &self.runner.webhook_secret
    }

    /// Effective policy for a job: each field is the job's value when set,
    /// otherwise the global default.
    pub fn policy_for(&self, job: &str) -> Policy {
        let job_config = self
            .jobs
            .get(job)
            .or_else(|| {
                // Config keys may come back lowercased.
                self.jobs
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(job))
                    .map(|(_, config)| config)
            })
            .cloned()
            .unwrap_or_default();
        let defaults = &self.defaults;

        let title = non_blank(job_config.title.as_ref()).unwrap_or(&defaults.title);
        let body = non_blank(job_config.body.as_ref()).unwrap_or(&defaults.body);
        let labels = job_config
            .labels
            .as_ref()
            .filter(|l| !l.is_blank())
            .or(defaults.labels.as_ref())
            .map(LabelSpec::to_set)
            .unwrap_or_default();

        Policy {
            reopen_existing: job_config.reopen,
            append_on_repeat_failure: job_config.append,
            skip_remote_check: job_config.skip_remote_check,
            title_template: title.clone(),
            body_template: body.clone(),
            labels,
            repository_override: non_blank(job_config.repository.as_ref()).cloned(),
            default_repository: non_blank(defaults.repository.as_ref()).cloned(),
        }
    }
}
