//! Runtime configuration, read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use gitops::{
    parse_repository_url, Namespace, ProviderKind, RepositoryLocation, RepositoryName,
    RepositoryOwner, UnknownProviderKind,
};
use providers::ProviderSettings;

pub const DEFAULT_PORT: u16 = 8082;
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("WEBHOOK_SECRET environment variable is required")]
    MissingWebhookSecret,

    #[error("{name} is required for the {provider} provider")]
    MissingForProvider {
        name: &'static str,
        provider: ProviderKind,
    },

    #[error("invalid SERVER_PORT '{0}'")]
    InvalidPort(String),

    #[error("NAMESPACE must not be empty")]
    InvalidNamespace,

    #[error("invalid LOG_FORMAT '{0}' (expected 'text' or 'json')")]
    InvalidLogFormat(String),

    #[error(transparent)]
    UnknownProvider(#[from] UnknownProviderKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderKind,
    pub token: Option<String>,
    pub webhook_secret: String,
    pub port: u16,
    pub namespace: Namespace,
    pub repo_url: Option<String>,
    pub base_url: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub ssh_key_file: Option<PathBuf>,
    pub bitbucket_user: Option<String>,
    pub public_url: Option<String>,
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = match get("GIT_PROVIDER") {
            Some(name) => name.parse::<ProviderKind>()?,
            None => ProviderKind::Github,
        };
        let webhook_secret = get("WEBHOOK_SECRET").ok_or(ConfigError::MissingWebhookSecret)?;
        let port = match get("SERVER_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };
        let namespace = Namespace::new(get("NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.into()))
            .ok_or(ConfigError::InvalidNamespace)?;
        let log_format = match get("LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };

        let config = Self {
            provider,
            token: get("GIT_TOKEN").or_else(|| get("GITHUB_TOKEN")),
            webhook_secret,
            port,
            namespace,
            repo_url: get("GIT_REPO_URL"),
            base_url: get("GIT_BASE_URL"),
            owner: get("GIT_OWNER"),
            repo: get("GIT_REPO"),
            branch: get("GIT_BRANCH"),
            ssh_key_file: get("GIT_SSH_KEY_FILE").map(PathBuf::from),
            bitbucket_user: get("BITBUCKET_USER"),
            public_url: get("PUBLIC_URL"),
            log_format,
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        match provider {
            ProviderKind::Gitea if config.base_url.is_none() => {
                Err(ConfigError::MissingForProvider {
                    name: "GIT_BASE_URL",
                    provider,
                })
            }
            ProviderKind::Git if config.repo_url.is_none() => {
                Err(ConfigError::MissingForProvider {
                    name: "GIT_REPO_URL",
                    provider,
                })
            }
            _ => Ok(config),
        }
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            kind: self.provider,
            token: self.token.clone(),
            base_url: self.base_url.clone(),
            repo_url: self.repo_url.clone(),
            ssh_key_file: self.ssh_key_file.clone(),
            bitbucket_user: self.bitbucket_user.clone(),
            branch: self.branch.clone(),
        }
    }

    /// Repository to register the webhook on: `GIT_OWNER`/`GIT_REPO` when both
    /// are set, otherwise inferred from `GIT_REPO_URL`.
    pub fn webhook_repository(&self) -> Option<RepositoryLocation> {
        let explicit = self
            .owner
            .clone()
            .and_then(RepositoryOwner::new)
            .zip(self.repo.clone().and_then(RepositoryName::new));
        match explicit {
            Some((owner, name)) => Some(RepositoryLocation::new(owner, name)),
            None => self.repo_url.as_deref().and_then(parse_repository_url),
        }
    }

    /// `<PUBLIC_URL>/webhook`, when a public URL is configured.
    pub fn webhook_url(&self) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|base| format!("{}/webhook", base.trim_end_matches('/')))
    }
}
