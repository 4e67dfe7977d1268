//! Client configuration from a TOML file and the environment.
//!
//! The file is looked up at:
//! 1. `$XDG_CONFIG_HOME/awsutils/config.toml`
//! 2. `$HOME/.config/awsutils/config.toml`
//!
//! A missing file means defaults. Environment variables override file
//! values, and command-line flags override both.
//!
//! ```toml
//! endpoint = "s3.eu-west-1.amazonaws.com"
//! region = "eu-west-1"
//! signature = "v4"
//! retry_budget = 5
//! ```

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::{EngineConfig, RequestEngine, RetryPolicy};
use crate::http::{Destination, InvalidDestination};
use crate::s3::{DEFAULT_REGION, ObjectSignature, S3Client};
use crate::service::AwsErrorClassifier;
use crate::signer::{BucketEndpoints, Credentials, DEFAULT_BUCKET_ENDPOINTS, Signer};

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "s3.amazonaws.com";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECEIVE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);
const MAX_RETRY_BUDGET: u32 = 10;
const MAX_TIMEOUT_SECS: u64 = 3600;

const ENV_ACCESS_KEY: &str = "AWS_ACCESS_KEY_ID";
const ENV_SECRET_KEY: &str = "AWS_SECRET_ACCESS_KEY";
const ENV_REGION: &str = "AWS_REGION";
const ENV_ENDPOINT: &str = "AWSUTILS_ENDPOINT";

/// Errors raised while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// Path of the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The config file is not valid TOML for [`ClientConfig`].
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// Path of the file.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The endpoint is not a usable host.
    #[error(transparent)]
    Endpoint(#[from] InvalidDestination),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Settings for building clients.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Endpoint host, `host:port`, or a URL with an `http`/`https` scheme.
    pub endpoint: String,
    /// Region for V4 scopes.
    pub region: String,
    /// Use TLS unless the endpoint names a scheme.
    pub secure: bool,
    /// Always address buckets in the path.
    pub path_style: bool,
    /// Object-storage request signature.
    pub signature: ObjectSignature,
    /// Connect plus TLS handshake limit.
    pub connect_timeout_secs: u64,
    /// Per-read limit.
    pub receive_timeout_secs: u64,
    /// Overall per-call deadline.
    pub operation_timeout_secs: Option<u64>,
    /// Resends allowed per call.
    pub retry_budget: u32,
    /// First backoff delay; zero resends immediately.
    pub retry_base_delay_ms: u64,
    /// Directory for large response bodies.
    pub temp_dir: Option<PathBuf>,
    /// Endpoints under which a host's first label is a bucket name.
    pub bucket_endpoints: Vec<String>,
    /// Access key id.
    pub access_key: Option<String>,
    /// Secret access key.
    pub secret_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            region: DEFAULT_REGION.to_string(),
            secure: true,
            path_style: false,
            signature: ObjectSignature::default(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            receive_timeout_secs: DEFAULT_RECEIVE_TIMEOUT_SECS,
            operation_timeout_secs: None,
            retry_budget: crate::engine::DEFAULT_RETRY_BUDGET,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            temp_dir: None,
            bucket_endpoints: DEFAULT_BUCKET_ENDPOINTS
                .iter()
                .map(|endpoint| (*endpoint).to_string())
                .collect(),
            access_key: None,
            secret_key: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("secure", &self.secure)
            .field("path_style", &self.path_style)
            .field("signature", &self.signature)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("receive_timeout_secs", &self.receive_timeout_secs)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("retry_budget", &self.retry_budget)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("temp_dir", &self.temp_dir)
            .field("bucket_endpoints", &self.bucket_endpoints.len())
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Default config file path, if a base directory is known.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("awsutils")
                .join("config.toml"),
        );
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("awsutils")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

impl ClientConfig {
    /// Loads `path`, or the default path when `None`, then applies
    /// environment overrides and validates.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or a
    /// value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|name| env::var(name).ok().filter(|value| !value.is_empty()));
        config.validate()?;
        Ok(config)
    }

    /// Parses one TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overrides credentials, region and endpoint from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(access_key) = lookup(ENV_ACCESS_KEY) {
            self.access_key = Some(access_key);
        }
        if let Some(secret_key) = lookup(ENV_SECRET_KEY) {
            self.secret_key = Some(secret_key);
        }
        if let Some(region) = lookup(ENV_REGION) {
            self.region = region;
        }
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.endpoint = endpoint;
        }
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad key, or
    /// [`ConfigError::Endpoint`] for an unusable endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid("endpoint", "must not be empty"));
        }
        self.destination()?;
        if self.region.trim().is_empty() {
            return Err(ConfigError::invalid("region", "must not be empty"));
        }
        validate_timeout_secs("connect_timeout_secs", Some(self.connect_timeout_secs))?;
        validate_timeout_secs("receive_timeout_secs", Some(self.receive_timeout_secs))?;
        validate_timeout_secs("operation_timeout_secs", self.operation_timeout_secs)?;
        if self.retry_budget > MAX_RETRY_BUDGET {
            return Err(ConfigError::invalid(
                "retry_budget",
                format!(
                    "{}. Expected range: 0..={MAX_RETRY_BUDGET}",
                    self.retry_budget
                ),
            ));
        }
        if self.bucket_endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "bucket_endpoints",
                "entries must not be empty",
            ));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(ConfigError::invalid(
                "secret_key",
                "access_key and secret_key must be set together",
            ));
        }
        Ok(())
    }

    /// The endpoint as a destination.
    ///
    /// An `http://` or `https://` prefix overrides `secure`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Endpoint`] if the host is unusable.
    pub fn destination(&self) -> Result<Destination, ConfigError> {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        let (authority, secure) = if let Some(rest) = endpoint.strip_prefix("https://") {
            (rest, true)
        } else if let Some(rest) = endpoint.strip_prefix("http://") {
            (rest, false)
        } else {
            (endpoint, self.secure)
        };
        Ok(Destination::parse(authority, secure)?)
    }

    /// Credentials, when both keys are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some(Credentials::new(access, secret)),
            _ => None,
        }
    }

    /// Transport settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Endpoint`] if the host is unusable.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let mut config = EngineConfig::new(self.destination()?);
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        config.receive_timeout = Duration::from_secs(self.receive_timeout_secs);
        config.operation_timeout = self.operation_timeout_secs.map(Duration::from_secs);
        config.retry = RetryPolicy::new(
            self.retry_budget,
            Duration::from_millis(self.retry_base_delay_ms),
            MAX_RETRY_DELAY,
        );
        config.temp_dir.clone_from(&self.temp_dir);
        Ok(config)
    }

    /// Engine with the service error classifier and, when credentials are
    /// set, a signer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Endpoint`] if the host is unusable.
    pub fn engine(&self) -> Result<RequestEngine, ConfigError> {
        let mut engine =
            RequestEngine::new(self.engine_config()?).with_classifier(AwsErrorClassifier);
        if let Some(credentials) = self.credentials() {
            engine = engine.with_signer(
                Signer::new(credentials)
                    .with_bucket_endpoints(BucketEndpoints::new(self.bucket_endpoints.clone())),
            );
        }
        Ok(engine)
    }

    /// Object-storage client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Endpoint`] if the host is unusable.
    pub fn s3_client(&self) -> Result<S3Client, ConfigError> {
        Ok(S3Client::new(Arc::new(self.engine()?))
            .with_path_style(self.path_style)
            .with_signature(self.signature)
            .with_region(&self.region))
    }
}

fn validate_timeout_secs(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=MAX_TIMEOUT_SECS).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("{value}. Expected range: 1..={MAX_TIMEOUT_SECS}"),
        ));
    }
    Ok(())
}
