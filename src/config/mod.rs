use std::path::Path;

use config::{Config, ConfigError, Environment};
use http::{StatusCode, Uri};
use serde::Deserialize;
use source::TomlScopeSource;

use crate::client::FromConfigError;
use crate::path::GetConfigFilePathError;

pub mod source;

/// The only config layout this crate understands.
pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_LOGIN_PATH: &str = "/api/auth/login";
const DEFAULT_REFRESH_PATH: &str = "/api/auth/refresh";

#[derive(thiserror::Error, Debug)]
pub enum LoadConfigError {
    #[error("Failed to get config file path: {0}")]
    FailedToGetConfigFilePath(#[from] GetConfigFilePathError),

    #[error("Failed to build config: {0}")]
    FailedToBuildConfig(#[from] ConfigError),

    #[error("Unsupported config version: {0}")]
    UnsupportedConfigVersion(u32),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Scheme and host of the API, e.g. `https://api.example.com`
    pub base_url: Option<String>,
    /// Path of the login endpoint
    pub login_path: Option<String>,
    /// Path of the credential refresh endpoint
    pub refresh_path: Option<String>,
    /// The status code that means "credential rejected"
    pub unauthorized_status: Option<u16>,
    /// Name of the cookie carrying the renewal secret
    pub renewal_cookie_name: Option<String>,
    /// Whether the refresh body carries the last known access token
    pub send_tokens_in_body: Option<bool>,
}

impl PipelineConfig {
    pub fn base_url(&self) -> Result<&str, FromConfigError> {
        self.base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or(FromConfigError::MissingBaseUrl)
    }

    pub fn login_path(&self) -> &str {
        self.login_path.as_deref().unwrap_or(DEFAULT_LOGIN_PATH)
    }

    pub fn refresh_path(&self) -> &str {
        self.refresh_path.as_deref().unwrap_or(DEFAULT_REFRESH_PATH)
    }

    pub fn send_tokens_in_body(&self) -> bool {
        self.send_tokens_in_body.unwrap_or(true)
    }

    pub fn unauthorized_status(&self) -> Result<StatusCode, FromConfigError> {
        let code = self
            .unauthorized_status
            .unwrap_or(StatusCode::UNAUTHORIZED.as_u16());
        StatusCode::from_u16(code).map_err(|_| FromConfigError::InvalidStatus(code))
    }

    pub fn login_uri(&self) -> Result<Uri, FromConfigError> {
        self.endpoint(self.login_path())
    }

    pub fn refresh_uri(&self) -> Result<Uri, FromConfigError> {
        self.endpoint(self.refresh_path())
    }

    /// Join `path` onto the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Uri, FromConfigError> {
        let url = format!("{}/{}", self.base_url()?, path.trim_start_matches('/'));
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| {
            FromConfigError::InvalidEndpoint {
                url: url.clone(),
                reason: e.to_string(),
            }
        })?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(FromConfigError::InvalidEndpoint {
                url,
                reason: "expected an absolute URL".to_string(),
            });
        }
        Ok(uri)
    }
}

/// Load the config from the default file and environment variables for a given profile
/// If no profile name is provided, the default profile is loaded
pub fn load_config(profile_name: Option<&str>) -> Result<PipelineConfig, LoadConfigError> {
    let config_file_path = crate::path::config_file()?;
    load_config_from_file(config_file_path, true, profile_name)
}

/// Load the config for a given file and profile, optionally loading environment variables
pub fn load_config_from_file(
    config_file_path: impl AsRef<Path>,
    load_environment_variables: bool,
    profile_name: Option<&str>,
) -> Result<PipelineConfig, LoadConfigError> {
    let config_file_path = config_file_path.as_ref();

    // Layers (from lowest to highest precedence):
    // 1. The global table
    // 2. The [profiles.<name>] table
    // 3. Environment variables prefixed with AUTH_PIPELINE_
    let mut config_builder = Config::builder()
        .add_source(TomlScopeSource::global(config_file_path))
        .add_source(TomlScopeSource::profile(
            config_file_path,
            profile_name.unwrap_or("default"),
        ));

    if load_environment_variables {
        config_builder = config_builder.add_source(
            Environment::with_prefix("AUTH_PIPELINE")
                .prefix_separator("_")
                .try_parsing(true),
        );
    }

    let config = config_builder.build()?;

    let config_version = config
        .get::<u32>("version")
        .map_err(|_| LoadConfigError::UnsupportedConfigVersion(0))?;
    if config_version != CONFIG_VERSION {
        return Err(LoadConfigError::UnsupportedConfigVersion(config_version));
    }

    let config = config.try_deserialize::<PipelineConfig>()?;

    Ok(config)
}
