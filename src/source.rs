//! Where API definitions come from.

use std::path::PathBuf;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;

use crate::builder::CliConfig;
use crate::error::LoadError;
use crate::spec::ApiDefinition;

/// Path of the definition document relative to a service's base URL.
pub const DEFINITION_PATH: &str = "/v1/openapi.json";

/// Loads the definition of a service by name.
pub trait DefinitionSource: Send + Sync {
    fn load(&self, service: &str) -> Result<ApiDefinition, LoadError>;

    /// Drop any stored copy of the definition, e.g. after the service
    /// rejected the token it was fetched with.
    fn invalidate(&self, _service: &str) -> Result<(), LoadError> {
        Ok(())
    }
}

/// Reads `<dir>/<service>.json`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DefinitionSource for DirectorySource {
    fn load(&self, service: &str) -> Result<ApiDefinition, LoadError> {
        let path = self.dir.join(format!("{service}.json"));
        let shown = path.display().to_string();
        debug!(service = %service, path = %shown, "Reading definition");
        let data = std::fs::read(&path).map_err(|source| LoadError::Read {
            path: shown.clone(),
            source,
        })?;
        ApiDefinition::from_slice(&data, shown)
    }
}

/// Fetches `<service base url>/v1/openapi.json`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    config: CliConfig,
}

impl HttpSource {
    pub fn new(config: &CliConfig) -> Result<Self, LoadError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| LoadError::Fetch {
                url: config.base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn url(&self, service: &str) -> String {
        format!("{}{DEFINITION_PATH}", self.config.service_url(service))
    }
}

impl DefinitionSource for HttpSource {
    fn load(&self, service: &str) -> Result<ApiDefinition, LoadError> {
        let url = self.url(service);
        debug!(service = %service, url = %url, "Fetching definition");

        let mut req = self.client.get(&url);
        if !self.config.token.is_empty() {
            req = req.bearer_auth(&self.config.token);
        }
        let fetch = |source| LoadError::Fetch {
            url: url.clone(),
            source,
        };
        let resp = req.send().map_err(fetch)?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(LoadError::Unauthorized {
                service: service.to_string(),
            });
        }
        if !status.is_success() {
            return Err(LoadError::HttpStatus {
                url: url.clone(),
                status,
            });
        }

        let data = resp.bytes().map_err(fetch)?;
        ApiDefinition::from_slice(&data, url)
    }
}
