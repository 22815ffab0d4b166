//! Flags → request body → HTTP POST
//!
//! Assembles the JSON body from the flags set on an invocation and sends it
//! through an [`ApiClient`]. [`HttpClient`] is the reqwest-backed client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::builder::CliConfig;
use crate::error::{DispatchError, FlagError};
use crate::flag::{Flag, FlagKind};
use crate::spec::UNAUTHORIZED_STATUS;

/// What to do when an `@<path>` flag value cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndirectionPolicy {
    /// Log a warning and leave the flag out of the body.
    #[default]
    Skip,
    /// Abort the invocation.
    Fail,
}

/// One POST to a service endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest<'a> {
    pub service: &'a str,
    pub path: &'a str,
    pub body: Map<String, Value>,
}

/// Transport boundary for dispatching requests.
pub trait ApiClient {
    fn post(&self, request: &ApiRequest<'_>) -> Result<Value, DispatchError>;
}

/// Build the request body from the flags of one invocation.
///
/// Only flags set on the command line are sent. Fails before any I/O when a
/// required flag is missing.
pub fn assemble_body(
    flags: &[Flag],
    policy: IndirectionPolicy,
) -> Result<Map<String, Value>, FlagError> {
    if let Some(missing) = flags.iter().find(|f| f.required && !f.is_set()) {
        return Err(FlagError::MissingRequired {
            flag: missing.name.clone(),
        });
    }

    let mut body = Map::new();
    for flag in flags.iter().filter(|f| f.is_set()) {
        let value = match flag.indirection() {
            Some(path) => match read_indirect(flag, path) {
                Ok(value) => value,
                Err(e) if policy == IndirectionPolicy::Skip => {
                    warn!(flag = %flag.name, path = %path, error = %e, "Omitting flag");
                    continue;
                }
                Err(e) => return Err(e),
            },
            None => flag.value(),
        };
        body.insert(flag.name.clone(), value);
    }
    Ok(body)
}

/// File contents for an `@<path>` value: base64 for byte flags, text otherwise.
fn read_indirect(flag: &Flag, path: &str) -> Result<Value, FlagError> {
    let err = |source| FlagError::Indirection {
        flag: flag.name.clone(),
        path: path.to_string(),
        source,
    };
    let bytes = std::fs::read(path).map_err(err)?;
    if flag.kind() == FlagKind::Base64 {
        return Ok(Value::String(BASE64.encode(bytes)));
    }
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|e| err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Shared flag that aborts requests not yet sent.
///
/// A request already on the wire runs to completion and its response is
/// returned, since the server may have acted on it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Blocking HTTP client posting to `<base url for service><path>`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
    cancel: CancelToken,
}

impl HttpClient {
    pub fn new(config: &CliConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(DispatchError::ClientBuild)?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn url(&self, service: &str, path: &str) -> String {
        let base = self.base_url.replace("{service}", service);
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    fn check_cancelled(&self) -> Result<(), DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        Ok(())
    }
}

impl ApiClient for HttpClient {
    fn post(&self, request: &ApiRequest<'_>) -> Result<Value, DispatchError> {
        self.check_cancelled()?;

        let url = self.url(request.service, request.path);
        debug!(service = %request.service, url = %url, "Dispatching request");

        let mut req = self.client.post(&url).json(&request.body);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }

        send_request(req, request.service)
    }
}

fn send_request(
    req: reqwest::blocking::RequestBuilder,
    service: &str,
) -> Result<Value, DispatchError> {
    let resp = req.send().map_err(DispatchError::RequestFailed)?;
    let status = resp.status();
    let text = resp.text().map_err(DispatchError::ResponseRead)?;

    let value = serde_json::from_str::<Value>(&text).ok();
    let unauthorized_body = value
        .as_ref()
        .and_then(|v| v.get("status"))
        .and_then(Value::as_str)
        == Some(UNAUTHORIZED_STATUS);
    if status == StatusCode::UNAUTHORIZED || unauthorized_body {
        return Err(DispatchError::Unauthorized {
            service: service.to_string(),
        });
    }

    if !status.is_success() {
        return Err(DispatchError::HttpError { status, body: text });
    }

    Ok(value.unwrap_or(Value::String(text)))
}
