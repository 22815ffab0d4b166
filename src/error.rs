//! Error types for the openapi-cmdtree crate.

use thiserror::Error;

/// Errors raised while resolving `$ref` pointers in a definition.
///
/// These are scoped to the command being built: the caller logs them and
/// skips that endpoint.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    #[error("reference {reference} points outside document {document}")]
    ForeignDocument { reference: String, document: String },

    #[error("reference {reference} is not of the form #/components/schemas/<name>")]
    UnsupportedPointer { reference: String },

    #[error("schema not found: {name}")]
    SchemaNotFound { name: String },

    #[error("reference cycle through schema {name}")]
    Cycle { name: String },

    #[error("invalid schema {name}")]
    InvalidSchema {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while fetching or parsing an API definition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("failed to read definition from file: {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch definition from {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} while fetching definition from {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("invalid JSON in definition")]
    Parse(#[source] serde_json::Error),

    #[error("unauthorized token for service {service}. Log in again to refresh it")]
    Unauthorized { service: String },

    #[error("no definition source configured")]
    NoSource,
}

/// Structural errors raised while registering commands in the tree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TreeError {
    #[error("last path name [{segment}] and command name [{name}] do not match")]
    NameMismatch { segment: String, name: String },

    #[error("command path must not be empty")]
    EmptyPath,

    #[error("command not found: {path}")]
    NotFound { path: String },
}

/// Errors raised while turning raw CLI strings into flag values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlagError {
    #[error("invalid value {value} for --{flag}. Possible values: [{allowed}]")]
    InvalidEnum {
        flag: String,
        value: String,
        allowed: String,
    },

    #[error("invalid integer {value} for --{flag}")]
    InvalidInteger {
        flag: String,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid boolean {value} for --{flag}")]
    InvalidBoolean { flag: String, value: String },

    #[error("invalid key-value pair for --{flag}: {pair}")]
    InvalidPair { flag: String, pair: String },

    #[error("unterminated quote in --{flag}: {value}")]
    UnterminatedQuote { flag: String, value: String },

    #[error("required flag --{flag} not set")]
    MissingRequired { flag: String },

    #[error("unknown flag --{flag}")]
    Unknown { flag: String },

    #[error("failed to read file {path} for --{flag}")]
    Indirection {
        flag: String,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur during API dispatch.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("HTTP request failed")]
    RequestFailed(#[source] reqwest::Error),

    #[error("failed to read response body")]
    ResponseRead(#[source] reqwest::Error),

    #[error("failed to build HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpError {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("unauthorized token for service {service}. Log in again to refresh it")]
    Unauthorized { service: String },

    #[error("request cancelled")]
    Cancelled,
}

/// Errors raised by plugins while deriving commands from the built tree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    #[error("not available command [{path}]")]
    BaseMissing { path: String },

    #[error("`{flag}` does not exist in base command")]
    FlagMissing { flag: String },

    #[error("`{flag}` flag should be of kind `{expected}` and is kind `{found}`")]
    FlagKind {
        flag: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Top-level error for a single CLI invocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    #[error(transparent)]
    Usage(#[from] clap::Error),

    #[error(transparent)]
    Flag(#[from] FlagError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid response annotation")]
    Response(#[source] serde_json::Error),

    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Command(String),
}
