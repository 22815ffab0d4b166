//! Build a typed, hierarchical clap CLI from OpenAPI-style API definitions.
//!
//! Each service definition is loaded, its `$ref` pointers resolved, and every
//! `post` operation becomes a command whose flags mirror the request-body
//! schema. Commands are merged across API versions into one tree; plugins can
//! derive further commands from it. Invoking a leaf command assembles the set
//! flags into a JSON body and POSTs it to the service.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use openapi_cmdtree::{builtin_plugins, BuildContext, CliConfig, DirectorySource, HttpClient};
//!
//! let config = CliConfig::new("myapi", "My API CLI", "https://{service}.example.com")
//!     .services(["vault"])
//!     .definitions_dir("./definitions");
//! let source = Arc::new(DirectorySource::new("./definitions"));
//! let client = HttpClient::new(&config).unwrap();
//!
//! let mut ctx = BuildContext::new(config).with_source(source);
//! ctx.load_services();
//! ctx.apply_plugins(&builtin_plugins());
//! let app = ctx.finish();
//!
//! let inv = app.execute(&client, ["myapi", "vault", "v1", "key-store", "--name", "k1"]);
//! ```

pub mod app;
pub mod builder;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod flag;
pub mod mapper;
pub mod plugin;
mod resolve;
pub mod source;
pub mod spec;
pub mod tree;

pub use app::App;
pub use builder::{
    normalize_group, normalize_operation_id, BuildContext, CliConfig, CommandNaming,
    VersionLayout, SERVICES_GROUP, TOOLS_GROUP,
};
pub use command::{Action, ApiCommand, Hook, Invocation, Positional, RESPONSE_ANNOTATION};
pub use dispatch::{
    assemble_body, ApiClient, ApiRequest, CancelToken, HttpClient, IndirectionPolicy,
};
pub use error::{
    CliError, DispatchError, FlagError, LoadError, PluginError, ResolveError, TreeError,
};
pub use flag::{Flag, FlagKind, FlagValue};
pub use mapper::add_schema_flags;
pub use plugin::{
    builtin_plugins, Base64Plugin, BaseCommand, CommandPatch, FilePatternPlugin, Plugin,
    Registration,
};
pub use source::{DefinitionSource, DirectorySource, HttpSource};
pub use spec::{extract_operations, split_version, ApiDefinition, ApiOperation, Schema};
pub use tree::{CommandNode, CommandTree, VersionTag};

// Re-export dependencies for downstream crates
pub use clap;
pub use reqwest;
