//! Definitions → command tree
//!
//! [`BuildContext`] turns each loaded [`ApiDefinition`] into request commands,
//! registers them in a [`CommandTree`] and then lets plugins derive extra
//! commands from the result.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::App;
use crate::command::ApiCommand;
use crate::dispatch::IndirectionPolicy;
use crate::error::{LoadError, ResolveError, TreeError};
use crate::mapper::{add_schema_flags, clean_format, short_help};
use crate::plugin::Plugin;
use crate::source::DefinitionSource;
use crate::spec::{extract_operations, ApiDefinition, ApiOperation};
use crate::tree::CommandTree;

/// Help group for per-service namespaces.
pub const SERVICES_GROUP: &str = "services";
/// Help group for local utility commands.
pub const TOOLS_GROUP: &str = "tools";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BASE_URL: &str = "https://{service}.example.com";

/// Strategy for generating CLI command names.
#[derive(Debug, Clone, Copy, Default)]
pub enum CommandNaming {
    /// Versionless endpoint path, slash-separated parts joined with dashes.
    ///
    /// `"/key/store"` → `"key-store"`
    #[default]
    Endpoint,
    /// Normalized operation id.
    ///
    /// `"storeKey"` → `"store-key"`
    OperationId,
    /// Custom naming logic.
    ///
    /// Arguments: `(endpoint, operation_id) -> command_name`
    Custom(fn(&str, &str) -> String),
}

impl CommandNaming {
    pub fn apply(&self, endpoint: &str, operation_id: &str) -> String {
        let endpoint_name = normalize_group(endpoint);
        let result = match self {
            Self::Endpoint => return endpoint_name,
            Self::OperationId => normalize_operation_id(operation_id),
            Self::Custom(f) => f(endpoint, operation_id),
        };
        // Guard: empty command name would panic in clap
        if result.is_empty() {
            endpoint_name
        } else {
            result
        }
    }
}

/// Where request commands sit relative to their API version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionLayout {
    /// `<service> <version> <command>`
    #[default]
    Nested,
    /// `<service> <command>`, keeping the most recent stable version.
    Latest,
}

impl VersionLayout {
    pub fn path(&self, service: &str, version: Option<&str>, name: &str) -> Vec<String> {
        let mut path = vec![service.to_string()];
        if let (Self::Nested, Some(version)) = (self, version) {
            path.push(version.to_string());
        }
        path.push(name.to_string());
        path
    }
}

/// Configuration for building a CLI from API definitions.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CliConfig {
    /// Root command name (e.g. "apicli")
    pub name: String,
    /// Root command about/description
    pub about: String,
    /// Services whose definitions are loaded at startup
    pub services: Vec<String>,
    /// Base URL template; `{service}` is replaced by the service name
    pub base_url: String,
    /// Bearer token sent with every request, if non-empty
    pub token: String,
    pub timeout: Duration,
    /// Read definitions from `<dir>/<service>.json` instead of fetching them
    pub definitions_dir: Option<PathBuf>,
    pub command_naming: CommandNaming,
    pub version_layout: VersionLayout,
    pub indirection: IndirectionPolicy,
}

impl CliConfig {
    pub fn new(
        name: impl Into<String>,
        about: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            about: about.into(),
            services: Vec::new(),
            base_url: base_url.into(),
            token: String::new(),
            timeout: DEFAULT_TIMEOUT,
            definitions_dir: None,
            command_naming: CommandNaming::default(),
            version_layout: VersionLayout::default(),
            indirection: IndirectionPolicy::default(),
        }
    }

    /// Defaults overridden by `APICLI_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(
            "apicli",
            "Command line client generated from API definitions",
            get("APICLI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        );
        if let Some(token) = get("APICLI_TOKEN") {
            config.token = token;
        }
        if let Some(services) = get("APICLI_SERVICES") {
            config.services = services
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(dir) = get("APICLI_DEFINITIONS") {
            config.definitions_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = get("APICLI_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(secs) => config.timeout = Duration::from_secs(secs),
                Err(e) => warn!(value = %secs, error = %e, "Ignoring invalid APICLI_TIMEOUT_SECS"),
            }
        }
        config
    }

    pub fn services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn definitions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.definitions_dir = Some(dir.into());
        self
    }

    /// Set the command naming strategy.
    pub fn command_naming(mut self, naming: CommandNaming) -> Self {
        self.command_naming = naming;
        self
    }

    pub fn version_layout(mut self, layout: VersionLayout) -> Self {
        self.version_layout = layout;
        self
    }

    pub fn indirection(mut self, policy: IndirectionPolicy) -> Self {
        self.indirection = policy;
        self
    }

    /// Base URL for `service`, without a trailing slash.
    pub fn service_url(&self, service: &str) -> String {
        self.base_url
            .replace("{service}", service)
            .trim_end_matches('/')
            .to_string()
    }
}

/// Explicit build state: the tree under construction, the services that
/// loaded, and where definitions come from.
pub struct BuildContext {
    config: CliConfig,
    tree: CommandTree,
    loaded: BTreeSet<String>,
    source: Option<Arc<dyn DefinitionSource>>,
}

impl BuildContext {
    pub fn new(config: CliConfig) -> Self {
        Self {
            config,
            tree: CommandTree::new(),
            loaded: BTreeSet::new(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn DefinitionSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    pub fn tree(&self) -> &CommandTree {
        &self.tree
    }

    pub fn is_loaded(&self, service: &str) -> bool {
        self.loaded.contains(service)
    }

    pub fn add_command<S: AsRef<str>>(
        &mut self,
        path: &[S],
        cmd: ApiCommand,
    ) -> Result<(), TreeError> {
        self.tree.add_command(path, cmd)
    }

    /// Load every configured service, logging and skipping failures.
    pub fn load_services(&mut self) {
        for service in self.config.services.clone() {
            if let Err(e) = self.load_service(&service) {
                warn!(service = %service, error = %e, "Skipping service");
            }
        }
    }

    /// Load one service and register its commands.
    ///
    /// A definition marked unauthorized is invalidated at the source and the
    /// service is not registered.
    pub fn load_service(&mut self, service: &str) -> Result<usize, LoadError> {
        let source = self.source.clone().ok_or(LoadError::NoSource)?;
        let def = match source.load(service) {
            Ok(def) if !def.is_unauthorized() => def,
            Ok(_) | Err(LoadError::Unauthorized { .. }) => {
                if let Err(e) = source.invalidate(service) {
                    warn!(service = %service, error = %e, "Failed to invalidate definition");
                }
                return Err(LoadError::Unauthorized {
                    service: service.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        let added = self.add_definition(service, &def);
        let namespace = ApiCommand::namespace(service)
            .short(format!("{} service", title(service)))
            .group(SERVICES_GROUP);
        if let Err(e) = self.tree.add_command(&[service], namespace) {
            warn!(service = %service, error = %e, "Failed to add service command");
        }
        self.loaded.insert(service.to_string());
        info!(service = %service, commands = added, "Loaded service");
        Ok(added)
    }

    /// Register one command per operation of `def`. Endpoints that fail to
    /// build are logged and skipped; returns how many were added.
    pub fn add_definition(&mut self, service: &str, def: &ApiDefinition) -> usize {
        let mut added = 0;
        for op in extract_operations(def) {
            let name = self
                .config
                .command_naming
                .apply(&op.endpoint, &op.operation_id);
            if name.is_empty() {
                warn!(service = %service, path = %op.path, "Endpoint yields an empty command name");
                continue;
            }

            let cmd = match command_from_operation(service, def, &op, name) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!(service = %service, path = %op.path, error = %e, "Failed to build command");
                    continue;
                }
            };
            let path = self.config.version_layout.path(
                service,
                op.version.as_deref(),
                cmd.name(),
            );
            match self.tree.add_command(&path, cmd) {
                Ok(()) => added += 1,
                Err(e) => warn!(service = %service, path = %op.path, error = %e, "Failed to add command"),
            }
        }
        added
    }

    /// Let each plugin derive commands from the tree built so far. Plugins tied
    /// to a service that did not load are skipped.
    pub fn apply_plugins(&mut self, plugins: &[Box<dyn Plugin>]) {
        for plugin in plugins {
            if let Some(service) = plugin.service() {
                if !self.loaded.contains(service) {
                    debug!(plugin = plugin.name(), service, "Service not loaded; plugin skipped");
                    continue;
                }
            }
            let registrations = match plugin.commands(&self.tree) {
                Ok(registrations) => registrations,
                Err(e) => {
                    warn!(plugin = plugin.name(), error = %e, "Failed to init plugin");
                    continue;
                }
            };
            for reg in registrations {
                if let Err(e) = self.tree.add_command(&reg.path, reg.command) {
                    warn!(plugin = plugin.name(), error = %e, "Failed to add plugin command");
                }
            }
        }
    }

    pub fn finish(self) -> App {
        App::new(self.config, self.tree, self.source)
    }
}

fn command_from_operation(
    service: &str,
    def: &ApiDefinition,
    op: &ApiOperation,
    name: String,
) -> Result<ApiCommand, ResolveError> {
    let mut cmd = ApiCommand::request(name, service, &op.path)
        .short(short_help(&op.summary, &op.description))
        .long(clean_format(&op.description));
    if let Some(group) = &op.group {
        cmd = cmd.group(group);
    }
    if let Some(version) = &op.version {
        cmd = cmd.version(version);
    }
    if let Some(schema) = &op.body_schema {
        let resolved = def.resolve(schema)?;
        add_schema_flags(&mut cmd, &resolved, true);
    }
    Ok(cmd)
}

fn title(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn normalize_group(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            result.push(c.to_ascii_lowercase());
        } else if !result.is_empty() && !result.ends_with('-') {
            result.push('-');
        }
    }
    while result.ends_with('-') {
        result.pop();
    }
    result
}

pub fn normalize_operation_id(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len() + 4);
    for i in 0..chars.len() {
        let c = chars[i];
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase() || (prev.is_uppercase() && next_is_lower) {
                    result.push('-');
                }
            }
            result.push(c.to_ascii_lowercase());
        } else if c == '_' {
            result.push('-');
        } else {
            result.push(c);
        }
    }
    result
}
