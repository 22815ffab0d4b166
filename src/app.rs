//! Built CLI: parse arguments, find the command, run it.

use std::ffi::OsString;
use std::sync::Arc;

use clap::ArgMatches;
use tracing::warn;

use crate::builder::CliConfig;
use crate::command::Invocation;
use crate::dispatch::ApiClient;
use crate::error::{CliError, DispatchError, TreeError};
use crate::source::DefinitionSource;
use crate::tree::CommandTree;

pub struct App {
    config: CliConfig,
    tree: CommandTree,
    source: Option<Arc<dyn DefinitionSource>>,
}

impl App {
    pub fn new(
        config: CliConfig,
        tree: CommandTree,
        source: Option<Arc<dyn DefinitionSource>>,
    ) -> Self {
        Self {
            config,
            tree,
            source,
        }
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    pub fn tree(&self) -> &CommandTree {
        &self.tree
    }

    /// The full clap command tree.
    pub fn command(&self) -> clap::Command {
        let root = clap::Command::new(self.config.name.clone())
            .about(self.config.about.clone())
            .version(env!("CARGO_PKG_VERSION"))
            .subcommand_required(true)
            .arg_required_else_help(true);
        self.tree.build(root)
    }

    /// Parse `argv` (including the binary name) and run the selected command.
    ///
    /// Returns the finished invocation, whose response annotation holds the
    /// result. A service rejecting the token invalidates its definition.
    pub fn execute<I, T>(&self, client: &dyn ApiClient, argv: I) -> Result<Invocation, CliError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.command().try_get_matches_from(argv)?;
        let (path, leaf) = selected_path(&matches);
        let command = self
            .tree
            .node(&path)
            .and_then(|node| node.command())
            .ok_or_else(|| TreeError::NotFound {
                path: path.join(" "),
            })?;

        let mut inv = command.invocation(path, leaf)?;
        let result = command.execute(&mut inv, client, self.config.indirection);
        if let Err(CliError::Dispatch(DispatchError::Unauthorized { service })) = &result {
            self.invalidate(service);
        }
        result.map(|()| inv)
    }

    fn invalidate(&self, service: &str) {
        let Some(source) = &self.source else {
            return;
        };
        if let Err(e) = source.invalidate(service) {
            warn!(service = %service, error = %e, "Failed to invalidate definition");
        }
    }
}

/// Subcommand names from the root down, and the matches of the last one.
fn selected_path(matches: &ArgMatches) -> (Vec<String>, &ArgMatches) {
    let mut path = Vec::new();
    let mut current = matches;
    while let Some((name, sub)) = current.subcommand() {
        path.push(name.to_string());
        current = sub;
    }
    (path, current)
}
