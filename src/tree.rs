//! Hierarchical command registry.
//!
//! Commands are stored by path. When two commands claim the same path the
//! more recent stable API version wins, and enum values from the loser are
//! folded into the winner.

use std::collections::BTreeMap;

use tracing::debug;

use crate::command::{Action, ApiCommand};
use crate::error::TreeError;
use crate::flag::FlagKind;

/// Parsed `v<number>[beta...]` version annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionTag {
    pub is_beta: bool,
    pub number: u32,
}

impl VersionTag {
    /// `"v2"` → stable 2, `"v1beta"` → beta 1. Anything else is `None`.
    pub fn parse(version: &str) -> Option<Self> {
        let rest = version.strip_prefix('v')?;
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let number = rest[..digits].parse().ok()?;
        let suffix = &rest[digits..];
        let is_beta = suffix.starts_with("beta");
        if !suffix.is_empty() && !is_beta {
            return None;
        }
        Some(Self { is_beta, number })
    }

    /// Whether `self` should replace `incumbent`: stable beats beta, then the
    /// higher number wins. Ties keep the incumbent.
    pub fn supersedes(&self, incumbent: &VersionTag) -> bool {
        match (self.is_beta, incumbent.is_beta) {
            (false, true) => true,
            (true, false) => false,
            _ => self.number > incumbent.number,
        }
    }
}

fn version_tag(cmd: &ApiCommand) -> Option<VersionTag> {
    cmd.api_version().and_then(VersionTag::parse)
}

/// Pick the command to keep at a contested path.
fn prefer(incumbent: ApiCommand, challenger: ApiCommand) -> ApiCommand {
    let challenger_wins = match (version_tag(&incumbent), version_tag(&challenger)) {
        (None, None) => true,
        (Some(_), None) => false,
        (None, Some(_)) => true,
        (Some(i), Some(c)) => c.supersedes(&i),
    };
    debug!(
        command = %incumbent.name(),
        incumbent = ?incumbent.api_version(),
        challenger = ?challenger.api_version(),
        challenger_wins,
        "Merging command versions"
    );

    let (mut winner, loser) = if challenger_wins {
        (challenger, incumbent)
    } else {
        (incumbent, challenger)
    };
    for flag in winner.flags_mut() {
        if flag.kind() != FlagKind::Enum {
            continue;
        }
        if let Some(other) = loser.flag(&flag.name) {
            flag.add_values(other.allowed_values());
        }
    }
    winner
}

#[derive(Debug, Clone, Default)]
pub struct CommandNode {
    command: Option<ApiCommand>,
    children: BTreeMap<String, CommandNode>,
}

impl CommandNode {
    pub fn command(&self) -> Option<&ApiCommand> {
        self.command.as_ref()
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &CommandNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandTree {
    root: CommandNode,
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `cmd` at `path`, creating intermediate nodes as needed.
    ///
    /// The last segment must equal the command name. Nothing is modified on
    /// error.
    pub fn add_command<S: AsRef<str>>(
        &mut self,
        path: &[S],
        cmd: ApiCommand,
    ) -> Result<(), TreeError> {
        let Some(last) = path.last() else {
            return Err(TreeError::EmptyPath);
        };
        if last.as_ref() != cmd.name() {
            return Err(TreeError::NameMismatch {
                segment: last.as_ref().to_string(),
                name: cmd.name().to_string(),
            });
        }

        let mut node = &mut self.root;
        for segment in path {
            node = node
                .children
                .entry(segment.as_ref().to_string())
                .or_default();
        }
        node.command = Some(match node.command.take() {
            Some(incumbent) => prefer(incumbent, cmd),
            None => cmd,
        });
        Ok(())
    }

    /// Copy of the command bound at `path`, for callers to modify.
    pub fn get_command<S: AsRef<str>>(&self, path: &[S]) -> Option<ApiCommand> {
        self.node(path)?.command.clone()
    }

    pub fn node<S: AsRef<str>>(&self, path: &[S]) -> Option<&CommandNode> {
        let mut node = &self.root;
        for segment in path {
            node = node.children.get(segment.as_ref())?;
        }
        Some(node)
    }

    /// Path and command of the request command that POSTs to `path` on
    /// `service`, wherever the layout and naming placed it.
    pub fn find_request(&self, service: &str, path: &str) -> Option<(Vec<String>, &ApiCommand)> {
        let mut trail = Vec::new();
        find_request_in(&self.root, service, path, &mut trail)
    }

    /// Attach the whole tree under `root`.
    ///
    /// Unbound nodes become help-only namespaces. Children with a group id are
    /// listed under that group's title in the parent's help.
    pub fn build(&self, root: clap::Command) -> clap::Command {
        attach_children(root, &self.root)
    }
}

fn find_request_in<'a>(
    node: &'a CommandNode,
    service: &str,
    path: &str,
    trail: &mut Vec<String>,
) -> Option<(Vec<String>, &'a ApiCommand)> {
    for (name, child) in &node.children {
        trail.push(name.clone());
        if let Some(cmd) = &child.command {
            if let Action::Request { service: s, path: p } = cmd.action() {
                if s == service && p == path {
                    return Some((trail.clone(), cmd));
                }
            }
        }
        if let Some(found) = find_request_in(child, service, path, trail) {
            return Some(found);
        }
        trail.pop();
    }
    None
}

struct HelpGroup {
    title: String,
    id: String,
    entries: Vec<(String, String)>,
}

fn attach_children(mut parent: clap::Command, node: &CommandNode) -> clap::Command {
    let mut groups: Vec<HelpGroup> = Vec::new();
    let mut ungrouped: Vec<(String, String)> = Vec::new();

    for (name, child) in &node.children {
        let command = child
            .command
            .clone()
            .unwrap_or_else(|| ApiCommand::namespace(name.clone()));

        let entry = (name.clone(), command.short_help().to_string());
        match command.group_id() {
            Some(id) => match groups.iter_mut().find(|g| g.id == id) {
                Some(group) => group.entries.push(entry),
                None => groups.push(HelpGroup {
                    title: group_title(id),
                    id: id.to_string(),
                    entries: vec![entry],
                }),
            },
            None => ungrouped.push(entry),
        }

        let mut sub = attach_children(command.to_clap(), child);
        if !child.children.is_empty() {
            // a derived child must not inherit its parent's required flags
            sub = sub.subcommand_negates_reqs(true);
            if matches!(command.action(), Action::Help) {
                sub = sub.subcommand_required(true).arg_required_else_help(true);
            }
        }
        parent = parent.subcommand(sub);
    }

    if !groups.is_empty() {
        parent = parent.help_template(grouped_template(&groups, &ungrouped));
    }
    parent
}

/// `"vault"` → `"Vault"`.
fn group_title(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn grouped_template(groups: &[HelpGroup], ungrouped: &[(String, String)]) -> String {
    let width = groups
        .iter()
        .flat_map(|g| g.entries.iter())
        .chain(ungrouped)
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);

    let mut out = String::from("{about-with-newline}\n{usage-heading} {usage}\n");
    let mut section = |title: &str, entries: &[(String, String)]| {
        out.push_str(&format!("\n{title}:\n"));
        for (name, help) in entries {
            // braces would be read as template tags
            let help = help.replace('{', "(").replace('}', ")");
            out.push_str(&format!("  {name:<width$}  {help}\n"));
        }
    };
    for group in groups {
        section(&group.title, &group.entries);
    }
    if !ungrouped.is_empty() {
        section("Additional Commands", ungrouped);
    }
    out.push_str("\nOptions:\n{options}{after-help}");
    out
}
