//! Command nodes, their clap rendering and per-run invocation state.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::sync::Arc;

use clap::builder::{PossibleValue, StringValueParser, TypedValueParser};
use clap::{Arg, ArgAction, ArgMatches};
use serde_json::Value;

use crate::dispatch::{assemble_body, ApiClient, ApiRequest, IndirectionPolicy};
use crate::error::{CliError, FlagError};
use crate::flag::{Flag, FlagKind};
use crate::mapper::merge_descriptions;

/// Annotation key holding the JSON response of the last request.
pub const RESPONSE_ANNOTATION: &str = "response";

/// Callback run before or after a command's action, or as the action itself.
pub type Hook = Arc<dyn Fn(&mut Invocation) -> Result<(), CliError> + Send + Sync>;

/// What a leaf command does when invoked.
#[derive(Clone)]
pub enum Action {
    /// Namespace only: clap prints help.
    Help,
    /// POST the assembled flags to `path` on `service`.
    Request { service: String, path: String },
    /// Local command implemented in Rust.
    Run(Hook),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Help => f.write_str("Help"),
            Self::Request { service, path } => f
                .debug_struct("Request")
                .field("service", service)
                .field("path", path)
                .finish(),
            Self::Run(_) => f.write_str("Run(..)"),
        }
    }
}

/// Single positional argument, used by local and plugin commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Positional {
    pub name: String,
    pub help: String,
}

/// A node of the command tree: name, help, flags and the action to run.
///
/// Outside the crate a built command is changed only through
/// [`CommandPatch`](crate::plugin::CommandPatch).
#[derive(Clone)]
pub struct ApiCommand {
    name: String,
    short: String,
    long: String,
    group_id: Option<String>,
    version: Option<String>,
    usage: Option<String>,
    positional: Option<Positional>,
    flags: Vec<Flag>,
    action: Action,
    pre_run: Vec<Hook>,
    post_run: Vec<Hook>,
}

impl fmt::Debug for ApiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCommand")
            .field("name", &self.name)
            .field("group_id", &self.group_id)
            .field("version", &self.version)
            .field("flags", &self.flags)
            .field("action", &self.action)
            .field("pre_run", &self.pre_run.len())
            .field("post_run", &self.post_run.len())
            .finish_non_exhaustive()
    }
}

impl ApiCommand {
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            short: String::new(),
            long: String::new(),
            group_id: None,
            version: None,
            usage: None,
            positional: None,
            flags: Vec::new(),
            action,
            pre_run: Vec::new(),
            post_run: Vec::new(),
        }
    }

    /// Command that POSTs to `path` on `service`.
    pub fn request(
        name: impl Into<String>,
        service: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            Action::Request {
                service: service.into(),
                path: path.into(),
            },
        )
    }

    /// Help-only stub for an intermediate path segment.
    pub fn namespace(name: impl Into<String>) -> Self {
        let name = name.into();
        let short = format!("List of '{name}' commands.");
        Self::new(name, Action::Help).short(short)
    }

    pub fn custom<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut Invocation) -> Result<(), CliError> + Send + Sync + 'static,
    {
        Self::new(name, Action::Run(Arc::new(run)))
    }

    pub fn short(mut self, short: impl Into<String>) -> Self {
        self.short = short.into();
        self
    }

    pub fn long(mut self, long: impl Into<String>) -> Self {
        self.long = long.into();
        self
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn short_help(&self) -> &str {
        &self.short
    }

    pub fn long_help(&self) -> &str {
        &self.long
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn api_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    pub fn positional(&self) -> Option<&Positional> {
        self.positional.as_ref()
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    pub fn flag(&self, name: &str) -> Option<&Flag> {
        self.flags.iter().find(|f| f.name == name)
    }

    pub(crate) fn flag_mut(&mut self, name: &str) -> Option<&mut Flag> {
        self.flags.iter_mut().find(|f| f.name == name)
    }

    pub(crate) fn flags_mut(&mut self) -> impl Iterator<Item = &mut Flag> {
        self.flags.iter_mut()
    }

    /// Register `flag` unless one with the same name exists.
    pub(crate) fn push_flag(&mut self, flag: Flag) -> bool {
        if self.flag(&flag.name).is_some() {
            return false;
        }
        self.flags.push(flag);
        true
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn append_help(&mut self, suffix: &str) {
        self.short.push_str(suffix);
        if !self.long.is_empty() {
            self.long.push_str(suffix);
        }
    }

    pub(crate) fn set_usage(&mut self, usage: String) {
        self.usage = Some(usage);
    }

    pub(crate) fn set_positional(&mut self, positional: Positional) {
        self.positional = Some(positional);
    }

    pub(crate) fn add_pre_run(&mut self, hook: Hook) {
        self.pre_run.push(hook);
    }

    pub(crate) fn add_post_run(&mut self, hook: Hook) {
        self.post_run.push(hook);
    }

    /// Render this node (without children) as a clap command.
    pub fn to_clap(&self) -> clap::Command {
        let mut cmd = clap::Command::new(self.name.clone()).about(self.short.clone());
        if !self.long.is_empty() {
            cmd = cmd.long_about(self.long.clone());
        }
        if let Some(usage) = &self.usage {
            cmd = cmd.override_usage(usage.clone());
        }
        if let Some(version) = &self.version {
            cmd = cmd.after_help(format!("API version: {version}"));
        }
        if let Some(pos) = &self.positional {
            cmd = cmd.arg(
                Arg::new(pos.name.clone())
                    .help(pos.help.clone())
                    .required(true)
                    .action(ArgAction::Set),
            );
        }
        for flag in &self.flags {
            cmd = cmd.arg(flag_arg(flag));
        }
        cmd
    }

    /// Build per-run state from what clap matched for this command.
    pub fn invocation(&self, path: Vec<String>, matches: &ArgMatches) -> Result<Invocation, FlagError> {
        let mut flags = self.flags.clone();
        for flag in &mut flags {
            if let Some(raws) = matches.try_get_many::<String>(&flag.name).ok().flatten() {
                for raw in raws {
                    flag.set(raw)?;
                }
            }
        }

        let args = match &self.positional {
            Some(pos) => matches
                .try_get_one::<String>(&pos.name)
                .ok()
                .flatten()
                .cloned()
                .into_iter()
                .collect(),
            None => Vec::new(),
        };

        Ok(Invocation {
            path,
            args,
            flags,
            annotations: BTreeMap::new(),
        })
    }

    /// Run pre hooks, the action, then post hooks.
    pub fn execute(
        &self,
        inv: &mut Invocation,
        client: &dyn ApiClient,
        policy: IndirectionPolicy,
    ) -> Result<(), CliError> {
        for hook in &self.pre_run {
            hook(inv)?;
        }

        match &self.action {
            Action::Help => {}
            Action::Run(run) => run(inv)?,
            Action::Request { service, path } => {
                let body = assemble_body(&inv.flags, policy)?;
                let response = client.post(&ApiRequest {
                    service,
                    path,
                    body,
                })?;
                inv.set_response(&response);
            }
        }

        for hook in &self.post_run {
            hook(inv)?;
        }
        Ok(())
    }
}

fn flag_arg(flag: &Flag) -> Arg {
    let help = match &flag.default {
        Some(default) => merge_descriptions(&flag.description, &format!("Default: {default}.")),
        None => flag.description.clone(),
    };
    let arg = Arg::new(flag.name.clone())
        .long(flag.name.clone())
        .help(help)
        .required(flag.required);

    match flag.kind() {
        FlagKind::Array | FlagKind::Map => arg.action(ArgAction::Append),
        // `--flag` alone means true; an explicit value needs `--flag=false`
        // so the next token stays a positional.
        FlagKind::Boolean => arg
            .action(ArgAction::Set)
            .num_args(0..=1)
            .require_equals(true)
            .default_missing_value("true"),
        FlagKind::Enum => arg
            .action(ArgAction::Set)
            .value_parser(EnumValues(flag.allowed_values().to_vec())),
        _ => arg.action(ArgAction::Set),
    }
}

/// Exposes enum values to clap for help and completion. Validation stays
/// with [`Flag::set`] so `@path` values pass through.
#[derive(Clone)]
struct EnumValues(Vec<String>);

impl TypedValueParser for EnumValues {
    type Value = String;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        arg: Option<&Arg>,
        value: &OsStr,
    ) -> Result<Self::Value, clap::Error> {
        StringValueParser::new().parse_ref(cmd, arg, value)
    }

    fn possible_values(&self) -> Option<Box<dyn Iterator<Item = PossibleValue> + '_>> {
        Some(Box::new(
            self.0
                .iter()
                .filter(|v| !v.is_empty())
                .map(|v| PossibleValue::new(v.clone())),
        ))
    }
}

/// State of one command run, shared by hooks and the action.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Command path without the root name
    pub path: Vec<String>,
    /// Positional arguments
    pub args: Vec<String>,
    pub flags: Vec<Flag>,
    /// Free-form notes passed from hooks to later hooks
    pub annotations: BTreeMap<String, String>,
}

impl Invocation {
    pub fn flag(&self, name: &str) -> Option<&Flag> {
        self.flags.iter().find(|f| f.name == name)
    }

    pub fn flag_mut(&mut self, name: &str) -> Option<&mut Flag> {
        self.flags.iter_mut().find(|f| f.name == name)
    }

    /// Set a flag as if it had been given on the command line.
    pub fn set_flag(&mut self, name: &str, raw: &str) -> Result<(), FlagError> {
        self.flag_mut(name)
            .ok_or_else(|| FlagError::Unknown {
                flag: name.to_string(),
            })?
            .set(raw)
    }

    pub fn set_response(&mut self, response: &Value) {
        self.annotations
            .insert(RESPONSE_ANNOTATION.to_string(), response.to_string());
    }

    pub fn response(&self) -> Result<Option<Value>, CliError> {
        self.annotations
            .get(RESPONSE_ANNOTATION)
            .map(|raw| serde_json::from_str(raw).map_err(CliError::Response))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        requests: Mutex<Vec<(String, String, Value)>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl ApiClient for Recorder {
        fn post(&self, request: &ApiRequest<'_>) -> Result<Value, DispatchError> {
            self.requests.lock().unwrap().push((
                request.service.to_string(),
                request.path.to_string(),
                Value::Object(request.body.clone()),
            ));
            Ok(json!({ "status": "Success" }))
        }
    }

    fn store_command() -> ApiCommand {
        let mut cmd = ApiCommand::request("store", "vault", "/v1/key/store")
            .short("Store a key")
            .version("v1");
        let mut name = Flag::new("name", FlagKind::String).description("Key name");
        name.required = true;
        cmd.push_flag(name);
        cmd.push_flag(Flag::new("tags", FlagKind::Array));
        cmd.push_flag(Flag::new("exportable", FlagKind::Boolean));
        cmd.push_flag(Flag::enumeration(
            "algorithm",
            &["AES".to_string(), "RSA".to_string()],
        ));
        cmd
    }

    fn run(cmd: &ApiCommand, argv: &[&str]) -> Result<Invocation, CliError> {
        let matches = cmd.to_clap().try_get_matches_from(argv)?;
        Ok(cmd.invocation(vec![cmd.name().to_string()], &matches)?)
    }

    #[test]
    fn to_clap_renders_flags() {
        let clap_cmd = store_command().to_clap();
        let names: Vec<_> = clap_cmd
            .get_arguments()
            .map(|a| a.get_id().as_str().to_string())
            .collect();
        assert_eq!(names, ["name", "tags", "exportable", "algorithm"]);

        let name = clap_cmd
            .get_arguments()
            .find(|a| a.get_id() == "name")
            .unwrap();
        assert!(name.is_required_set());

        let mut clap_cmd = clap_cmd;
        clap_cmd.build();
        let algorithm = clap_cmd
            .get_arguments()
            .find(|a| a.get_id() == "algorithm")
            .unwrap();
        let values: Vec<_> = algorithm
            .get_possible_values()
            .iter()
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(values, ["AES", "RSA"]);
    }

    #[test]
    fn invocation_parses_matched_values() {
        let cmd = store_command();
        let inv = run(
            &cmd,
            &[
                "store", "--name", "k1", "--tags", "a,b", "--tags", "c", "--exportable",
                "--algorithm", "AES",
            ],
        )
        .unwrap();

        assert_eq!(inv.flag("name").unwrap().value(), json!("k1"));
        assert_eq!(inv.flag("tags").unwrap().value(), json!(["a", "b", "c"]));
        assert_eq!(inv.flag("exportable").unwrap().value(), json!(true));
        assert_eq!(inv.flag("algorithm").unwrap().value(), json!("AES"));
    }

    #[test]
    fn invocation_rejects_value_outside_enum() {
        let cmd = store_command();
        let err = run(&cmd, &["store", "--name", "k1", "--algorithm", "DES"]).unwrap_err();
        assert!(matches!(err, CliError::Flag(FlagError::InvalidEnum { .. })));
    }

    #[test]
    fn missing_required_flag_is_a_usage_error() {
        let cmd = store_command();
        let err = run(&cmd, &["store"]).unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }

    #[test]
    fn execute_posts_only_set_flags() {
        let cmd = store_command();
        let mut inv = run(&cmd, &["store", "--name", "k1", "--exportable=false"]).unwrap();
        let client = Recorder::new();

        cmd.execute(&mut inv, &client, IndirectionPolicy::Skip).unwrap();

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "vault");
        assert_eq!(requests[0].1, "/v1/key/store");
        assert_eq!(requests[0].2, json!({ "name": "k1", "exportable": false }));
        assert_eq!(inv.response().unwrap(), Some(json!({ "status": "Success" })));
    }

    #[test]
    fn bare_boolean_flag_leaves_positional_alone() {
        let mut cmd = store_command();
        cmd.set_positional(Positional {
            name: "patterns".into(),
            help: "Files to read".into(),
        });

        let inv = run(&cmd, &["store", "--name", "k1", "--exportable", "*.txt"]).unwrap();
        assert_eq!(inv.args, ["*.txt"]);
        assert_eq!(inv.flag("exportable").unwrap().value(), json!(true));

        let inv = run(&cmd, &["store", "--name", "k1", "--exportable=false", "*.txt"]).unwrap();
        assert_eq!(inv.args, ["*.txt"]);
        assert_eq!(inv.flag("exportable").unwrap().value(), json!(false));
    }

    #[test]
    fn execute_runs_hooks_around_action() {
        let mut cmd = ApiCommand::custom("echo", |inv| {
            let order = inv.annotations.entry("order".into()).or_default();
            order.push_str("run,");
            Ok(())
        });
        cmd.add_pre_run(Arc::new(|inv: &mut Invocation| -> Result<(), CliError> {
            inv.annotations.insert("order".into(), "pre,".into());
            Ok(())
        }));
        cmd.add_post_run(Arc::new(|inv: &mut Invocation| -> Result<(), CliError> {
            let order = inv.annotations.entry("order".into()).or_default();
            order.push_str("post");
            Ok(())
        }));

        let mut inv = Invocation::default();
        cmd.execute(&mut inv, &Recorder::new(), IndirectionPolicy::Skip)
            .unwrap();
        assert_eq!(inv.annotations["order"], "pre,run,post");
    }

    #[test]
    fn namespace_has_list_help() {
        let ns = ApiCommand::namespace("key");
        assert_eq!(ns.short_help(), "List of 'key' commands.");
        assert!(matches!(ns.action(), Action::Help));
    }
}
