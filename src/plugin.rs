//! Commands derived from the built tree.
//!
//! A [`Plugin`] runs after all services are loaded. It reads commands from the
//! tree, adapts copies through [`CommandPatch`] and hands back new
//! registrations.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::command::{ApiCommand, Hook, Invocation, Positional};
use crate::error::{CliError, PluginError};
use crate::flag::{split_csv, Flag, FlagKind};
use crate::tree::CommandTree;

/// A command to add to the tree at `path`.
#[derive(Debug, Clone)]
pub struct Registration {
    pub path: Vec<String>,
    pub command: ApiCommand,
}

pub trait Plugin {
    fn name(&self) -> &str;

    /// Service this plugin builds on. The plugin is skipped when that service
    /// did not load.
    fn service(&self) -> Option<&str> {
        None
    }

    fn commands(&self, tree: &CommandTree) -> Result<Vec<Registration>, PluginError>;
}

/// Plugins shipped with the binary.
///
/// The file-pattern command is attached to the file reputation endpoint
/// wherever the version layout and naming strategy put it.
pub fn builtin_plugins() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(Base64Plugin),
        Box::new(FilePatternPlugin::endpoint_hashes(
            "file-intel",
            "/v2/reputation",
            "hashes",
        )),
    ]
}

/// Narrow mutation API over a copy of a tree command.
#[derive(Debug, Clone)]
pub struct CommandPatch {
    command: ApiCommand,
}

impl CommandPatch {
    pub fn new(command: ApiCommand) -> Self {
        Self { command }
    }

    pub fn from_tree<S: AsRef<str>>(tree: &CommandTree, path: &[S]) -> Result<Self, PluginError> {
        tree.get_command(path)
            .map(Self::new)
            .ok_or_else(|| PluginError::BaseMissing {
                path: path
                    .iter()
                    .map(AsRef::as_ref)
                    .collect::<Vec<_>>()
                    .join(" "),
            })
    }

    pub fn flag(&self, name: &str) -> Option<&Flag> {
        self.command.flag(name)
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.command.set_name(name.into());
        self
    }

    pub fn append_help(mut self, suffix: &str) -> Self {
        self.command.append_help(suffix);
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.command.set_usage(usage.into());
        self
    }

    pub fn positional(mut self, name: impl Into<String>, help: impl Into<String>) -> Self {
        self.command.set_positional(Positional {
            name: name.into(),
            help: help.into(),
        });
        self
    }

    pub fn add_flag(mut self, flag: Flag) -> Self {
        if !self.command.push_flag(flag) {
            debug!(command = %self.command.name(), "Flag already present");
        }
        self
    }

    /// Drop every `required` marking.
    pub fn optional_flags(mut self) -> Self {
        for flag in self.command.flags_mut() {
            flag.required = false;
        }
        self
    }

    pub fn pre_run(mut self, hook: Hook) -> Self {
        self.command.add_pre_run(hook);
        self
    }

    pub fn post_run(mut self, hook: Hook) -> Self {
        self.command.add_post_run(hook);
        self
    }

    pub fn finish(self) -> ApiCommand {
        self.command
    }
}

/// `utils base64 encode|decode <value>`
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Plugin;

impl Plugin for Base64Plugin {
    fn name(&self) -> &str {
        "base64"
    }

    fn commands(&self, _tree: &CommandTree) -> Result<Vec<Registration>, PluginError> {
        let path = |name: &str| vec!["utils".to_string(), "base64".to_string(), name.to_string()];

        let encode = ApiCommand::custom("encode", |inv| {
            let input = first_arg(inv)?;
            inv.set_response(&Value::String(BASE64.encode(input.as_bytes())));
            Ok(())
        })
        .short("Encode a value to base64");
        let decode = ApiCommand::custom("decode", |inv| {
            let input = first_arg(inv)?;
            let bytes = BASE64
                .decode(input.trim())
                .map_err(|e| CliError::Command(format!("invalid base64 input: {e}")))?;
            let text = String::from_utf8(bytes)
                .map_err(|e| CliError::Command(format!("decoded value is not UTF-8: {e}")))?;
            inv.set_response(&Value::String(text));
            Ok(())
        })
        .short("Decode a base64 value");

        Ok(vec![
            Registration {
                path: vec!["utils".to_string(), "base64".to_string()],
                command: ApiCommand::namespace("base64").short("Base64 functions"),
            },
            Registration {
                path: path("encode"),
                command: CommandPatch::new(encode)
                    .positional("value", "Value to encode")
                    .finish(),
            },
            Registration {
                path: path("decode"),
                command: CommandPatch::new(decode)
                    .positional("value", "Value to decode")
                    .finish(),
            },
        ])
    }
}

fn first_arg(inv: &Invocation) -> Result<String, CliError> {
    inv.args
        .first()
        .cloned()
        .ok_or_else(|| CliError::Command("missing value argument".into()))
}

/// Computes one value per matched file, e.g. its hash.
pub type FileValues = fn(&mut Invocation, &[PathBuf]) -> Result<BTreeMap<String, String>, CliError>;

/// Re-keys the response by file, given the file → value map.
pub type Aggregate = fn(&BTreeMap<String, String>, &Value) -> Result<Value, CliError>;

/// Name of the derived command.
pub const FILE_PATTERN_COMMAND: &str = "file-pattern";
const FILE_VALUES_ANNOTATION: &str = "file_values";
const HASH_TYPE_FLAG: &str = "hash_type";
const DEFAULT_HASH_TYPE: &str = "sha256";

/// How a plugin finds the command it builds on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseCommand {
    /// Fixed tree path.
    Path(Vec<String>),
    /// The request command that POSTs to `path` on `service`.
    Endpoint { service: String, path: String },
}

impl BaseCommand {
    fn locate(&self, tree: &CommandTree) -> Result<(Vec<String>, CommandPatch), PluginError> {
        match self {
            Self::Path(path) => Ok((path.clone(), CommandPatch::from_tree(tree, path)?)),
            Self::Endpoint { service, path } => tree
                .find_request(service, path)
                .map(|(at, cmd)| (at, CommandPatch::new(cmd.clone())))
                .ok_or_else(|| PluginError::BaseMissing {
                    path: format!("{service} {path}"),
                }),
        }
    }
}

/// Derives `<base> file-pattern "<glob>,<glob>"` from a command whose array
/// flag takes per-file values.
#[derive(Debug, Clone)]
pub struct FilePatternPlugin {
    base: BaseCommand,
    flag: String,
    service: Option<String>,
    values: FileValues,
    aggregate: Option<Aggregate>,
}

impl FilePatternPlugin {
    pub fn new(base: &[&str], flag: impl Into<String>, values: FileValues) -> Self {
        Self::with_base(
            BaseCommand::Path(base.iter().map(|s| s.to_string()).collect()),
            flag,
            values,
        )
    }

    /// Builds on the command for `path` on `service`, and only runs when that
    /// service loaded.
    pub fn at_endpoint(
        service: impl Into<String>,
        path: impl Into<String>,
        flag: impl Into<String>,
        values: FileValues,
    ) -> Self {
        let service = service.into();
        Self::with_base(
            BaseCommand::Endpoint {
                service: service.clone(),
                path: path.into(),
            },
            flag,
            values,
        )
        .for_service(service)
    }

    fn with_base(base: BaseCommand, flag: impl Into<String>, values: FileValues) -> Self {
        Self {
            base,
            flag: flag.into(),
            service: None,
            values,
            aggregate: None,
        }
    }

    /// Hash matched files and report the API result per file.
    pub fn file_hashes(base: &[&str], flag: impl Into<String>) -> Self {
        Self::new(base, flag, hash_files).aggregate(results_by_file)
    }

    /// [`file_hashes`](Self::file_hashes) located by endpoint.
    pub fn endpoint_hashes(
        service: impl Into<String>,
        path: impl Into<String>,
        flag: impl Into<String>,
    ) -> Self {
        Self::at_endpoint(service, path, flag, hash_files).aggregate(results_by_file)
    }

    pub fn for_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }
}

impl Plugin for FilePatternPlugin {
    fn name(&self) -> &str {
        FILE_PATTERN_COMMAND
    }

    fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    fn commands(&self, tree: &CommandTree) -> Result<Vec<Registration>, PluginError> {
        let (base_path, patch) = self.base.locate(tree)?;
        let flag = patch.flag(&self.flag).ok_or_else(|| PluginError::FlagMissing {
            flag: self.flag.clone(),
        })?;
        if flag.kind() != FlagKind::Array {
            return Err(PluginError::FlagKind {
                flag: self.flag.clone(),
                expected: FlagKind::Array.as_str(),
                found: flag.kind().as_str(),
            });
        }

        let mut path = base_path;
        path.push(FILE_PATTERN_COMMAND.to_string());
        let usage = format!("{} \"*.txt,*.json,prefix*\" [OPTIONS]", path.join(" "));

        let flag_name = self.flag.clone();
        let values = self.values;
        let pre: Hook = Arc::new(move |inv: &mut Invocation| -> Result<(), CliError> {
            let patterns = inv
                .args
                .first()
                .cloned()
                .ok_or_else(|| CliError::Command("missing file patterns".into()))?;
            let files = expand_patterns(&patterns)?;
            if files.is_empty() {
                return Err(CliError::Command("no files match given pattern".into()));
            }

            let file_values = values(inv, &files)?;
            let items: BTreeSet<String> = file_values.values().cloned().collect();
            let flag = inv.flag_mut(&flag_name).ok_or_else(|| {
                CliError::Command(format!("`{flag_name}` does not exist in base command"))
            })?;
            flag.replace_items(items.into_iter().collect());

            let encoded = serde_json::to_string(&file_values).map_err(CliError::Response)?;
            inv.annotations
                .insert(FILE_VALUES_ANNOTATION.to_string(), encoded);
            Ok(())
        });

        let mut patch = patch
            .rename(FILE_PATTERN_COMMAND)
            .append_help(" Using file pattern.")
            .optional_flags()
            .positional("patterns", "Comma-separated file patterns")
            .usage(usage)
            .pre_run(pre);

        if let Some(aggregate) = self.aggregate {
            let post: Hook = Arc::new(move |inv: &mut Invocation| -> Result<(), CliError> {
                let Some(response) = inv.response()? else {
                    return Ok(());
                };
                let file_values: BTreeMap<String, String> = inv
                    .annotations
                    .get(FILE_VALUES_ANNOTATION)
                    .map(|raw| serde_json::from_str(raw))
                    .transpose()
                    .map_err(CliError::Response)?
                    .unwrap_or_default();
                let output = aggregate(&file_values, &response)?;
                inv.set_response(&output);
                Ok(())
            });
            patch = patch.post_run(post);
        }

        Ok(vec![Registration {
            path,
            command: patch.finish(),
        }])
    }
}

/// SHA-256 of each file. A `hash_type` flag, when present, must be `sha256`.
pub fn hash_files(
    inv: &mut Invocation,
    files: &[PathBuf],
) -> Result<BTreeMap<String, String>, CliError> {
    if let Some(flag) = inv.flag(HASH_TYPE_FLAG) {
        if flag.is_set() {
            let hash_type = flag.render();
            if hash_type != DEFAULT_HASH_TYPE {
                return Err(CliError::Command(format!(
                    "`{hash_type}` not supported on file pattern command"
                )));
            }
        } else {
            inv.set_flag(HASH_TYPE_FLAG, DEFAULT_HASH_TYPE)?;
        }
    }

    let mut hashes = BTreeMap::new();
    for file in files {
        let data = std::fs::read(file).map_err(|source| CliError::Io {
            path: file.display().to_string(),
            source,
        })?;
        hashes.insert(
            file.display().to_string(),
            hex::encode(Sha256::digest(&data)),
        );
    }
    Ok(hashes)
}

/// `{file: {hash, result}}` from a response whose `data` object is keyed by
/// hash, either at the top level or under `result`.
pub fn results_by_file(
    file_hashes: &BTreeMap<String, String>,
    response: &Value,
) -> Result<Value, CliError> {
    let data = response
        .pointer("/result/data")
        .or_else(|| response.get("data"))
        .and_then(Value::as_object)
        .ok_or_else(|| CliError::Command("unable to process `data` field".into()))?;

    let mut out = Map::new();
    for (file, hash) in file_hashes {
        if let Some(result) = data.get(hash) {
            out.insert(
                file.clone(),
                serde_json::json!({ "hash": hash, "result": result }),
            );
        }
    }
    Ok(Value::Object(out))
}

/// Expand comma-separated glob patterns into the sorted, de-duplicated set of
/// matching files.
pub fn expand_patterns(raw: &str) -> Result<Vec<PathBuf>, CliError> {
    let mut files = BTreeSet::new();
    for pattern in split_csv("patterns", raw)? {
        let pattern = expand_home(pattern.trim());
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern).map_err(|e| {
            CliError::Command(format!("invalid file pattern {pattern}: {e}"))
        })?;
        files.extend(paths.filter_map(Result::ok).filter(|p| p.is_file()));
    }
    Ok(files.into_iter().collect())
}

fn expand_home(pattern: &str) -> PathBuf {
    match (pattern.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(pattern),
    }
}
