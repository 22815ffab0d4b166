//! Resolved schema → command flags
//!
//! Walks a request-body schema and registers one flag per property on the
//! command, following `oneOf`/`anyOf` branches.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::command::ApiCommand;
use crate::flag::{Flag, FlagKind};
use crate::spec::{Property, PropertyType, Schema};

/// Summaries shorter than this are replaced by the first description line.
const MIN_SUMMARY_LEN: usize = 30;

/// Property names clap reserves for itself.
const RESERVED_FLAGS: &[&str] = &["help"];

/// Add flags for every property of `schema` and its alternative branches.
///
/// `required` is honored only at the top level: a `oneOf`/`anyOf` member is
/// optional relative to the whole body.
pub fn add_schema_flags(cmd: &mut ApiCommand, schema: &Schema, top_level: bool) {
    for (name, prop) in &schema.properties {
        add_property_flag(cmd, name, prop);
    }

    if top_level {
        for name in &schema.required {
            match cmd.flag_mut(name) {
                Some(flag) => flag.required = true,
                None => debug!(command = %cmd.name(), flag = %name, "Required property has no flag"),
            }
        }
    }

    for branch in &schema.one_of {
        add_schema_flags(cmd, branch, false);
    }
    for branch in &schema.any_of {
        add_schema_flags(cmd, branch, false);
    }
}

fn add_property_flag(cmd: &mut ApiCommand, name: &str, prop: &Property) {
    if RESERVED_FLAGS.contains(&name) {
        debug!(command = %cmd.name(), flag = %name, "Skipping reserved flag name");
        return;
    }

    let ptype = prop.property_type();
    let description = clean_format(&prop.description);

    if ptype == PropertyType::String || prop.is_const_string() {
        let values = prop.enum_strings();
        if !values.is_empty() {
            merge_enum_flag(cmd, name, &values, &description);
            return;
        }
    }

    // First registration wins for everything but enums.
    if cmd.flag(name).is_some() {
        debug!(command = %cmd.name(), flag = %name, "Flag already registered");
        return;
    }

    let (kind, hint) = match ptype {
        PropertyType::String if prop.format == "byte" => (FlagKind::Base64, None),
        PropertyType::String => (FlagKind::String, None),
        PropertyType::Integer => (FlagKind::Integer, None),
        PropertyType::Boolean => (FlagKind::Boolean, None),
        PropertyType::Object => (
            FlagKind::Map,
            Some(format!("CLI use: '--{name} key1:value1,key2:value2'.")),
        ),
        PropertyType::Array => (
            FlagKind::Array,
            Some(format!("CLI use: '--{name} value1,value2'.")),
        ),
        PropertyType::Any => (FlagKind::Any, None),
    };

    let description = match hint {
        Some(hint) => merge_descriptions(&description, &hint),
        None => description,
    };
    let mut flag = Flag::new(name, kind).description(description);
    flag.default = prop
        .default_string()
        .or_else(|| prop.default.as_ref().map(|v| v.to_string()));
    cmd.push_flag(flag);
}

fn merge_enum_flag(cmd: &mut ApiCommand, name: &str, values: &[String], description: &str) {
    let command = cmd.name().to_string();
    match cmd.flag_mut(name) {
        Some(flag) if flag.kind() == FlagKind::Enum => {
            flag.add_values(values);
            if !description.is_empty() && !flag.description.contains(description) {
                flag.description = merge_descriptions(&flag.description, description);
            }
        }
        Some(flag) => debug!(
            command = %command,
            flag = %name,
            kind = flag.kind().as_str(),
            "Enum values dropped for flag registered under another kind"
        ),
        None => {
            cmd.push_flag(Flag::enumeration(name, values).description(description));
        }
    }
}

/// Join two descriptions into sentences: `"a"` + `"b"` → `"a. b"`.
pub fn merge_descriptions(old: &str, new: &str) -> String {
    let old = old.trim();
    let new = new.trim();
    match (old.is_empty(), new.is_empty()) {
        (true, _) => new.to_string(),
        (false, true) => old.to_string(),
        (false, false) if old.ends_with('.') => format!("{old} {new}"),
        (false, false) => format!("{old}. {new}"),
    }
}

/// Short help: the summary, unless it is too terse to be useful.
pub fn short_help(summary: &str, description: &str) -> String {
    let first_line = description.lines().next().unwrap_or("").trim();
    if summary.chars().count() < MIN_SUMMARY_LEN && !first_line.is_empty() {
        clean_format(first_line)
    } else {
        clean_format(summary)
    }
}

static MD_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static MD_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static MD_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}(#{1,6}|>)\s*").expect("valid regex"));
static MD_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\*\*|__|\*|`)([^*`]+?)(\*\*|__|\*|`)").expect("valid regex"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Strip Markdown then HTML markup, leaving plain text.
pub fn clean_format(input: &str) -> String {
    let text = MD_IMAGE.replace_all(input, "$1");
    let text = MD_LINK.replace_all(&text, "$1");
    let text = MD_HEADING.replace_all(&text, "");
    let text = MD_EMPHASIS.replace_all(&text, "$2");
    let text = HTML_TAG.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    BLANK_LINES.replace_all(text.trim(), "\n\n").into_owned()
}
