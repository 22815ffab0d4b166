//! OpenAPI definition → typed data model
//!
//! Parses a definition document into `ApiDefinition` and extracts the `post`
//! operations that the command builder consumes. `$ref` pointers are kept as
//! they appear in the document; see [`crate::resolve`].

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::error::LoadError;

pub const APPLICATION_JSON: &str = "application/json";

/// Top-level `status` a service returns instead of its definition when the
/// token is not accepted.
pub const UNAUTHORIZED_STATUS: &str = "Unauthorized";

/// A parsed API definition document.
#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct ApiDefinition {
    #[serde(skip)]
    url: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub paths: BTreeMap<String, PathItem>,
    #[serde(default)]
    pub components: Components,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct Components {
    /// Raw schema documents, decoded on demand by the resolver.
    #[serde(default)]
    pub schemas: BTreeMap<String, Value>,
}

/// Only `post` is consumed; other methods on the same path are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct PathItem {
    #[serde(default)]
    pub post: Option<Operation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct Operation {
    #[serde(rename = "operationId", default)]
    pub operation_id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "requestBody", default)]
    pub request_body: Option<RequestBody>,
    #[serde(default)]
    pub responses: BTreeMap<String, Response>,
    #[serde(rename = "x-ui-schema", alias = "x-pangea-ui-schema", default)]
    pub ui_schema: Option<UiSchema>,
}

impl Operation {
    /// Operations that only configure UI behavior never become commands.
    pub fn is_configuration(&self) -> bool {
        self.ui_schema
            .as_ref()
            .and_then(|ui| ui.is_configuration)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct UiSchema {
    #[serde(rename = "isConfiguration", default)]
    pub is_configuration: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct RequestBody {
    #[serde(default)]
    pub content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct Response {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct MediaType {
    #[serde(default)]
    pub schema: Option<Schema>,
}

/// A node in the reference graph.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[non_exhaustive]
pub struct Schema {
    #[serde(rename = "$ref", default)]
    pub reference: Option<String>,
    #[serde(rename = "oneOf", default)]
    pub one_of: Vec<Schema>,
    #[serde(rename = "anyOf", default)]
    pub any_of: Vec<Schema>,
    #[serde(default)]
    pub discriminator: Option<Discriminator>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
}

impl Schema {
    pub fn reference(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Self::default()
        }
    }
}

/// Tagged union: maps a property's literal value to one alternative schema.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[non_exhaustive]
pub struct Discriminator {
    #[serde(rename = "propertyName", default)]
    pub property_name: String,
    #[serde(default, deserialize_with = "mapping_targets")]
    pub mapping: BTreeMap<String, Schema>,
}

/// Mapping values are bare reference strings in OpenAPI; inline schemas are
/// accepted as well.
fn mapping_targets<'de, D>(deserializer: D) -> Result<BTreeMap<String, Schema>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Target {
        Ref(String),
        Inline(Schema),
    }

    let raw = BTreeMap::<String, Target>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(tag, target)| {
            let schema = match target {
                Target::Ref(r) => Schema::reference(r),
                Target::Inline(s) => s,
            };
            (tag, schema)
        })
        .collect())
}

/// One schema field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[non_exhaustive]
pub struct Property {
    #[serde(rename = "$ref", default)]
    pub reference: Option<String>,
    #[serde(rename = "type", default)]
    pub type_token: Option<TypeToken>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub format: String,
    #[serde(rename = "enum", default)]
    pub enum_values: Vec<Value>,
    #[serde(rename = "const", default)]
    pub const_value: Option<Value>,
}

/// Declared `type` of a property: a single token or a list of tokens.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TypeToken {
    Single(String),
    Multi(Vec<String>),
}

/// The type a property maps to when choosing a flag kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl PropertyType {
    fn from_token(token: &str) -> Self {
        match token {
            "string" => Self::String,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "object" => Self::Object,
            "array" => Self::Array,
            _ => Self::Any,
        }
    }
}

impl Property {
    /// Multi-typed properties are `Any`, except that a lone `"null"` next to
    /// one concrete type only marks the property nullable.
    pub fn property_type(&self) -> PropertyType {
        match &self.type_token {
            None => PropertyType::Any,
            Some(TypeToken::Single(t)) => PropertyType::from_token(t),
            Some(TypeToken::Multi(ts)) => {
                let concrete: Vec<&String> = ts.iter().filter(|t| *t != "null").collect();
                match concrete.as_slice() {
                    [only] => PropertyType::from_token(only),
                    _ => PropertyType::Any,
                }
            }
        }
    }

    /// A string `const` behaves as a single-valued enum.
    pub fn is_const_string(&self) -> bool {
        matches!(self.const_value, Some(Value::String(_)))
    }

    /// String members of `enum` plus a string `const`, in declaration order.
    pub fn enum_strings(&self) -> Vec<String> {
        let mut vals: Vec<String> = self
            .enum_values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if let Some(Value::String(c)) = &self.const_value {
            vals.push(c.clone());
        }
        vals
    }

    pub fn default_string(&self) -> Option<String> {
        self.default
            .as_ref()
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl ApiDefinition {
    /// Parse a definition fetched from `url`. The URL is the document part
    /// that `$ref` pointers must match.
    pub fn from_slice(data: &[u8], url: impl Into<String>) -> Result<Self, LoadError> {
        let mut def: ApiDefinition = serde_json::from_slice(data).map_err(LoadError::Parse)?;
        def.url = url.into();
        Ok(def)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status.as_deref() == Some(UNAUTHORIZED_STATUS)
    }
}

/// A `post` operation ready for command generation.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ApiOperation {
    /// Full endpoint path as declared (e.g. "/v1/key/store")
    pub path: String,
    /// Endpoint path with the version segment removed (e.g. "/key/store")
    pub endpoint: String,
    /// Version segment (e.g. "v1"), if the path has one
    pub version: Option<String>,
    /// operationId from the definition
    pub operation_id: String,
    pub summary: String,
    pub description: String,
    /// Group id, only when exactly one tag is declared
    pub group: Option<String>,
    /// Request body JSON schema, unresolved
    pub body_schema: Option<Schema>,
    /// JSON response schemas by status code, unresolved
    pub response_schemas: BTreeMap<String, Schema>,
}

/// Extract all command-worthy operations from a definition.
pub fn extract_operations(def: &ApiDefinition) -> Vec<ApiOperation> {
    let mut ops = Vec::new();

    for (path, item) in &def.paths {
        let Some(post) = &item.post else {
            continue;
        };
        if post.is_configuration() {
            debug!(path = %path, "Skipping configuration-only operation");
            continue;
        }

        let (version, endpoint) = split_version(path);
        let group = match post.tags.as_slice() {
            [tag] => Some(tag.clone()),
            _ => None,
        };
        let body_schema = post
            .request_body
            .as_ref()
            .and_then(|rb| rb.content.get(APPLICATION_JSON))
            .and_then(|mt| mt.schema.clone());
        let response_schemas = post
            .responses
            .iter()
            .filter_map(|(status, resp)| {
                let schema = resp.content.get(APPLICATION_JSON)?.schema.clone()?;
                Some((status.clone(), schema))
            })
            .collect();

        ops.push(ApiOperation {
            path: path.clone(),
            endpoint,
            version,
            operation_id: post.operation_id.clone(),
            summary: post.summary.clone(),
            description: post.description.clone(),
            group,
            body_schema,
            response_schemas,
        });
    }

    ops
}

/// Split `/v1/key/store` into `(Some("v1"), "/key/store")`.
///
/// Paths with a single segment are unversioned and returned whole.
pub fn split_version(path: &str) -> (Option<String>, String) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.find('/') {
        Some(ndx) if ndx > 0 => (
            Some(trimmed[..ndx].to_string()),
            trimmed[ndx..].to_string(),
        ),
        _ => (None, path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(value: Value) -> ApiDefinition {
        ApiDefinition::from_slice(value.to_string().as_bytes(), "https://svc.example.com/v1/openapi.json")
            .unwrap()
    }

    #[test]
    fn extract_operations_reads_post_only() {
        let def = definition(json!({
            "paths": {
                "/v1/ip/reputation": {
                    "get": { "operationId": "ignored" },
                    "post": {
                        "operationId": "ipReputation",
                        "summary": "Look up an IP",
                        "tags": ["intel"],
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/IpRequest" }
                                }
                            }
                        }
                    }
                },
                "/v1/only/get": {
                    "get": { "operationId": "onlyGet" }
                }
            }
        }));

        let ops = extract_operations(&def);
        assert_eq!(ops.len(), 1);

        let op = &ops[0];
        assert_eq!(op.path, "/v1/ip/reputation");
        assert_eq!(op.endpoint, "/ip/reputation");
        assert_eq!(op.version.as_deref(), Some("v1"));
        assert_eq!(op.operation_id, "ipReputation");
        assert_eq!(op.group.as_deref(), Some("intel"));
        assert_eq!(
            op.body_schema.as_ref().unwrap().reference.as_deref(),
            Some("#/components/schemas/IpRequest")
        );
    }

    #[test]
    fn extract_operations_keeps_json_response_schemas() {
        let def = definition(json!({
            "paths": {
                "/v1/key/store": {
                    "post": {
                        "operationId": "storeKey",
                        "responses": {
                            "200": {
                                "description": "Stored",
                                "content": { "application/json": { "schema": {
                                    "$ref": "#/components/schemas/StoreResult"
                                } } }
                            },
                            "400": {
                                "description": "Bad request",
                                "content": { "text/plain": { "schema": { "type": "string" } } }
                            },
                            "500": { "description": "Server error" }
                        }
                    }
                }
            }
        }));

        let ops = extract_operations(&def);
        let schemas = &ops[0].response_schemas;
        assert_eq!(schemas.len(), 1);
        assert_eq!(
            schemas["200"].reference.as_deref(),
            Some("#/components/schemas/StoreResult")
        );
        assert_eq!(def.paths["/v1/key/store"].post.as_ref().unwrap().responses.len(), 3);
    }

    #[test]
    fn extract_operations_skips_configuration_operations() {
        let def = definition(json!({
            "paths": {
                "/v1/config": {
                    "post": {
                        "operationId": "configure",
                        "x-pangea-ui-schema": { "isConfiguration": true }
                    }
                },
                "/v1/run": {
                    "post": {
                        "operationId": "run",
                        "x-ui-schema": { "isConfiguration": false }
                    }
                }
            }
        }));

        let ops = extract_operations(&def);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operation_id, "run");
    }

    #[test]
    fn extract_operations_group_requires_single_tag() {
        let def = definition(json!({
            "paths": {
                "/v1/a": { "post": { "tags": ["one", "two"] } },
                "/v1/b": { "post": {} }
            }
        }));

        let ops = extract_operations(&def);
        assert!(ops.iter().all(|op| op.group.is_none()));
    }

    #[test]
    fn extract_operations_returns_empty_when_no_paths_key() {
        let def = definition(json!({ "openapi": "3.0.0" }));
        assert!(extract_operations(&def).is_empty());
    }

    #[test]
    fn split_version_variants() {
        assert_eq!(
            split_version("/v1/key/store"),
            (Some("v1".to_string()), "/key/store".to_string())
        );
        assert_eq!(
            split_version("/v2beta/list"),
            (Some("v2beta".to_string()), "/list".to_string())
        );
        assert_eq!(split_version("/health"), (None, "/health".to_string()));
    }

    #[test]
    fn property_type_from_tokens() {
        let prop: Property = serde_json::from_value(json!({ "type": "integer" })).unwrap();
        assert_eq!(prop.property_type(), PropertyType::Integer);

        let prop: Property = serde_json::from_value(json!({ "type": ["string", "null"] })).unwrap();
        assert_eq!(prop.property_type(), PropertyType::String);

        let prop: Property =
            serde_json::from_value(json!({ "type": ["string", "object"] })).unwrap();
        assert_eq!(prop.property_type(), PropertyType::Any);

        let prop: Property = serde_json::from_value(json!({ "description": "untyped" })).unwrap();
        assert_eq!(prop.property_type(), PropertyType::Any);
    }

    #[test]
    fn enum_strings_include_const() {
        let prop: Property = serde_json::from_value(json!({
            "enum": ["a", 1, "b"],
            "const": "c"
        }))
        .unwrap();
        assert_eq!(prop.enum_strings(), vec!["a", "b", "c"]);
        assert!(prop.is_const_string());
    }

    #[test]
    fn discriminator_mapping_accepts_reference_strings() {
        let schema: Schema = serde_json::from_value(json!({
            "discriminator": {
                "propertyName": "type",
                "mapping": {
                    "rsa": "#/components/schemas/Rsa",
                    "inline": { "properties": { "x": { "type": "string" } } }
                }
            }
        }))
        .unwrap();

        let d = schema.discriminator.unwrap();
        assert_eq!(d.property_name, "type");
        assert_eq!(
            d.mapping["rsa"].reference.as_deref(),
            Some("#/components/schemas/Rsa")
        );
        assert!(d.mapping["inline"].properties.contains_key("x"));
    }

    #[test]
    fn unauthorized_status_is_detected() {
        let def = definition(json!({ "status": "Unauthorized" }));
        assert!(def.is_unauthorized());
        assert!(!definition(json!({})).is_unauthorized());
    }
}
