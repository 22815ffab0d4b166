//! `$ref` resolution over the schema graph.
//!
//! Resolution builds a new graph and never touches the input schema or
//! `components.schemas`, so a failed resolution leaves nothing half-expanded.

use serde::de::DeserializeOwned;

use crate::error::ResolveError;
use crate::spec::{ApiDefinition, Discriminator, Property, Schema};

const SCHEMA_POINTER: &str = "/components/schemas/";

impl ApiDefinition {
    /// Return a copy of `schema` with every reachable `$ref` substituted.
    pub fn resolve(&self, schema: &Schema) -> Result<Schema, ResolveError> {
        Resolver::new(self).schema(schema)
    }
}

struct Resolver<'a> {
    def: &'a ApiDefinition,
    /// Names currently being expanded; a repeat means a cycle.
    active: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(def: &'a ApiDefinition) -> Self {
        Self {
            def,
            active: Vec::new(),
        }
    }

    fn schema(&mut self, schema: &Schema) -> Result<Schema, ResolveError> {
        if let Some(reference) = &schema.reference {
            let name = self.target_name(reference)?;
            let target: Schema = self.lookup(&name)?;
            return self.expand(name, |r| r.schema(&target));
        }

        let mut one_of = Vec::with_capacity(schema.one_of.len());
        for branch in &schema.one_of {
            one_of.push(self.schema(branch)?);
        }
        let mut any_of = Vec::with_capacity(schema.any_of.len());
        for branch in &schema.any_of {
            any_of.push(self.schema(branch)?);
        }
        let discriminator = match &schema.discriminator {
            Some(d) => Some(self.discriminator(d)?),
            None => None,
        };
        let mut properties = schema.properties.clone();
        for (name, prop) in &schema.properties {
            if prop.reference.is_some() {
                properties.insert(name.clone(), self.property(prop)?);
            }
        }

        Ok(Schema {
            reference: None,
            one_of,
            any_of,
            discriminator,
            title: schema.title.clone(),
            description: schema.description.clone(),
            required: schema.required.clone(),
            properties,
        })
    }

    fn discriminator(&mut self, d: &Discriminator) -> Result<Discriminator, ResolveError> {
        let mut mapping = d.mapping.clone();
        for (tag, target) in &d.mapping {
            mapping.insert(tag.clone(), self.schema(target)?);
        }
        Ok(Discriminator {
            property_name: d.property_name.clone(),
            mapping,
        })
    }

    fn property(&mut self, prop: &Property) -> Result<Property, ResolveError> {
        let Some(reference) = &prop.reference else {
            return Ok(prop.clone());
        };
        let name = self.target_name(reference)?;
        let target: Property = self.lookup(&name)?;
        self.expand(name, |r| r.property(&target))
    }

    fn expand<T>(
        &mut self,
        name: String,
        f: impl FnOnce(&mut Self) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        if self.active.contains(&name) {
            return Err(ResolveError::Cycle { name });
        }
        self.active.push(name);
        let out = f(self);
        self.active.pop();
        out
    }

    /// `<document>#/components/schemas/<name>` → `<name>`.
    ///
    /// An empty document part refers to the current document.
    fn target_name(&self, reference: &str) -> Result<String, ResolveError> {
        let unsupported = || ResolveError::UnsupportedPointer {
            reference: reference.to_string(),
        };

        let (document, fragment) = reference.split_once('#').ok_or_else(unsupported)?;
        if !document.is_empty() && document != self.def.url() {
            return Err(ResolveError::ForeignDocument {
                reference: reference.to_string(),
                document: self.def.url().to_string(),
            });
        }

        fragment
            .strip_prefix(SCHEMA_POINTER)
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(str::to_string)
            .ok_or_else(unsupported)
    }

    fn lookup<T: DeserializeOwned>(&self, name: &str) -> Result<T, ResolveError> {
        let raw = self
            .def
            .components
            .schemas
            .get(name)
            .ok_or_else(|| ResolveError::SchemaNotFound {
                name: name.to_string(),
            })?;
        serde_json::from_value(raw.clone()).map_err(|source| ResolveError::InvalidSchema {
            name: name.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::PropertyType;
    use serde_json::{json, Value};

    const URL: &str = "https://vault.example.com/v1/openapi.json";

    fn definition(schemas: Value) -> ApiDefinition {
        let doc = json!({ "components": { "schemas": schemas } });
        ApiDefinition::from_slice(doc.to_string().as_bytes(), URL).unwrap()
    }

    fn schema(value: Value) -> Schema {
        serde_json::from_value(value).unwrap()
    }

    fn sample() -> ApiDefinition {
        definition(json!({
            "Request": {
                "required": ["name"],
                "properties": {
                    "name": { "type": "string" },
                    "algorithm": { "$ref": "#/components/schemas/Algorithm" }
                },
                "oneOf": [
                    { "$ref": "#/components/schemas/Alias" },
                    { "properties": { "id": { "type": "integer" } } }
                ]
            },
            "Alias": { "$ref": "#/components/schemas/Named" },
            "Named": { "properties": { "label": { "type": "string" } } },
            "Algorithm": { "type": "string", "enum": ["AES", "RSA"] },
            "Loop": { "oneOf": [ { "$ref": "#/components/schemas/Loop" } ] }
        }))
    }

    #[test]
    fn resolve_replaces_refs_recursively() {
        let def = sample();
        let resolved = def
            .resolve(&Schema::reference("#/components/schemas/Request"))
            .unwrap();

        assert!(resolved.reference.is_none());
        assert_eq!(resolved.required, vec!["name"]);

        let algorithm = &resolved.properties["algorithm"];
        assert!(algorithm.reference.is_none());
        assert_eq!(algorithm.property_type(), PropertyType::String);
        assert_eq!(algorithm.enum_strings(), vec!["AES", "RSA"]);

        // ref to ref
        assert!(resolved.one_of[0].reference.is_none());
        assert!(resolved.one_of[0].properties.contains_key("label"));
        assert!(resolved.one_of[1].properties.contains_key("id"));
    }

    #[test]
    fn resolve_accepts_full_document_url() {
        let def = sample();
        let resolved = def
            .resolve(&Schema::reference(format!("{URL}#/components/schemas/Named")))
            .unwrap();
        assert!(resolved.properties.contains_key("label"));
    }

    #[test]
    fn resolve_is_idempotent() {
        let def = sample();
        let once = def
            .resolve(&Schema::reference("#/components/schemas/Request"))
            .unwrap();
        let twice = def.resolve(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn resolve_rejects_foreign_document() {
        let def = sample();
        let source = Schema::reference("https://other.example.com/openapi.json#/components/schemas/Named");
        let err = def.resolve(&source).unwrap_err();
        assert!(matches!(err, ResolveError::ForeignDocument { .. }));
        assert!(source.reference.is_some());
    }

    #[test]
    fn resolve_rejects_unsupported_pointer() {
        let def = sample();
        let err = def
            .resolve(&Schema::reference("#/definitions/Named"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedPointer { .. }));
    }

    #[test]
    fn resolve_reports_missing_schema_without_touching_source() {
        let def = sample();
        let source = schema(json!({
            "properties": {
                "ok": { "$ref": "#/components/schemas/Algorithm" },
                "missing": { "$ref": "#/components/schemas/Nope" }
            }
        }));
        let before = source.clone();

        let err = def.resolve(&source).unwrap_err();
        assert!(matches!(err, ResolveError::SchemaNotFound { ref name } if name == "Nope"));
        assert_eq!(source, before);
    }

    #[test]
    fn resolve_detects_cycles() {
        let def = sample();
        let err = def
            .resolve(&Schema::reference("#/components/schemas/Loop"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::Cycle { ref name } if name == "Loop"));
    }

    #[test]
    fn resolve_allows_repeated_non_cyclic_refs() {
        let def = sample();
        let source = schema(json!({
            "anyOf": [
                { "$ref": "#/components/schemas/Named" },
                { "$ref": "#/components/schemas/Named" }
            ]
        }));
        let resolved = def.resolve(&source).unwrap();
        assert_eq!(resolved.any_of[0], resolved.any_of[1]);
    }

    #[test]
    fn resolve_expands_discriminator_mapping() {
        let def = sample();
        let source = schema(json!({
            "discriminator": {
                "propertyName": "kind",
                "mapping": { "named": "#/components/schemas/Alias" }
            }
        }));
        let resolved = def.resolve(&source).unwrap();
        let target = &resolved.discriminator.unwrap().mapping["named"];
        assert!(target.reference.is_none());
        assert!(target.properties.contains_key("label"));
    }
}
