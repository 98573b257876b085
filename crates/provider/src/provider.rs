//! The resource-creation trait and its request/response payloads.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use gantry_core::ResourceKey;
use serde_json::Value;

use crate::context::ProviderContext;
use crate::error::ProviderError;

/// Everything a provider needs to create one resource.
///
/// Inputs are fully resolved by the time a request is built, so they may
/// contain secret material. The `Debug` rendering therefore shows input
/// names only, never values.
#[derive(Clone)]
pub struct CreateRequest {
    /// The resource to create.
    pub key: ResourceKey,
    /// Resolved inputs, keyed by input name.
    pub inputs: BTreeMap<String, Value>,
    /// Output ports the caller expects this creation to fill.
    pub exports: Vec<String>,
}

impl CreateRequest {
    /// Looks up a required string input.
    ///
    /// The error never embeds the value itself; inputs can carry secrets.
    pub fn string_input(&self, name: &str) -> Result<&str, ProviderError> {
        match self.inputs.get(name) {
            Some(Value::String(value)) => Ok(value),
            Some(other) => Err(ProviderError::InvalidInput {
                resource: self.key.clone(),
                input: name.to_owned(),
                reason: format!("expected a string, got {}", value_kind(other)),
            }),
            None => Err(ProviderError::InvalidInput {
                resource: self.key.clone(),
                input: name.to_owned(),
                reason: "missing".to_owned(),
            }),
        }
    }
}

impl fmt::Debug for CreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateRequest")
            .field("key", &self.key)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("exports", &self.exports)
            .finish()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The provider's answer: one value per requested output port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedResource {
    /// Values keyed by port name.
    ///
    /// A port the caller requested but the provider did not return fails the
    /// node; extra ports are ignored.
    pub outputs: BTreeMap<String, Value>,
}

impl CreatedResource {
    /// An empty result, for resources without output ports.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one output port value.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}

/// Creates infrastructure objects from fully resolved inputs.
///
/// Implementations are shared across concurrent node tasks as
/// `Arc<dyn Provider>`, so creation must be safe to call from many tasks at
/// once.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A short backend name for logs.
    fn name(&self) -> &str;

    /// Creates one resource and returns its output port values.
    async fn create(
        &self,
        ctx: &ProviderContext,
        request: CreateRequest,
    ) -> Result<CreatedResource, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request() -> CreateRequest {
        CreateRequest {
            key: "azure:sql:Server::db".parse().unwrap(),
            inputs: BTreeMap::from([
                ("location".to_owned(), json!("westeurope")),
                ("admin_password".to_owned(), json!("hunter2hunter2!!")),
            ]),
            exports: vec!["fqdn".to_owned()],
        }
    }

    #[test]
    fn debug_lists_input_names_without_values() {
        let rendered = format!("{:?}", request());
        assert!(rendered.contains("admin_password"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("westeurope"));
    }

    #[test]
    fn string_input_distinguishes_missing_from_mistyped() {
        let mut req = request();
        assert_eq!(req.string_input("location").unwrap(), "westeurope");

        let err = req.string_input("sku").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput { ref input, .. } if input == "sku"));

        req.inputs.insert("sku".to_owned(), json!(3));
        let err = req.string_input("sku").unwrap_err();
        assert!(
            matches!(err, ProviderError::InvalidInput { ref reason, .. } if reason.contains("expected a string"))
        );
    }

    #[test]
    fn created_resource_collects_outputs() {
        let created = CreatedResource::new()
            .with_output("fqdn", "db.database.sim")
            .with_output("name", "db");
        assert_eq!(created.outputs.len(), 2);
        assert_eq!(created.outputs["fqdn"], json!("db.database.sim"));
    }
}
