//! Tool registry: explicit name → (descriptor, handler) lookup
//!
//! The registry is filled once at startup and then frozen behind an `Arc`,
//! so lookups during serving need no lock.

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde_json::Value;

use super::handler::ToolHandler;
use super::schema;
use crate::domain::{ConcurrencyClass, DispatchError};

/// Static description of a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub concurrency: ConcurrencyClass,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        concurrency: ConcurrencyClass,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            concurrency,
        }
    }

    /// Descriptor whose input schema is derived from the argument type `T`
    pub fn for_args<T: JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
        concurrency: ConcurrencyClass,
    ) -> Self {
        Self::new(name, description, schema::schema_for::<T>(), concurrency)
    }

    /// Check a request's arguments against the input schema
    pub fn validate(&self, arguments: &Value) -> Result<(), DispatchError> {
        schema::validate(&self.input_schema, arguments).map_err(DispatchError::schema)
    }
}

/// A descriptor together with the handler that implements it
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names must be unique
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), DispatchError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(DispatchError::DuplicateTool { name: descriptor.name });
        }
        self.tools
            .insert(descriptor.name.clone(), RegisteredTool { descriptor, handler });
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredTool, DispatchError> {
        self.tools.get(name).ok_or_else(|| DispatchError::UnknownTool {
            name: name.to_string(),
        })
    }

    /// All descriptors, sorted by name
    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        let mut descriptors: Vec<_> = self.tools.values().map(|t| &t.descriptor).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
