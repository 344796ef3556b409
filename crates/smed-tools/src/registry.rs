// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use smed_model::ToolDef;

use crate::builtin::{BashTool, EditTool, GlobTool, GrepTool, ReadTool, WriteTool};
use crate::tool::{Tool, ToolContext, ToolResultData};

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    /// The six core built-ins.
    pub fn register_defaults(&mut self) {
        self.register(ReadTool);
        self.register(WriteTool);
        self.register(EditTool);
        self.register(BashTool);
        self.register(GlobTool);
        self.register(GrepTool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for every registered tool, sorted by name so schemas are
    /// stable across runs.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// A new registry containing only the named tools; unknown names are
    /// silently omitted.
    pub fn filter(&self, names: &[String]) -> ToolRegistry {
        let mut filtered = ToolRegistry::new();
        for name in names {
            if let Some(tool) = self.tools.get(name) {
                filtered.register_arc(Arc::clone(tool));
            }
        }
        filtered
    }

    /// Dispatch a tool call by name.
    ///
    /// Arguments are validated against the declared schema first. The tool
    /// body runs in its own task so a panic becomes an error result rather
    /// than tearing down the loop.
    pub async fn execute(&self, name: &str, args: Value, ctx: ToolContext) -> ToolResultData {
        let Some(tool) = self.tools.get(name).cloned() else {
            return ToolResultData::error(format!(
                "Unknown tool: '{name}'. Available tools: {:?}",
                self.names()
            ));
        };

        let def = tool.definition();
        if let Err(msg) = validate_args(&def, &args) {
            return ToolResultData::error(msg);
        }

        let handle = tokio::spawn(async move { tool.execute(&args, &ctx).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => ToolResultData::error(format!("Tool error: Panic: {e}")),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate `args` against a tool's declared parameter schema: required
/// parameters present, type tags conforming, enum membership respected.
/// Unknown extra arguments are tolerated.
pub fn validate_args(def: &ToolDef, args: &Value) -> Result<(), String> {
    let object = match args {
        Value::Object(map) => map,
        Value::Null => {
            return if def.parameters.iter().any(|p| p.required) {
                Err(format!(
                    "Invalid arguments for {}: expected an object",
                    def.name
                ))
            } else {
                Ok(())
            };
        }
        _ => {
            return Err(format!(
                "Invalid arguments for {}: expected an object",
                def.name
            ))
        }
    };

    for param in &def.parameters {
        let value = object.get(&param.name);
        match value {
            None | Some(Value::Null) => {
                if param.required {
                    return Err(format!(
                        "Invalid arguments for {}: missing required parameter '{}'",
                        def.name, param.name
                    ));
                }
            }
            Some(v) => {
                if !type_matches(&param.json_type, v) {
                    return Err(format!(
                        "Invalid arguments for {}: parameter '{}' must be of type {}",
                        def.name, param.name, param.json_type
                    ));
                }
                if let (Some(allowed), Some(s)) = (&param.enum_values, v.as_str()) {
                    if !allowed.iter().any(|a| a == s) {
                        return Err(format!(
                            "Invalid arguments for {}: parameter '{}' must be one of {:?}",
                            def.name, param.name, allowed
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

fn type_matches(json_type: &str, value: &Value) -> bool {
    match json_type {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
