//! Tool Catalog (C2, §4.2): a flat, immutable list of [`ToolDefinition`]s
//! loaded from declarative configuration, indexed by name/category/provider.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use ov_domain::tool::ToolDefinition;
use ov_domain::{Error, Result};

#[derive(Debug, Deserialize)]
struct ToolFile {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

/// Loaded once at startup and never mutated; a config reload builds a fresh
/// catalog and swaps it in behind a lock one layer up (§5: "copy-on-write").
pub struct ToolCatalog {
    by_name: HashMap<String, ToolDefinition>,
    by_category: HashMap<String, Vec<String>>,
    by_provider: HashMap<String, Vec<String>>,
}

impl ToolCatalog {
    pub fn from_definitions(tools: Vec<ToolDefinition>) -> Self {
        let mut by_name = HashMap::with_capacity(tools.len());
        let mut by_category: HashMap<String, Vec<String>> = HashMap::new();
        let mut by_provider: HashMap<String, Vec<String>> = HashMap::new();

        for tool in tools {
            by_category.entry(tool.category.clone()).or_default().push(tool.name.clone());
            if let Some(key) = &tool.provider_key {
                by_provider.entry(key.clone()).or_default().push(tool.name.clone());
            }
            by_name.insert(tool.name.clone(), tool);
        }

        Self { by_name, by_category, by_provider }
    }

    /// Load a `tools.toml`-shaped file (top-level `[[tools]]` array).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::configuration(format!("reading tool catalog {}: {e}", path.as_ref().display())))?;
        let file: ToolFile = toml::from_str(&raw).map_err(|e| Error::configuration(format!("parsing tool catalog: {e}")))?;
        Ok(Self::from_definitions(file.tools))
    }

    pub fn get_all(&self) -> Vec<&ToolDefinition> {
        self.by_name.values().collect()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ToolDefinition> {
        self.by_name.get(name)
    }

    pub fn get_by_category(&self, category: &str) -> Vec<&ToolDefinition> {
        self.by_category
            .get(category)
            .map(|names| names.iter().filter_map(|n| self.by_name.get(n)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_provider_key(&self, provider_key: &str) -> Vec<&ToolDefinition> {
        self.by_provider
            .get(provider_key)
            .map(|names| names.iter().filter_map(|n| self.by_name.get(n)).collect())
            .unwrap_or_default()
    }

    pub fn get_input_schema(&self, name: &str) -> Option<Value> {
        self.by_name.get(name).map(|t| t.parameter_schema.to_llm_schema())
    }

    pub fn get_provider_key(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).and_then(|t| t.provider_key.as_deref())
    }

    /// LLM-shape formatting for a caller-chosen subset (§4.2:
    /// "strips non-standard flags").
    pub fn format_for_llm(&self, subset: &[&str]) -> Vec<Value> {
        subset
            .iter()
            .filter_map(|name| self.by_name.get(*name))
            .map(|t| t.to_llm_function())
            .collect()
    }

    /// Validate `args` against `name`'s schema (§4.2: `schema` error kind
    /// enumerating missing/invalid fields).
    pub fn validate(&self, name: &str, args: &Value) -> Result<()> {
        let tool = self.by_name.get(name).ok_or_else(|| Error::configuration(format!("unknown tool '{name}'")))?;
        tool.validate(args)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
