// Tool registry for managing and discovering tools

use super::traits::{Tool, ToolError, ToolResult};
use std::collections::HashMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

/// A registry for managing tools
#[derive(Debug)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    categories: HashMap<String, Vec<String>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            categories: HashMap::new(),
        }
    }
    
    /// Register a tool in the registry
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> ToolResult<()> {
        let metadata = tool.metadata().clone();
        let tool_id = metadata.id.clone();

        // Check if tool already exists
        if self.tools.contains_key(&tool_id) {
            return Err(ToolError::ConfigurationError {
                message: format!("Tool with ID '{}' already registered", tool_id),
            });
        }

        // Register tool
        self.tools.insert(tool_id.clone(), Arc::new(tool));

        // Update categories
        for tag in &metadata.tags {
            self.categories
                .entry(tag.clone())
                .or_insert_with(Vec::new)
                .push(tool_id.clone());
        }

        Ok(())
    }
    
    /// Get a tool by ID
    pub fn get(&self, tool_id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(tool_id).cloned()
    }
    
    /// Check if a tool exists
    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }
    
    /// Get all tool IDs
    pub fn list_tools(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
    
    /// Get tools by category/tag
    pub fn get_by_category(&self, category: &str) -> Vec<Arc<dyn Tool>> {
        self.categories
            .get(category)
            .map(|tool_ids| {
                tool_ids
                    .iter()
                    .filter_map(|id| self.tools.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
    
    /// Get all categories
    pub fn list_categories(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }
    
    /// Search tools by name or description
    pub fn search(&self, query: &str) -> Vec<Arc<dyn Tool>> {
        let query_lower = query.to_lowercase();
        self.tools
            .values()
            .filter(|tool| {
                let metadata = tool.metadata();
                metadata.name.to_lowercase().contains(&query_lower)
                    || metadata.description.to_lowercase().contains(&query_lower)
                    || metadata.tags.iter().any(|tag| tag.to_lowercase().contains(&query_lower))
            })
            .cloned()
            .collect()
    }
    
    /// Remove a tool from the registry
    pub fn unregister(&mut self, tool_id: &str) -> ToolResult<()> {
        if let Some(tool) = self.tools.remove(tool_id) {
            // Remove from categories
            let metadata = tool.metadata();
            for tag in &metadata.tags {
                if let Some(tool_ids) = self.categories.get_mut(tag) {
                    tool_ids.retain(|id| id != tool_id);
                    if tool_ids.is_empty() {
                        self.categories.remove(tag);
                    }
                }
            }
            Ok(())
        } else {
            Err(ToolError::NotFoundError {
                tool_id: tool_id.to_string(),
            })
        }
    }
    
    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_tools: self.tools.len(),
            total_categories: self.categories.len(),
            tools_by_category: self.categories
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
        }
    }
    
    /// Clear all tools from the registry
    pub fn clear(&mut self) {
        self.tools.clear();
        self.categories.clear();
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the tool registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Total number of tools registered
    pub total_tools: usize,
    /// Total number of categories
    pub total_categories: usize,
    /// Number of tools per category
    pub tools_by_category: HashMap<String, usize>,
}

/// Builder for creating and configuring a tool registry
#[derive(Debug)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::new(),
        }
    }
    
    /// Add a tool to the registry
    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> ToolResult<Self> {
        self.registry.register(tool)?;
        Ok(self)
    }
    
    /// Build the final registry
    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
