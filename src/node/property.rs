use std::collections::HashMap;

/// Extensible named state attached to a node. Properties are kept in
/// registration order and replaced wholesale, never edited in place.
pub trait NodeProperty: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Environment variables this property contributes to commands run on
    /// the agent. Most properties contribute none.
    fn environment(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Injects extra environment variables into every command run on the agent.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentProperty {
    vars: HashMap<String, String>,
}

impl EnvironmentProperty {
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl NodeProperty for EnvironmentProperty {
    fn name(&self) -> &str {
        "environment"
    }

    fn environment(&self) -> HashMap<String, String> {
        self.vars.clone()
    }
}
