//! Environment construction for spawned agent processes.
//!
//! The inherited environment is always cleared before spawn. What the child
//! sees is exactly what the [`EnvironmentBuilder`] returns.

use std::collections::BTreeMap;

use crate::config::AgentConfig;
use crate::models::task::TaskConfig;

/// Variable carrying the task identifier into the agent process.
pub const TASK_ID_VAR: &str = "AGENT_CONDUCTOR_TASK_ID";

/// Builds the full environment for one agent process.
pub trait EnvironmentBuilder: Send + Sync {
    /// Variables for the process spawned for `task_id`.
    fn build(&self, task_id: &str, config: &TaskConfig) -> Vec<(String, String)>;
}

/// Passes through an allowlist of host variables, then adds the task id and
/// the task's own variables. Task variables override host values.
#[derive(Debug, Clone)]
pub struct AllowlistEnvironment {
    allowlist: Vec<String>,
}

impl AllowlistEnvironment {
    /// Allow exactly the named host variables.
    #[must_use]
    pub fn new(allowlist: Vec<String>) -> Self {
        Self { allowlist }
    }

    /// Use the allowlist from the agent configuration.
    #[must_use]
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self::new(agent.env_allowlist.clone())
    }

    /// The configured allowlist.
    #[must_use]
    pub fn allowlist(&self) -> &[String] {
        &self.allowlist
    }
}

impl EnvironmentBuilder for AllowlistEnvironment {
    fn build(&self, task_id: &str, config: &TaskConfig) -> Vec<(String, String)> {
        let mut vars = BTreeMap::new();
        for key in &self.allowlist {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.clone(), value);
            }
        }
        for (key, value) in &config.env {
            vars.insert(key.clone(), value.clone());
        }
        vars.insert(TASK_ID_VAR.to_owned(), task_id.to_owned());
        vars.into_iter().collect()
    }
}
