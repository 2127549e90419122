//! Workflow context loading
//!
//! A workflow reference names the agent configuration a call runs under:
//! system instructions, per-node prompt fragments, a voice tag, and an
//! optional greeting. Contexts come from a static table or over HTTP
//! behind the same trait, so the orchestrator never knows which.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Agent configuration for one workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// System instructions for generation
    #[serde(default)]
    pub instructions: String,

    /// Additional prompt fragments from workflow nodes, appended in order
    #[serde(default)]
    pub prompts: Vec<String>,

    /// Voice tag for synthesis and outbound tagging
    #[serde(default)]
    pub voice: Option<String>,

    /// Greeting spoken when the session starts
    #[serde(default)]
    pub greeting: Option<String>,
}

impl WorkflowContext {
    /// Instructions with node prompts flattened in, newline-separated
    #[must_use]
    pub fn flattened_instructions(&self) -> String {
        if self.prompts.is_empty() {
            return self.instructions.clone();
        }

        let mut parts = Vec::with_capacity(self.prompts.len() + 1);
        if !self.instructions.is_empty() {
            parts.push(self.instructions.as_str());
        }
        parts.extend(self.prompts.iter().map(String::as_str));
        parts.join("\n\n")
    }
}

/// Loads workflow contexts by reference
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    /// Load the context for a workflow reference.
    ///
    /// # Errors
    ///
    /// Returns a workflow error when the reference cannot be resolved.
    async fn load(&self, workflow_ref: &str) -> Result<WorkflowContext>;
}

/// In-memory workflow source with an optional catch-all context
#[derive(Debug, Default)]
pub struct StaticWorkflowSource {
    contexts: HashMap<String, WorkflowContext>,
    fallback: Option<WorkflowContext>,
}

impl StaticWorkflowSource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a context under a reference
    #[must_use]
    pub fn with_context(mut self, workflow_ref: &str, context: WorkflowContext) -> Self {
        self.contexts.insert(workflow_ref.to_string(), context);
        self
    }

    /// Set the context served for unknown references
    #[must_use]
    pub fn with_fallback(mut self, context: WorkflowContext) -> Self {
        self.fallback = Some(context);
        self
    }
}

#[async_trait]
impl WorkflowSource for StaticWorkflowSource {
    async fn load(&self, workflow_ref: &str) -> Result<WorkflowContext> {
        if let Some(context) = self.contexts.get(workflow_ref) {
            return Ok(context.clone());
        }
        self.fallback.clone().ok_or_else(|| {
            Error::Workflow(format!("unknown workflow reference '{workflow_ref}'"))
        })
    }
}

/// Workflow source backed by an HTTP service
pub struct HttpWorkflowSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkflowSource {
    /// Create a source against a base URL
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty
    pub fn new(base_url: String) -> Result<Self> {
        if base_url.is_empty() {
            return Err(Error::Config("workflow base URL required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WorkflowSource for HttpWorkflowSource {
    async fn load(&self, workflow_ref: &str) -> Result<WorkflowContext> {
        let url = format!("{}/workflows/{workflow_ref}", self.base_url);
        tracing::debug!(url = %url, "fetching workflow context");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Workflow(format!(
                "workflow fetch failed {status}: {body}"
            )));
        }

        let context: WorkflowContext = response.json().await?;
        Ok(context)
    }
}
