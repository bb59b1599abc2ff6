//! External collaborator contracts
//!
//! Narrow async trait seams over everything the pipeline does not own: the
//! text-generation model, the validator/deployer, the remote script store,
//! the session runtime used by the health probe, and the fire-and-forget
//! exporter and brand-asset services. Every call site bounds these with the
//! configured timeout; a timeout is an ordinary failure, not a special case.

use crate::config::DeployCredentials;
use async_trait::async_trait;
use flowforge_graph::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Transport-level failures from any collaborator
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Network or service failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Call exceeded its bounded timeout
    #[error("call timed out")]
    Timeout,

    /// Credential rejected by the collaborator
    #[error("unauthorized")]
    Unauthorized,

    /// Response could not be interpreted
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Await a collaborator call under the configured bound.
///
/// # Errors
/// Maps an elapsed timer to [`RemoteError::Timeout`]; other errors pass
/// through unchanged.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, RemoteError>
where
    F: std::future::Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout),
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    /// Development sandbox
    Development,
    /// Staging
    Staging,
    /// Production
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Where a graph is validated and deployed
#[derive(Debug, Clone)]
pub struct DeployTarget {
    /// Target bot/product identifier
    pub target_id: String,
    /// Deployment environment
    pub environment: Environment,
    /// Deployment credential
    pub credentials: DeployCredentials,
}

/// Request handed to the generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Natural-language product description
    pub description: String,
    /// Product name, used for naming and brand lookup
    pub product_name: String,
    /// Extra context for the generator, if any
    pub context: Option<String>,
}

impl GenerationRequest {
    /// Create a request
    #[inline]
    #[must_use]
    pub fn new(description: impl Into<String>, product_name: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            product_name: product_name.into(),
            context: None,
        }
    }

    /// Attach generator context
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// A candidate flow returned by the generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFlow {
    /// Tabular graph text
    pub graph_text: String,
    /// Node count the generator claims
    pub node_count: usize,
    /// Custom scripts authored alongside the graph, by identifier
    pub custom_scripts: HashMap<String, String>,
}

/// Authors candidate graphs from natural language.
#[async_trait]
pub trait FlowGenerator: Send + Sync {
    /// Generate a fresh candidate flow
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedFlow, RemoteError>;

    /// Revise a prior graph following a repair instruction
    async fn revise(
        &self,
        request: &GenerationRequest,
        prior_graph: &str,
        instruction: &str,
    ) -> Result<GeneratedFlow, RemoteError>;
}

/// Validator/deployer verdict on a submitted graph
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    /// Graph accepted; carries the deployment/version id
    Accepted {
        /// Deployment or version identifier
        deployment_id: String,
    },
    /// Graph rejected node-by-node
    Rejected(Vec<ValidationError>),
    /// Credential expired or rejected - distinct from validation failure
    AuthenticationFailed,
}

/// Validates and deploys graphs.
#[async_trait]
pub trait FlowDeployer: Send + Sync {
    /// Submit a graph for validation only
    async fn validate(
        &self,
        graph_text: &str,
        target: &DeployTarget,
    ) -> Result<ValidationOutcome, RemoteError>;

    /// Deploy a graph together with its script bundle
    async fn deploy(
        &self,
        graph_text: &str,
        scripts: &HashMap<String, String>,
        target: &DeployTarget,
    ) -> Result<ValidationOutcome, RemoteError>;

    /// Provision the chat widget for a deployment; returns the widget id
    async fn provision_widget(
        &self,
        deployment_id: &str,
        target: &DeployTarget,
    ) -> Result<String, RemoteError>;
}

/// Remote script storage, consulted only for bundle misses.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Fetch a script source by identifier; `None` when absent
    async fn fetch(&self, name: &str) -> Result<Option<String>, RemoteError>;
}

/// Who authored a session message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageAuthor {
    /// The deployed bot
    Bot,
    /// The probing client
    User,
    /// Platform/system notices
    System,
}

/// One message in a conversation snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Message author
    pub author: MessageAuthor,
    /// Message text
    pub text: String,
}

/// Snapshot of a conversation's messages so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    /// Messages in arrival order
    pub messages: Vec<SessionMessage>,
}

/// Anonymous runtime sessions against a deployed widget.
#[async_trait]
pub trait SessionRuntime: Send + Sync {
    /// Open an anonymous session; returns the session id
    async fn create_session(&self, widget_id: &str) -> Result<String, RemoteError>;

    /// Start a conversation in the session
    async fn start_conversation(&self, session_id: &str) -> Result<(), RemoteError>;

    /// Fetch the current message snapshot
    async fn snapshot(&self, session_id: &str) -> Result<MessageSnapshot, RemoteError>;

    /// End the conversation
    async fn end_conversation(&self, session_id: &str) -> Result<(), RemoteError>;
}

/// Spreadsheet export, fire-and-forget from the pipeline's perspective.
#[async_trait]
pub trait SheetExporter: Send + Sync {
    /// Export the graph; returns a link to the sheet
    async fn export(&self, graph_text: &str, title: &str) -> Result<String, RemoteError>;
}

/// Brand-asset lookup, fire-and-forget from the pipeline's perspective.
#[async_trait]
pub trait BrandAssetLookup: Send + Sync {
    /// Look up a product's logo URL, if known
    async fn logo_url(&self, product_name: &str) -> Result<Option<String>, RemoteError>;
}
