use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Client-generated identifier of a canvas node, stable for one editing session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a node id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Canvas coordinates of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// The seven kinds of node the playbook editor offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Start,
    AiAnalysis,
    AiCompletion,
    Condition,
    DeliverOutput,
    SendEmail,
    Wait,
}

impl NodeKind {
    /// Wire name of the kind, as written into payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::AiAnalysis => "aiAnalysis",
            NodeKind::AiCompletion => "aiCompletion",
            NodeKind::Condition => "condition",
            NodeKind::DeliverOutput => "deliverOutput",
            NodeKind::SendEmail => "sendEmail",
            NodeKind::Wait => "wait",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output formats a deliver-output node can render
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Html,
    Json,
}

/// Kind-specific configuration of a node.
///
/// Every kind owns its typed field set; adding a kind forces every `match`
/// over this enum (payload rendering, attribute extraction) to handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeConfig {
    /// Entry point of the playbook
    Start,

    /// Runs an analysis action against the document context
    #[serde(rename_all = "camelCase")]
    AiAnalysis {
        #[serde(default)]
        action_id: Option<String>,
        #[serde(default)]
        model_deployment_id: Option<String>,
        #[serde(default)]
        prompt_override: Option<String>,
        #[serde(default)]
        output_variable: Option<String>,
    },

    /// Free-form completion with a system prompt
    #[serde(rename_all = "camelCase")]
    AiCompletion {
        #[serde(default)]
        model_deployment_id: Option<String>,
        #[serde(default)]
        system_prompt: Option<String>,
        #[serde(default)]
        temperature: Option<f64>,
        #[serde(default)]
        output_variable: Option<String>,
    },

    /// Branches on an expression over earlier outputs
    #[serde(rename_all = "camelCase")]
    Condition {
        expression: String,
        #[serde(default)]
        description: Option<String>,
    },

    /// Renders accumulated outputs into a deliverable
    #[serde(rename_all = "camelCase")]
    DeliverOutput {
        #[serde(default)]
        template_id: Option<String>,
        #[serde(default)]
        output_format: OutputFormat,
        #[serde(default)]
        include_citations: bool,
    },

    /// Sends a notification email
    #[serde(rename_all = "camelCase")]
    SendEmail {
        #[serde(default)]
        to: Vec<String>,
        subject: String,
        #[serde(default)]
        body_template: Option<String>,
    },

    /// Pauses the playbook for a fixed time
    #[serde(rename_all = "camelCase")]
    Wait { duration_minutes: u32 },
}

impl NodeConfig {
    /// The kind this configuration belongs to
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::Start => NodeKind::Start,
            NodeConfig::AiAnalysis { .. } => NodeKind::AiAnalysis,
            NodeConfig::AiCompletion { .. } => NodeKind::AiCompletion,
            NodeConfig::Condition { .. } => NodeKind::Condition,
            NodeConfig::DeliverOutput { .. } => NodeKind::DeliverOutput,
            NodeConfig::SendEmail { .. } => NodeKind::SendEmail,
            NodeConfig::Wait { .. } => NodeKind::Wait,
        }
    }

    /// Lookup to the analysis action, for kinds that have one
    pub fn action_id(&self) -> Option<&str> {
        match self {
            NodeConfig::AiAnalysis { action_id, .. } => action_id.as_deref(),
            _ => None,
        }
    }

    /// Name of the variable the node publishes its result under
    pub fn output_variable(&self) -> Option<&str> {
        match self {
            NodeConfig::AiAnalysis { output_variable, .. }
            | NodeConfig::AiCompletion { output_variable, .. } => output_variable.as_deref(),
            _ => None,
        }
    }
}

/// Attributes common to every node kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    /// Display label shown on the canvas
    #[serde(default)]
    pub label: String,

    /// Desired skill associations
    #[serde(default)]
    pub skill_ids: BTreeSet<String>,

    /// Desired knowledge-source associations
    #[serde(default)]
    pub knowledge_ids: BTreeSet<String>,

    /// Optional tool lookup
    #[serde(default)]
    pub tool_id: Option<String>,
}

/// A node as the editor hands it over for synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNode {
    pub id: NodeId,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
    pub config: NodeConfig,
}

impl CanvasNode {
    /// Create a node with default position and attributes
    pub fn new(id: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: NodeId::new(id),
            position: Position::default(),
            data: NodeData::default(),
            config,
        }
    }

    /// Set the display label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data.label = label.into();
        self
    }

    /// Set the canvas position
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// Set the desired skill ids
    pub fn with_skills<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data.skill_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the desired knowledge ids
    pub fn with_knowledge<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data.knowledge_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Kind of the node
    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }
}

/// A directed dependency between two canvas nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasEdge {
    pub id: String,
    #[serde(alias = "source")]
    pub source_node_id: NodeId,
    #[serde(alias = "target")]
    pub target_node_id: NodeId,
}

impl CanvasEdge {
    /// Create an edge `source -> target`
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_node_id: NodeId::new(source),
            target_node_id: NodeId::new(target),
        }
    }
}

/// Snapshot of one playbook canvas, as saved by the editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasDocument {
    pub playbook_id: String,
    #[serde(default)]
    pub nodes: Vec<CanvasNode>,
    #[serde(default)]
    pub edges: Vec<CanvasEdge>,
}
