use crate::domain::canvas::{CanvasNode, NodeConfig, NodeId, NodeKind};
use crate::domain::identity::CORRELATION_KEY;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Store-assigned identifier of a persisted node record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Borrow the raw id
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of the playbook that contains a set of node records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybookId(pub String);

impl fmt::Display for PlaybookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A many-to-many association dimension of a node record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    /// Skills the node may use
    Skills,
    /// Knowledge sources the node may read
    Knowledge,
}

impl Relation {
    /// Every relation dimension, in sync order
    pub const ALL: [Relation; 2] = [Relation::Skills, Relation::Knowledge];

    /// Stable name used in logs and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Skills => "skills",
            Relation::Knowledge => "knowledge",
        }
    }

    /// Desired members of this relation for a canvas node
    pub fn desired<'a>(&self, node: &'a CanvasNode) -> &'a BTreeSet<String> {
        match self {
            Relation::Skills => &node.data.skill_ids,
            Relation::Knowledge => &node.data.knowledge_ids,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote representation of a canvas node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedNodeRecord {
    pub id: RecordId,
    pub execution_order: u32,
    /// Serialized configuration consumed by the execution engine
    pub payload: String,
    /// Explicit correlation to the originating canvas node; absent on legacy records
    #[serde(default)]
    pub client_ref: Option<String>,
    #[serde(default)]
    pub skill_ids: BTreeSet<String>,
    #[serde(default)]
    pub knowledge_ids: BTreeSet<String>,
    /// JSON array of upstream record ids, `None` when the node has no dependencies
    #[serde(default)]
    pub depends_on: Option<String>,
}

impl PersistedNodeRecord {
    /// Currently associated ids for a relation
    pub fn associated(&self, relation: Relation) -> &BTreeSet<String> {
        match relation {
            Relation::Skills => &self.skill_ids,
            Relation::Knowledge => &self.knowledge_ids,
        }
    }

    /// Mutable access to the associated ids for a relation
    pub fn associated_mut(&mut self, relation: Relation) -> &mut BTreeSet<String> {
        match relation {
            Relation::Skills => &mut self.skill_ids,
            Relation::Knowledge => &mut self.knowledge_ids,
        }
    }

    /// Decoded dependency list; an unparsable value reads as empty
    pub fn dependency_ids(&self) -> Vec<RecordId> {
        self.depends_on
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .map(|ids| ids.into_iter().map(RecordId).collect())
            .unwrap_or_default()
    }
}

/// Scalar and lookup columns written alongside the payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributes {
    pub name: String,
    pub node_type: NodeKind,
    pub position_x: f64,
    pub position_y: f64,
    pub action_id: Option<String>,
    pub tool_id: Option<String>,
    pub output_variable: Option<String>,
}

impl NodeAttributes {
    /// Extract the columns of a canvas node
    pub fn from_node(node: &CanvasNode) -> Self {
        Self {
            name: node.data.label.clone(),
            node_type: node.kind(),
            position_x: node.position.x,
            position_y: node.position.y,
            action_id: node.config.action_id().map(str::to_string),
            tool_id: node.data.tool_id.clone(),
            output_variable: node.config.output_variable().map(str::to_string),
        }
    }
}

/// Body of a create call
#[derive(Debug, Clone, PartialEq)]
pub struct NewNodeRecord {
    pub playbook_id: PlaybookId,
    pub client_ref: String,
    pub execution_order: u32,
    pub payload: String,
    pub attributes: NodeAttributes,
}

impl NewNodeRecord {
    /// Build the create body for a canvas node
    pub fn from_node(playbook_id: &PlaybookId, node: &CanvasNode, execution_order: u32) -> Self {
        Self {
            playbook_id: playbook_id.clone(),
            client_ref: node.id.0.clone(),
            execution_order,
            payload: render_payload(&node.id, &node.config),
            attributes: NodeAttributes::from_node(node),
        }
    }
}

/// New value of the dependency column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyUpdate {
    /// Replace the list with these upstream ids
    Set(Vec<RecordId>),
    /// Null the column
    Clear,
}

impl DependencyUpdate {
    /// `Clear` for an empty list, `Set` otherwise
    pub fn from_ids(ids: Vec<RecordId>) -> Self {
        if ids.is_empty() {
            DependencyUpdate::Clear
        } else {
            DependencyUpdate::Set(ids)
        }
    }

    /// Column value: a JSON array string, or `None` for null
    pub fn encode(&self) -> Option<String> {
        match self {
            DependencyUpdate::Set(ids) => {
                let raw: Vec<&str> = ids.iter().map(RecordId::as_str).collect();
                Some(Value::from(raw).to_string())
            }
            DependencyUpdate::Clear => None,
        }
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub execution_order: Option<u32>,
    pub payload: Option<String>,
    pub client_ref: Option<String>,
    pub attributes: Option<NodeAttributes>,
    pub depends_on: Option<DependencyUpdate>,
}

impl RecordPatch {
    /// Full content refresh for an owned record
    pub fn from_node(node: &CanvasNode, execution_order: u32) -> Self {
        Self {
            execution_order: Some(execution_order),
            payload: Some(render_payload(&node.id, &node.config)),
            client_ref: Some(node.id.0.clone()),
            attributes: Some(NodeAttributes::from_node(node)),
            depends_on: None,
        }
    }

    /// Patch that only rewrites the dependency column
    pub fn dependencies(update: DependencyUpdate) -> Self {
        Self {
            depends_on: Some(update),
            ..Self::default()
        }
    }
}

/// Serialize a node's configuration into the opaque payload the engine reads.
///
/// The canvas id is embedded under [`CORRELATION_KEY`] so records can be
/// traced back to their node even without the `client_ref` column.
pub fn render_payload(node_id: &NodeId, config: &NodeConfig) -> String {
    let mut body = Map::new();
    body.insert(CORRELATION_KEY.to_string(), Value::from(node_id.as_str()));
    body.insert("nodeType".to_string(), Value::from(config.kind().as_str()));

    let settings = match config {
        NodeConfig::Start => json!({}),
        NodeConfig::AiAnalysis {
            action_id,
            model_deployment_id,
            prompt_override,
            output_variable,
        } => json!({
            "actionId": action_id,
            "modelDeploymentId": model_deployment_id,
            "promptOverride": prompt_override,
            "outputVariable": output_variable,
        }),
        NodeConfig::AiCompletion {
            model_deployment_id,
            system_prompt,
            temperature,
            output_variable,
        } => json!({
            "modelDeploymentId": model_deployment_id,
            "systemPrompt": system_prompt,
            "temperature": temperature,
            "outputVariable": output_variable,
        }),
        NodeConfig::Condition {
            expression,
            description,
        } => json!({
            "expression": expression,
            "description": description,
        }),
        NodeConfig::DeliverOutput {
            template_id,
            output_format,
            include_citations,
        } => json!({
            "templateId": template_id,
            "outputFormat": output_format,
            "includeCitations": include_citations,
        }),
        NodeConfig::SendEmail {
            to,
            subject,
            body_template,
        } => json!({
            "to": to,
            "subject": subject,
            "bodyTemplate": body_template,
        }),
        NodeConfig::Wait { duration_minutes } => json!({
            "durationMinutes": duration_minutes,
        }),
    };
    body.insert("settings".to_string(), settings);

    Value::Object(body).to_string()
}
