//! Knowledge nodes and the deterministic node enricher
//!
//! Every indexed name is a column of the admissions datasets. The enricher
//! derives display metadata and typed edges from the name alone, so the same
//! name always yields the same node.

use serde::{Deserialize, Serialize};

/// Sentinel edge target for corpus membership
pub const DIRECTORY_TARGET: &str = "directory";

/// Sentinel edge target for data provenance
pub const SOURCE_TARGET: &str = "source";

/// Name suffix marking an identifier column
const ID_SUFFIX: &str = "_id";

/// Value format inferred from a node's name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeFormat {
    Percentage,
    Date,
    Identifier,
    String,
    Numeric,
}

impl NodeFormat {
    /// Infer the format from substrings of the name, first match wins
    pub fn infer(name: &str) -> Self {
        let name = name.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

        if has(&["pct", "rate"]) {
            Self::Percentage
        } else if has(&["date", "year"]) {
            Self::Date
        } else if has(&["id"]) {
            Self::Identifier
        } else if has(&["name"]) {
            Self::String
        } else if has(&["count", "number"]) {
            Self::Numeric
        } else {
            Self::String
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Date => "date",
            Self::Identifier => "identifier",
            Self::String => "string",
            Self::Numeric => "numeric",
        }
    }
}

impl std::fmt::Display for NodeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification tag of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[default]
    DataField,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataField => "data_field",
        }
    }
}

/// Kind of a directed edge between node names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Node is a member of the field directory
    PartOf,
    /// Node's values come from the source datasets
    SourcedFrom,
    /// Identifier column names the entity it identifies
    Identifies,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PartOf => "PART_OF",
            Self::SourcedFrom => "SOURCED_FROM",
            Self::Identifies => "IDENTIFIES",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed, typed edge; the target need not be an indexed node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub target: String,
}

impl Relationship {
    pub fn new(relationship_type: RelationshipType, target: impl Into<String>) -> Self {
        Self {
            relationship_type,
            target: target.into(),
        }
    }
}

/// A named entity of the retrieval corpus with its derived metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeNode {
    /// Unique key, as it appears in the corpus
    pub name: String,
    pub label: String,
    pub format: NodeFormat,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub relationships: Vec<Relationship>,
}

/// Derives [`KnowledgeNode`]s from names without external calls
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeEnricher;

impl NodeEnricher {
    pub fn new() -> Self {
        Self
    }

    /// Build the node for `name`
    pub fn enrich(&self, name: &str) -> KnowledgeNode {
        let mut relationships = vec![
            Relationship::new(RelationshipType::PartOf, DIRECTORY_TARGET),
            Relationship::new(RelationshipType::SourcedFrom, SOURCE_TARGET),
        ];

        if let Some(entity) = name.strip_suffix(ID_SUFFIX).filter(|e| !e.is_empty()) {
            relationships.push(Relationship::new(RelationshipType::Identifies, entity));
        }

        KnowledgeNode {
            name: name.to_string(),
            label: label_for(name),
            format: NodeFormat::infer(name),
            node_type: NodeType::DataField,
            relationships,
        }
    }
}

fn label_for(name: &str) -> String {
    let words = name
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} (data field)", words)
}
