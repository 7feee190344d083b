//! Status conditions of Gateway API resources
//!
//! Every resource the harness waits on reports `metav1.Condition`s, but in a
//! different place: top-level for GatewayClass, per listener for Gateways and
//! ListenerSets, per parent for routes, per ancestor for BackendTLSPolicy.
//! [`ConditionSubject`] parses those layouts into one closed set so polling
//! code can ask the same questions of any of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_PROGRAMMED: &str = "Programmed";
pub const CONDITION_RESOLVED_REFS: &str = "ResolvedRefs";
pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("kind {0} does not report conditions")]
    UnsupportedKind(String),

    #[error("malformed status: {0}")]
    Malformed(String),
}

/// Identity of the object the conditions were read from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubjectMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub generation: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConditions {
    pub name: String,
    #[serde(default)]
    pub attached_routes: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Conditions a controller reported for one parent (or ancestor) reference
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParentConditions {
    pub parent_name: String,
    pub parent_namespace: Option<String>,
    pub section_name: Option<String>,
    pub controller_name: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReference {
    #[serde(default)]
    name: String,
    namespace: Option<String>,
    section_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParent {
    #[serde(default, alias = "ancestorRef")]
    parent_ref: RawReference,
    #[serde(default)]
    controller_name: String,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    listeners: Vec<ListenerConditions>,
    #[serde(default)]
    parents: Vec<RawParent>,
    #[serde(default)]
    ancestors: Vec<RawParent>,
}

impl From<RawParent> for ParentConditions {
    fn from(raw: RawParent) -> Self {
        Self {
            parent_name: raw.parent_ref.name,
            parent_namespace: raw.parent_ref.namespace,
            section_name: raw.parent_ref.section_name,
            controller_name: raw.controller_name,
            conditions: raw.conditions,
        }
    }
}

/// A resource whose status conditions the harness inspects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionSubject {
    GatewayClass {
        meta: SubjectMeta,
        conditions: Vec<Condition>,
    },
    Gateway {
        meta: SubjectMeta,
        conditions: Vec<Condition>,
        listeners: Vec<ListenerConditions>,
    },
    ListenerSet {
        meta: SubjectMeta,
        conditions: Vec<Condition>,
        listeners: Vec<ListenerConditions>,
    },
    Route {
        kind: String,
        meta: SubjectMeta,
        parents: Vec<ParentConditions>,
    },
    BackendTLSPolicy {
        meta: SubjectMeta,
        ancestors: Vec<ParentConditions>,
    },
}

impl ConditionSubject {
    /// Parse a JSON object by its `kind`
    pub fn from_object(object: &Value) -> Result<Self, ConditionError> {
        let kind = object["kind"].as_str().unwrap_or_default();
        let meta = SubjectMeta {
            name: object["metadata"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            namespace: object["metadata"]["namespace"].as_str().map(str::to_string),
            generation: object["metadata"]["generation"].as_i64().unwrap_or(0),
        };
        let status: RawStatus = match object.get("status") {
            Some(status) if !status.is_null() => serde_json::from_value(status.clone())
                .map_err(|e| ConditionError::Malformed(e.to_string()))?,
            _ => RawStatus::default(),
        };

        let subject = match kind {
            "GatewayClass" => ConditionSubject::GatewayClass {
                meta,
                conditions: status.conditions,
            },
            "Gateway" => ConditionSubject::Gateway {
                meta,
                conditions: status.conditions,
                listeners: status.listeners,
            },
            "ListenerSet" | "XListenerSet" => ConditionSubject::ListenerSet {
                meta,
                conditions: status.conditions,
                listeners: status.listeners,
            },
            "HTTPRoute" | "GRPCRoute" | "TLSRoute" | "TCPRoute" | "UDPRoute" => {
                ConditionSubject::Route {
                    kind: kind.to_string(),
                    meta,
                    parents: status.parents.into_iter().map(Into::into).collect(),
                }
            }
            "BackendTLSPolicy" => ConditionSubject::BackendTLSPolicy {
                meta,
                ancestors: status.ancestors.into_iter().map(Into::into).collect(),
            },
            other => return Err(ConditionError::UnsupportedKind(other.to_string())),
        };
        Ok(subject)
    }

    pub fn meta(&self) -> &SubjectMeta {
        match self {
            ConditionSubject::GatewayClass { meta, .. }
            | ConditionSubject::Gateway { meta, .. }
            | ConditionSubject::ListenerSet { meta, .. }
            | ConditionSubject::Route { meta, .. }
            | ConditionSubject::BackendTLSPolicy { meta, .. } => meta,
        }
    }

    /// Every condition on the object, per-parent and per-ancestor ones flattened
    pub fn conditions(&self) -> Vec<&Condition> {
        match self {
            ConditionSubject::GatewayClass { conditions, .. }
            | ConditionSubject::Gateway { conditions, .. }
            | ConditionSubject::ListenerSet { conditions, .. } => conditions.iter().collect(),
            ConditionSubject::Route { parents, .. } => {
                parents.iter().flat_map(|p| p.conditions.iter()).collect()
            }
            ConditionSubject::BackendTLSPolicy { ancestors, .. } => {
                ancestors.iter().flat_map(|p| p.conditions.iter()).collect()
            }
        }
    }

    /// Conditions reported for one parent (or ancestor) name
    pub fn parent_conditions(&self, parent_name: &str) -> Vec<&Condition> {
        self.parents()
            .iter()
            .filter(|p| p.parent_name == parent_name)
            .flat_map(|p| p.conditions.iter())
            .collect()
    }

    pub fn parents(&self) -> &[ParentConditions] {
        match self {
            ConditionSubject::Route { parents, .. } => parents,
            ConditionSubject::BackendTLSPolicy { ancestors, .. } => ancestors,
            _ => &[],
        }
    }

    pub fn listeners(&self) -> &[ListenerConditions] {
        match self {
            ConditionSubject::Gateway { listeners, .. }
            | ConditionSubject::ListenerSet { listeners, .. } => listeners,
            _ => &[],
        }
    }

    pub fn has_condition(&self, matcher: &ConditionMatcher) -> bool {
        self.conditions().into_iter().any(|c| matcher.matches(c))
    }

    /// True once every reported condition was written for the current generation.
    ///
    /// An object without conditions has not been observed yet and returns false.
    pub fn conditions_have_latest_observed_generation(&self) -> bool {
        let generation = self.meta().generation;
        let conditions = self.conditions();
        !conditions.is_empty()
            && conditions
                .iter()
                .all(|c| c.observed_generation == Some(generation))
    }
}

/// Matches a condition by type and status, and by reason when one is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionMatcher {
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
}

impl ConditionMatcher {
    pub fn new(type_: &str, status: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn accepted() -> Self {
        Self::new(CONDITION_ACCEPTED, STATUS_TRUE).with_reason("Accepted")
    }

    pub fn programmed() -> Self {
        Self::new(CONDITION_PROGRAMMED, STATUS_TRUE)
    }

    pub fn resolved_refs() -> Self {
        Self::new(CONDITION_RESOLVED_REFS, STATUS_TRUE)
    }

    pub fn matches(&self, condition: &Condition) -> bool {
        condition.type_ == self.type_
            && condition.status == self.status
            && self
                .reason
                .as_ref()
                .map_or(true, |reason| &condition.reason == reason)
    }
}

impl fmt::Display for ConditionMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.type_, self.status)?;
        if let Some(reason) = &self.reason {
            write!(f, " (reason {})", reason)?;
        }
        Ok(())
    }
}
