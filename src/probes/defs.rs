//! Probe definition sets and flattening
//!
//! Definitions are declared per role and loaded through a
//! [`DefinitionSource`]; where they come from (files, embedded data, a
//! remote registry) is the source's business. The flattener turns a
//! role-keyed set into one ordered sequence with each definition stamped
//! with its owning role.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Probe definitions keyed by role, in declaration order per role
pub type DefinitionSet = BTreeMap<String, Vec<ProbeDefinition>>;

/// Template describing one probe to maintain for every instance of a role
///
/// `global` selects the host as the target instead of the instance itself.
/// String fields of `config` may reference the target through the
/// `{machine}` template variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub probe_type: String,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A probe definition stamped with its owning role
#[derive(Debug, Clone, PartialEq)]
pub struct FlatDefinition {
    pub role: String,
    pub definition: ProbeDefinition,
}

/// Producer of role-keyed probe definitions
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Load definitions for the given roles, or for all roles when `None`
    ///
    /// An empty result is an error: a reconciliation run with nothing to
    /// declare is almost certainly a misconfigured source.
    async fn load(&self, roles: Option<&[String]>) -> Result<DefinitionSet>;
}

/// In-memory definition source
///
/// Backs tests and embedders that assemble their definition sets
/// programmatically.
#[derive(Debug, Clone, Default)]
pub struct StaticDefinitions {
    set: DefinitionSet,
}

impl StaticDefinitions {
    pub fn new(set: DefinitionSet) -> Self {
        Self { set }
    }
}

#[async_trait]
impl DefinitionSource for StaticDefinitions {
    async fn load(&self, roles: Option<&[String]>) -> Result<DefinitionSet> {
        let set: DefinitionSet = match roles {
            Some(filter) if !filter.is_empty() => self
                .set
                .iter()
                .filter(|(role, _)| filter.iter().any(|r| r == *role))
                .map(|(role, defs)| (role.clone(), defs.clone()))
                .collect(),
            _ => self.set.clone(),
        };

        if set.values().all(Vec::is_empty) {
            return Err(Error::Validation("no probe definitions found".to_string()));
        }
        Ok(set)
    }
}

/// Flatten a definition set into one role-stamped, role-filtered sequence
///
/// Roles are visited in lexical order, definitions in declaration order.
/// A non-empty `roles` filter restricts the output to those roles; an
/// absent or empty filter includes everything. Within a role, definitions
/// are deduplicated by name: the first one wins and later duplicates are
/// dropped with a warning.
pub fn flatten(set: &DefinitionSet, roles: Option<&[String]>) -> Vec<FlatDefinition> {
    let mut flat = Vec::new();

    for (role, defs) in set {
        if let Some(filter) = roles {
            if !filter.is_empty() && !filter.iter().any(|r| r == role) {
                continue;
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for def in defs {
            if !seen.insert(def.name.as_str()) {
                warn!(%role, name = %def.name, "dropping duplicate probe definition");
                continue;
            }
            flat.push(FlatDefinition {
                role: role.clone(),
                definition: def.clone(),
            });
        }
    }

    flat
}
