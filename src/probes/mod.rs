//! Probe definitions, rendering, reconciliation and maintenance
//!
//! The submodules cover the declared side (definition sets, flattening,
//! templated rendering) and the live side (reconciliation against remote
//! state). This module adds the maintenance operations an administrative
//! caller composes around them: listing live probes with their roles,
//! filtering, and teardown.

pub mod defs;
pub mod reconcile;
pub mod render;

use std::sync::Arc;

use tracing::debug;

use crate::clients::MonitoringClient;
use crate::error::{Error, Result};
use crate::queue::TaskQueue;
use crate::{Probe, ProbeGroup};

pub use defs::{DefinitionSet, DefinitionSource, FlatDefinition, ProbeDefinition, StaticDefinitions, flatten};
pub use reconcile::{ReconcileOptions, ReconcileOutcome, reconcile};

/// A live probe joined with the role its group belongs to
///
/// `role` is `None` for probes whose group is unknown or absent.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleProbe {
    pub role: Option<String>,
    pub probe: Probe,
}

/// Live probes with their groups, as returned by [`list_probes`]
#[derive(Debug, Clone, Default)]
pub struct ProbeListing {
    pub probes: Vec<RoleProbe>,
    pub groups: Vec<ProbeGroup>,
}

/// List all probes of one account, each joined to its role
///
/// Sorted by (role, agent, uuid) so repeated listings of the same state
/// are identical.
pub async fn list_probes(
    monitoring: &Arc<dyn MonitoringClient>,
    user: &str,
) -> Result<ProbeListing> {
    let probes = monitoring.list_probes(user).await?;
    let groups = monitoring.list_probe_groups(user).await?;

    let mut listed: Vec<RoleProbe> = probes
        .into_iter()
        .map(|probe| {
            let role = probe.group.as_deref().and_then(|gid| {
                groups
                    .iter()
                    .find(|g| g.uuid == gid)
                    .map(|g| g.name.clone())
            });
            RoleProbe { role, probe }
        })
        .collect();

    listed.sort_by(|a, b| {
        a.role
            .cmp(&b.role)
            .then_with(|| a.probe.agent.cmp(&b.probe.agent))
            .then_with(|| a.probe.uuid.cmp(&b.probe.uuid))
    });

    Ok(ProbeListing {
        probes: listed,
        groups,
    })
}

/// Restrict a listing to the given roles and/or machines
///
/// Machine filters match by substring against the probe's target agent;
/// absent or empty filters keep everything.
pub fn filter_probes(
    probes: Vec<RoleProbe>,
    roles: Option<&[String]>,
    machines: Option<&[String]>,
) -> Vec<RoleProbe> {
    probes
        .into_iter()
        .filter(|p| match roles {
            Some(filter) if !filter.is_empty() => p
                .role
                .as_deref()
                .is_some_and(|role| filter.iter().any(|r| r == role)),
            _ => true,
        })
        .filter(|p| match machines {
            Some(filter) if !filter.is_empty() => {
                filter.iter().any(|m| p.probe.agent.contains(m.as_str()))
            }
            _ => true,
        })
        .collect()
}

/// Delete the given probes, and the probe groups of whole roles
///
/// Probe deletion runs on a bounded queue. When `roles` names roles being
/// torn down entirely, each role's probe group is deleted afterwards; a
/// named role without a live group is a validation error. Returns the
/// number of probes deleted.
pub async fn drop_probes(
    monitoring: &Arc<dyn MonitoringClient>,
    user: &str,
    probes: &[RoleProbe],
    groups: &[ProbeGroup],
    roles: Option<&[String]>,
    concurrency: usize,
) -> Result<usize> {
    let queue = TaskQueue::new(concurrency.max(1), {
        let monitoring = Arc::clone(monitoring);
        let user = user.to_string();
        move |uuid: String| {
            let monitoring = Arc::clone(&monitoring);
            let user = user.clone();
            async move { monitoring.delete_probe(&user, &uuid).await }
        }
    });

    for p in probes {
        queue.push(p.probe.uuid.clone())?;
    }
    queue.wait().await?;
    debug!(count = probes.len(), "deleted probes");

    if let Some(roles) = roles {
        if !roles.is_empty() {
            let mut group_ids = Vec::with_capacity(roles.len());
            for role in roles {
                let group = groups.iter().find(|g| &g.name == role).ok_or_else(|| {
                    Error::Validation(format!("no probe group for role \"{role}\""))
                })?;
                group_ids.push(group.uuid.clone());
            }

            let group_queue = TaskQueue::new(concurrency.max(1), {
                let monitoring = Arc::clone(monitoring);
                let user = user.to_string();
                move |uuid: String| {
                    let monitoring = Arc::clone(&monitoring);
                    let user = user.clone();
                    async move { monitoring.delete_probe_group(&user, &uuid).await }
                }
            });
            for uuid in group_ids {
                group_queue.push(uuid)?;
            }
            group_queue.wait().await?;
        }
    }

    Ok(probes.len())
}
