//! Topology index over an application's instances
//!
//! Builds the role/server/zone indices every reconciliation run reads from.
//! Role resolution follows tag precedence: an instance-level tag overrides
//! the owning service's tag, and an instance with neither is left out of
//! the topology entirely. Instances whose host server is unknown are
//! resolved against the inventory service through a bounded task queue;
//! any resolution failure fails the whole build, partial topologies are
//! never returned.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::clients::{InventoryClient, MonitoringClient};
use crate::error::{Error, Result};
use crate::queue::TaskQueue;
use crate::{ApplicationObjects, ApplicationQuery, InstanceRecord, Probe, ServiceRecord};

/// How many host lookups may be in flight while building the index
const DEFAULT_RESOLVE_CONCURRENCY: usize = 10;

/// Tuning knobs for topology construction
#[derive(Debug, Clone)]
pub struct TopologyOptions {
    /// Tag key that names an instance's role
    pub role_key: String,

    /// Concurrency limit for remote host resolution
    pub resolve_concurrency: usize,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            role_key: "role".to_string(),
            resolve_concurrency: DEFAULT_RESOLVE_CONCURRENCY,
        }
    }
}

/// One service instance with its role, host and already-bound probes
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub uuid: String,
    pub role: String,
    pub server: String,
    pub probes: Vec<Probe>,
}

/// Read-only role/server/zone indices over an application's instances
///
/// Built once per run; every reconciliation read goes against this
/// snapshot. The three maps share the same `Arc<Instance>` values.
#[derive(Debug, Default)]
pub struct TopologyIndex {
    roles: BTreeMap<String, Vec<Arc<Instance>>>,
    servers: BTreeMap<String, Vec<Arc<Instance>>>,
    zones: BTreeMap<String, Vec<Arc<Instance>>>,
}

impl TopologyIndex {
    /// Index a set of fully resolved instances
    pub fn from_instances(instances: Vec<Instance>) -> Self {
        let mut index = TopologyIndex::default();
        for instance in instances {
            let instance = Arc::new(instance);
            index
                .roles
                .entry(instance.role.clone())
                .or_default()
                .push(Arc::clone(&instance));
            index
                .servers
                .entry(instance.server.clone())
                .or_default()
                .push(Arc::clone(&instance));
            index
                .zones
                .entry(instance.uuid.clone())
                .or_default()
                .push(instance);
        }
        index
    }

    pub fn role(&self, name: &str) -> Option<&[Arc<Instance>]> {
        self.roles.get(name).map(Vec::as_slice)
    }

    pub fn server(&self, id: &str) -> Option<&[Arc<Instance>]> {
        self.servers.get(id).map(Vec::as_slice)
    }

    pub fn zone(&self, uuid: &str) -> Option<&[Arc<Instance>]> {
        self.zones.get(uuid).map(Vec::as_slice)
    }

    pub fn roles(&self) -> impl Iterator<Item = (&str, &[Arc<Instance>])> {
        self.roles.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn servers(&self) -> impl Iterator<Item = (&str, &[Arc<Instance>])> {
        self.servers.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of indexed instances
    pub fn len(&self) -> usize {
        self.zones.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// Find one application by name in the inventory
pub async fn find_application(
    inventory: &Arc<dyn InventoryClient>,
    name: &str,
) -> Result<crate::Application> {
    let query = ApplicationQuery {
        name: name.to_string(),
        include_master: true,
    };
    let mut apps = inventory.list_applications(&query).await?;
    if apps.is_empty() {
        return Err(Error::Validation(format!(
            "inventory has no application named \"{name}\""
        )));
    }
    Ok(apps.remove(0))
}

/// Load an application by name and build its topology index
pub async fn load_application(
    inventory: &Arc<dyn InventoryClient>,
    monitoring: &Arc<dyn MonitoringClient>,
    user: &str,
    name: &str,
    opts: &TopologyOptions,
) -> Result<TopologyIndex> {
    let app = find_application(inventory, name).await?;
    let objects = inventory.application_objects(&app.uuid).await?;
    let probes = monitoring.list_probes(user).await?;
    build_index(inventory, &objects, probes, opts).await
}

/// Partially resolved instance awaiting a host id
struct Draft {
    uuid: String,
    role: String,
    server: Option<String>,
}

/// Build the index from inventory records and the live probe list
///
/// Existing probes are grouped by their target agent up front so that
/// attaching them to an instance is a lookup, not a scan. Completion is
/// gated on the host-resolution queue's success signal.
pub async fn build_index(
    inventory: &Arc<dyn InventoryClient>,
    objects: &ApplicationObjects,
    probes: Vec<Probe>,
    opts: &TopologyOptions,
) -> Result<TopologyIndex> {
    let mut by_agent: HashMap<String, Vec<Probe>> = HashMap::new();
    for probe in probes {
        by_agent.entry(probe.agent.clone()).or_default().push(probe);
    }

    let mut drafts = Vec::new();
    for (service_uuid, records) in &objects.instances {
        let service = objects.services.get(service_uuid);
        for record in records {
            let Some(role) = resolve_role(record, service, &opts.role_key) else {
                trace!(instance = %record.uuid, "no role tag, excluding from topology");
                continue;
            };
            drafts.push(Draft {
                uuid: record.uuid.clone(),
                role,
                server: record
                    .params
                    .as_ref()
                    .and_then(|p| p.server_uuid.clone()),
            });
        }
    }

    let resolved: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let queue = TaskQueue::new(opts.resolve_concurrency, {
        let inventory = Arc::clone(inventory);
        let resolved = Arc::clone(&resolved);
        move |uuid: String| {
            let inventory = Arc::clone(&inventory);
            let resolved = Arc::clone(&resolved);
            async move {
                let vm = inventory.get_vm(&uuid).await?;
                resolved
                    .lock()
                    .expect("poisoned lock")
                    .insert(uuid, vm.server_uuid);
                Ok(())
            }
        }
    });

    let mut unresolved = 0usize;
    for draft in &drafts {
        if draft.server.is_none() {
            queue.push(draft.uuid.clone())?;
            unresolved += 1;
        }
    }
    queue.wait().await?;
    if unresolved > 0 {
        debug!(count = unresolved, "resolved instance hosts");
    }

    let mut resolved = resolved.lock().expect("poisoned lock");
    let mut instances = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let server = match draft.server {
            Some(server) => server,
            None => resolved.remove(&draft.uuid).ok_or_else(|| {
                Error::RemoteFailure(format!("host of instance {} was never resolved", draft.uuid))
            })?,
        };

        let mut probes = by_agent.get(&draft.uuid).cloned().unwrap_or_default();
        if let Some(host_probes) = by_agent.get(&server) {
            probes.extend(host_probes.iter().cloned());
        }

        instances.push(Instance {
            uuid: draft.uuid,
            role: draft.role,
            server,
            probes,
        });
    }

    Ok(TopologyIndex::from_instances(instances))
}

fn resolve_role(
    record: &InstanceRecord,
    service: Option<&ServiceRecord>,
    role_key: &str,
) -> Option<String> {
    let instance_tag = record
        .params
        .as_ref()
        .and_then(|p| p.tags.get(role_key));
    let service_tag = service
        .and_then(|s| s.params.as_ref())
        .and_then(|p| p.tags.get(role_key));
    instance_tag.or(service_tag).cloned()
}
