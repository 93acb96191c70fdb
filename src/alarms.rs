//! Alarm fault flattening and resolution
//!
//! An alarm carries one fault per triggered event; callers want those
//! faults as a flat, deterministically ordered sequence with each fault's
//! probe name and role attached. Resolution fans out over a bounded task
//! queue; probe group lookups go through a small LRU cache so a run over
//! hundreds of faults only fetches each group once.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::clients::MonitoringClient;
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::{Alarm, AlarmQuery, AlarmState, ProbeGroup};

/// Default number of fault resolutions in flight
const DEFAULT_CONCURRENCY: usize = 5;

/// Default capacity of the per-run probe group cache
const DEFAULT_GROUP_CACHE: usize = 32;

/// Sentinel name/role attached when a fault's probe no longer exists
const UNKNOWN: &str = "UNKNOWN";

/// Caller-supplied parameters for alarm resolution
#[derive(Debug, Clone)]
pub struct AlarmOptions {
    /// Account owning the alarms
    pub user: String,

    /// Concurrency limit of the resolution queue
    pub concurrency: usize,

    /// Capacity of the probe group LRU cache
    pub group_cache: usize,
}

impl AlarmOptions {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            concurrency: DEFAULT_CONCURRENCY,
            group_cache: DEFAULT_GROUP_CACHE,
        }
    }
}

/// One triggered condition from an alarm's event history
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub alarm: u64,
    pub machine: String,
    pub probe_ref: String,
    pub data: serde_json::Value,
}

/// Probe metadata attached to a resolved fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultProbe {
    pub name: String,
    pub role: String,
}

impl FaultProbe {
    /// The sentinel used when the fault's probe has been deleted
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            role: UNKNOWN.to_string(),
        }
    }
}

/// A fault with its probe's name and role resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFault {
    pub alarm: u64,
    pub machine: String,
    pub probe_ref: String,
    pub data: serde_json::Value,
    pub probe: FaultProbe,
}

/// Flatten alarms into one fault record per fault event
pub fn flatten_faults(alarms: &[Alarm]) -> Vec<Fault> {
    let mut faults = Vec::new();
    for alarm in alarms {
        for fault in &alarm.faults {
            faults.push(Fault {
                alarm: alarm.id,
                machine: fault.event.agent.clone(),
                probe_ref: fault.probe.clone(),
                data: fault.event.data.clone(),
            });
        }
    }
    faults
}

/// Sort faults by (alarm id, machine, probe reference)
///
/// A total order, so sorting the same input twice yields identical output.
pub fn sort_faults(faults: &mut [Fault]) {
    faults.sort_by(|a, b| {
        a.alarm
            .cmp(&b.alarm)
            .then_with(|| a.machine.cmp(&b.machine))
            .then_with(|| a.probe_ref.cmp(&b.probe_ref))
    });
}

/// List open alarms and resolve their faults
pub async fn list_faults(
    monitoring: &Arc<dyn MonitoringClient>,
    opts: &AlarmOptions,
) -> Result<Vec<ResolvedFault>> {
    let query = AlarmQuery {
        state: AlarmState::Open,
    };
    let alarms = monitoring.list_alarms(&opts.user, &query).await?;

    let mut faults = flatten_faults(&alarms);
    sort_faults(&mut faults);
    resolve_faults(monitoring, opts, faults).await
}

/// Resolve each fault's probe name and role through a bounded queue
///
/// A missing probe (remote 404) degrades to the `UNKNOWN` sentinel rather
/// than failing the run; any other remote failure is fatal. Input order is
/// preserved.
pub async fn resolve_faults(
    monitoring: &Arc<dyn MonitoringClient>,
    opts: &AlarmOptions,
    faults: Vec<Fault>,
) -> Result<Vec<ResolvedFault>> {
    let cache = Arc::new(GroupCache::new(opts.group_cache));
    let slots: Arc<Mutex<Vec<Option<FaultProbe>>>> =
        Arc::new(Mutex::new(vec![None; faults.len()]));

    let queue = TaskQueue::new(opts.concurrency.max(1), {
        let monitoring = Arc::clone(monitoring);
        let cache = Arc::clone(&cache);
        let slots = Arc::clone(&slots);
        let user = opts.user.clone();
        move |(index, probe_ref): (usize, String)| {
            let monitoring = Arc::clone(&monitoring);
            let cache = Arc::clone(&cache);
            let slots = Arc::clone(&slots);
            let user = user.clone();
            async move {
                let probe = match monitoring.get_probe(&user, &probe_ref).await {
                    Ok(probe) => probe,
                    Err(err) if err.is_not_found() => {
                        debug!(probe = %probe_ref, "probe is gone, using sentinel");
                        slots.lock().expect("poisoned lock")[index] = Some(FaultProbe::unknown());
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                };

                let role = match &probe.group {
                    Some(group) => cache.group(&*monitoring, &user, group).await?.name,
                    None => {
                        warn!(probe = %probe.uuid, "probe has no group, role unknown");
                        UNKNOWN.to_string()
                    }
                };

                slots.lock().expect("poisoned lock")[index] = Some(FaultProbe {
                    name: probe.name,
                    role,
                });
                Ok(())
            }
        }
    });

    for (index, fault) in faults.iter().enumerate() {
        queue.push((index, fault.probe_ref.clone()))?;
    }
    queue.wait().await?;

    let slots = std::mem::take(&mut *slots.lock().expect("poisoned lock"));
    Ok(faults
        .into_iter()
        .zip(slots)
        .map(|(fault, probe)| ResolvedFault {
            alarm: fault.alarm,
            machine: fault.machine,
            probe_ref: fault.probe_ref,
            data: fault.data,
            probe: probe.expect("queue succeeded with an unresolved fault"),
        })
        .collect())
}

/// Restrict resolved faults to the given roles and/or machines
pub fn filter_faults(
    faults: Vec<ResolvedFault>,
    roles: Option<&[String]>,
    machines: Option<&[String]>,
) -> Vec<ResolvedFault> {
    faults
        .into_iter()
        .filter(|f| match roles {
            Some(filter) if !filter.is_empty() => filter.iter().any(|r| *r == f.probe.role),
            _ => true,
        })
        .filter(|f| match machines {
            Some(filter) if !filter.is_empty() => {
                filter.iter().any(|m| f.machine.contains(m.as_str()))
            }
            _ => true,
        })
        .collect()
}

/// Close the alarms behind the given faults
///
/// Several faults may belong to one alarm; each alarm id is closed once.
/// Returns the number of alarms closed.
pub async fn close_alarms(
    monitoring: &Arc<dyn MonitoringClient>,
    user: &str,
    faults: &[ResolvedFault],
    concurrency: usize,
) -> Result<usize> {
    let ids: BTreeSet<u64> = faults.iter().map(|f| f.alarm).collect();
    let closing = ids.len();

    let queue = TaskQueue::new(concurrency.max(1), {
        let monitoring = Arc::clone(monitoring);
        let user = user.to_string();
        move |id: u64| {
            let monitoring = Arc::clone(&monitoring);
            let user = user.clone();
            async move { monitoring.close_alarm(&user, id).await }
        }
    });

    for id in ids {
        queue.push(id)?;
    }
    queue.wait().await?;
    debug!(count = closing, "closed alarms");

    Ok(closing)
}

/// Bounded, single-flight cache of probe groups keyed by group uuid
///
/// The LRU holds completed fetches; `pending` holds at most one in-flight
/// fetch per uuid so concurrent demand for an uncached group performs one
/// remote call, with later demanders waiting on the same cell.
struct GroupCache {
    seen: Mutex<LruCache<String, ProbeGroup>>,
    pending: Mutex<HashMap<String, Arc<OnceCell<ProbeGroup>>>>,
}

impl GroupCache {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("nonzero capacity");
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    async fn group(
        &self,
        monitoring: &dyn MonitoringClient,
        user: &str,
        uuid: &str,
    ) -> Result<ProbeGroup> {
        if let Some(group) = self.seen.lock().expect("poisoned lock").get(uuid) {
            return Ok(group.clone());
        }

        let cell = {
            let mut pending = self.pending.lock().expect("poisoned lock");
            // Double-check under the pending lock: a fetch that just
            // finished inserts into the LRU before clearing its slot here.
            if let Some(group) = self.seen.lock().expect("poisoned lock").get(uuid) {
                return Ok(group.clone());
            }
            Arc::clone(pending.entry(uuid.to_string()).or_default())
        };

        let group = cell
            .get_or_try_init(|| async { monitoring.get_probe_group(user, uuid).await })
            .await?
            .clone();

        self.seen
            .lock()
            .expect("poisoned lock")
            .put(uuid.to_string(), group.clone());
        self.pending.lock().expect("poisoned lock").remove(uuid);

        Ok(group)
    }
}
