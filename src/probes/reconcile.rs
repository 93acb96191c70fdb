//! Reconciliation of declared probes against live state
//!
//! Fans flattened definitions out across the instances of their role,
//! renders each pair against its target, resolves the role's probe group
//! and applies creates/updates through a bounded queue. Two task queues
//! cooperate:
//!
//! - a limit-1 *group queue* serializes probe-group creation, so a role
//!   demanded by many pairs at once still gets exactly one remote create;
//! - an *apply queue* bounded by the caller's concurrency performs the
//!   actual probe writes.
//!
//! The apply queue may only close once every enumerated pair has been
//! routed. Because group resolution defers pairs, closing is gated on an
//! explicit two-phase barrier: the fan-out loop has finished *and* the
//! group queue has drained. Demand counters (`produced` at enumeration,
//! `settled` at routing) are kept and checked when the barrier is passed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument};

use crate::clients::MonitoringClient;
use crate::error::{Error, Result};
use crate::queue::{QueueSender, TaskQueue};
use crate::topo::{Instance, TopologyIndex};
use crate::{ExistingProbe, NewProbeGroup, ProbeGroup, RenderedProbe};

use super::defs::FlatDefinition;
use super::render;

/// Default number of probe writes in flight
const DEFAULT_CONCURRENCY: usize = 5;

/// Caller-supplied parameters for one reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Account owning probes and groups
    pub user: String,

    /// Notification contacts stamped onto newly created groups
    pub contacts: Vec<String>,

    /// Concurrency limit of the apply queue
    pub concurrency: usize,

    /// Substring filters on the target machine id; pairs matching none are
    /// skipped (and counted)
    pub machines: Option<Vec<String>>,
}

impl ReconcileOptions {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            contacts: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            machines: None,
        }
    }
}

/// What one reconciliation run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct Counts {
    created: AtomicUsize,
    updated: AtomicUsize,
    unchanged: AtomicUsize,
    skipped: AtomicUsize,
}

impl Counts {
    fn outcome(&self) -> ReconcileOutcome {
        ReconcileOutcome {
            created: self.created.load(Ordering::SeqCst),
            updated: self.updated.load(Ordering::SeqCst),
            unchanged: self.unchanged.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }
}

/// Pairs produced by fan-out vs. pairs whose routing decision is complete
#[derive(Default)]
struct Demand {
    produced: AtomicUsize,
    settled: AtomicUsize,
}

/// One (definition, instance) unit of fan-out
struct Pair {
    def: FlatDefinition,
    instance: Arc<Instance>,
}

/// Reconcile declared probe definitions against live remote state
///
/// Fails fast on the first remote or rendering error; counts are only
/// returned from fully successful runs.
#[instrument(skip_all, fields(user = %opts.user, definitions = definitions.len()))]
pub async fn reconcile(
    monitoring: &Arc<dyn MonitoringClient>,
    topology: &TopologyIndex,
    definitions: &[FlatDefinition],
    opts: &ReconcileOptions,
) -> Result<ReconcileOutcome> {
    let live_groups = monitoring.list_probe_groups(&opts.user).await?;
    let memo: Arc<Mutex<HashMap<String, ProbeGroup>>> = Arc::new(Mutex::new(
        live_groups.into_iter().map(|g| (g.name.clone(), g)).collect(),
    ));

    let counts = Arc::new(Counts::default());
    let demand = Arc::new(Demand::default());

    let apply_queue = TaskQueue::new(opts.concurrency.max(1), {
        let monitoring = Arc::clone(monitoring);
        let counts = Arc::clone(&counts);
        let user = opts.user.clone();
        move |probe: RenderedProbe| {
            let monitoring = Arc::clone(&monitoring);
            let counts = Arc::clone(&counts);
            let user = user.clone();
            async move {
                match &probe.existing {
                    Some(existing) => {
                        monitoring.put_probe(&user, &existing.uuid, &probe).await?;
                        counts.updated.fetch_add(1, Ordering::SeqCst);
                    }
                    None => {
                        monitoring.create_probe(&user, &probe).await?;
                        counts.created.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Ok(())
            }
        }
    });
    let apply_tx = apply_queue.sender();

    // Limit 1: the sole mechanism preventing duplicate group creation.
    let group_queue = TaskQueue::new(1, {
        let monitoring = Arc::clone(monitoring);
        let memo = Arc::clone(&memo);
        let counts = Arc::clone(&counts);
        let demand = Arc::clone(&demand);
        let apply_tx = apply_tx.clone();
        let user = opts.user.clone();
        let contacts = opts.contacts.clone();
        move |pair: Pair| {
            let monitoring = Arc::clone(&monitoring);
            let memo = Arc::clone(&memo);
            let counts = Arc::clone(&counts);
            let demand = Arc::clone(&demand);
            let apply_tx = apply_tx.clone();
            let user = user.clone();
            let contacts = contacts.clone();
            async move {
                let known = memo
                    .lock()
                    .expect("poisoned lock")
                    .get(&pair.def.role)
                    .cloned();
                let group = match known {
                    Some(group) => group,
                    None => {
                        let new_group = NewProbeGroup {
                            name: pair.def.role.clone(),
                            contacts,
                        };
                        let group = monitoring.create_probe_group(&user, &new_group).await?;
                        debug!(role = %pair.def.role, group = %group.uuid, "created probe group");
                        memo.lock()
                            .expect("poisoned lock")
                            .insert(group.name.clone(), group.clone());
                        group
                    }
                };

                settle_pair(&pair, &group, &apply_tx, &counts)?;
                demand.settled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    });

    // Fan out every (definition, instance) pair from the topology snapshot.
    for def in definitions {
        let Some(instances) = topology.role(&def.role) else {
            return Err(Error::Validation(format!(
                "role \"{}\" not in topology",
                def.role
            )));
        };

        for instance in instances {
            let target = target_id(def, instance);
            if let Some(machines) = &opts.machines {
                if !machines.is_empty() && !machines.iter().any(|m| target.contains(m.as_str())) {
                    counts.skipped.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
            }

            demand.produced.fetch_add(1, Ordering::SeqCst);
            let pair = Pair {
                def: def.clone(),
                instance: Arc::clone(instance),
            };

            let known = memo
                .lock()
                .expect("poisoned lock")
                .get(&def.role)
                .cloned();
            match known {
                Some(group) => {
                    settle_pair(&pair, &group, &apply_tx, &counts)?;
                    demand.settled.fetch_add(1, Ordering::SeqCst);
                }
                None => group_queue.push(pair)?,
            }
        }
    }

    // Two-phase barrier: fan-out is complete (loop above) and every pair
    // deferred for group resolution has been routed.
    group_queue.wait().await?;
    debug_assert_eq!(
        demand.produced.load(Ordering::SeqCst),
        demand.settled.load(Ordering::SeqCst),
        "pairs were produced but never routed"
    );

    apply_queue.wait().await?;

    let outcome = counts.outcome();
    debug!(?outcome, "reconciliation complete");
    Ok(outcome)
}

fn target_id<'a>(def: &FlatDefinition, instance: &'a Instance) -> &'a str {
    if def.definition.global {
        &instance.server
    } else {
        &instance.uuid
    }
}

/// Render a pair against its group and route it: apply, update or no-op
fn settle_pair(
    pair: &Pair,
    group: &ProbeGroup,
    apply: &QueueSender<RenderedProbe>,
    counts: &Counts,
) -> Result<()> {
    let def = &pair.def.definition;
    let target = target_id(&pair.def, &pair.instance);
    let config = render::render_config(&def.config, target)?;

    let mut rendered = RenderedProbe {
        name: def.name.clone(),
        probe_type: def.probe_type.clone(),
        agent: target.to_string(),
        group: group.uuid.clone(),
        config,
        disabled: false,
        existing: None,
    };

    let live = pair
        .instance
        .probes
        .iter()
        .find(|p| p.group.as_deref() == Some(group.uuid.as_str()) && p.name == def.name);

    match live {
        Some(live) => {
            if live.probe_type == rendered.probe_type
                && live.agent == rendered.agent
                && live.config == rendered.config
            {
                counts.unchanged.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }

            rendered.disabled = live.disabled;
            rendered.existing = Some(ExistingProbe {
                uuid: live.uuid.clone(),
                disabled: live.disabled,
            });
            apply.push(rendered)
        }
        None => apply.push(rendered),
    }
}
