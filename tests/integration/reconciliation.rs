//! End-to-end reconciliation: inventory → topology → flatten → apply

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;
use serde_json::json;

use probeadm::probes::{self, DefinitionSource, ReconcileOptions, StaticDefinitions};
use probeadm::topo::{self, TopologyOptions};
use probeadm::{Application, Probe};

use crate::helpers::{
    MockInventory, MockMonitoring, application_objects, definition_set, instance_record,
    live_probe, probe_group,
};

fn inventory_with(records: Vec<probeadm::InstanceRecord>) -> Arc<MockInventory> {
    Arc::new(MockInventory {
        application: Some(Application {
            uuid: "app-1".to_string(),
            name: "atlas".to_string(),
        }),
        objects: application_objects(records),
        ..MockInventory::default()
    })
}

#[tokio::test]
async fn provisions_a_fresh_role() {
    let inventory = inventory_with(vec![
        instance_record("i1", "svc-a", Some("A"), Some("s1")),
        instance_record("i2", "svc-b", Some("B"), Some("s2")),
    ]);
    let monitoring = Arc::new(MockMonitoring::default());

    let topology = topo::load_application(
        &inventory.client(),
        &monitoring.client(),
        "admin",
        "atlas",
        &TopologyOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(topology.len(), 2);
    assert_eq!(topology.role("A").unwrap()[0].uuid, "i1");
    assert_eq!(topology.server("s2").unwrap()[0].uuid, "i2");

    let roles = vec!["A".to_string()];
    let source = StaticDefinitions::new(definition_set(&[("A", &["p1"]), ("B", &["p2"])]));
    let set = source.load(Some(&roles)).await.unwrap();
    let flat = probes::flatten(&set, Some(&roles));
    assert_eq!(flat.len(), 1);

    let outcome = probes::reconcile(
        &monitoring.client(),
        &topology,
        &flat,
        &ReconcileOptions::new("admin"),
    )
    .await
    .unwrap();

    // one group create, then one probe create
    assert_eq!(outcome.created, 1);
    let created_groups = monitoring.created_groups.lock().unwrap();
    assert_eq!(created_groups.len(), 1);
    assert_eq!(created_groups[0].name, "A");
    let created_probes = monitoring.created_probes.lock().unwrap();
    assert_eq!(created_probes.len(), 1);
    assert_eq!(created_probes[0].agent, "i1");
}

#[tokio::test]
async fn updates_only_what_changed() {
    let inventory = inventory_with(vec![
        instance_record("i1", "svc-a", Some("A"), Some("s1")),
        instance_record("i2", "svc-a", Some("A"), Some("s1")),
    ]);
    let monitoring = Arc::new(MockMonitoring::default());
    *monitoring.groups.lock().unwrap() = vec![probe_group("g-a", "A")];
    *monitoring.probes.lock().unwrap() = vec![
        // i1's probe drifted, i2's matches the declared config
        live_probe("p-drift", "p1", "i1", "g-a", json!({"cmd": "old"})),
        live_probe("p-same", "p1", "i2", "g-a", json!({"cmd": "true"})),
    ];

    let topology = topo::load_application(
        &inventory.client(),
        &monitoring.client(),
        "admin",
        "atlas",
        &TopologyOptions::default(),
    )
    .await
    .unwrap();

    let set = definition_set(&[("A", &["p1"])]);
    let flat = probes::flatten(&set, None);
    let outcome = probes::reconcile(
        &monitoring.client(),
        &topology,
        &flat,
        &ReconcileOptions::new("admin"),
    )
    .await
    .unwrap();

    assert_eq!(outcome.created, 0);
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.unchanged, 1);
    assert!(monitoring.created_groups.lock().unwrap().is_empty());
    let updated = monitoring.updated_probes.lock().unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].0, "p-drift");
    assert_eq!(updated[0].1.config, json!({"cmd": "true"}));
}

#[tokio::test]
async fn resolves_hosts_for_global_probes() {
    let inventory = Arc::new(MockInventory {
        application: Some(Application {
            uuid: "app-1".to_string(),
            name: "atlas".to_string(),
        }),
        objects: application_objects(vec![instance_record("i1", "svc-a", Some("A"), None)]),
        vms: BTreeMap::from([("i1".to_string(), "s9".to_string())]),
        ..MockInventory::default()
    });
    let monitoring = Arc::new(MockMonitoring::default());

    let topology = topo::load_application(
        &inventory.client(),
        &monitoring.client(),
        "admin",
        "atlas",
        &TopologyOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(inventory.vm_lookups.load(Ordering::SeqCst), 1);

    let mut set = definition_set(&[("A", &["host-check"])]);
    let def = &mut set.get_mut("A").unwrap()[0];
    def.global = true;
    def.config = json!({"cmd": "ping {machine}"});
    let flat = probes::flatten(&set, None);

    probes::reconcile(
        &monitoring.client(),
        &topology,
        &flat,
        &ReconcileOptions::new("admin"),
    )
    .await
    .unwrap();

    let created: Vec<Probe> = {
        let probes = monitoring.probes.lock().unwrap();
        probes.clone()
    };
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].agent, "s9");
    assert_eq!(created[0].config, json!({"cmd": "ping s9"}));
}
