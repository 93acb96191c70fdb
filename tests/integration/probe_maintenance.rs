//! Listing, filtering and tearing down live probes

use std::sync::Arc;

use pretty_assertions::assert_eq;

use probeadm::probes;

use crate::helpers::{MockMonitoring, live_probe, probe_group};

#[tokio::test]
async fn list_filter_drop_cycle() {
    let monitoring = Arc::new(MockMonitoring::default());
    *monitoring.groups.lock().unwrap() =
        vec![probe_group("g-web", "web"), probe_group("g-db", "db")];
    *monitoring.probes.lock().unwrap() = vec![
        live_probe("p2", "disk", "agent-2", "g-db", serde_json::Value::Null),
        live_probe("p1", "ping", "agent-1", "g-web", serde_json::Value::Null),
        live_probe("p3", "cpu", "agent-1", "g-web", serde_json::Value::Null),
    ];

    let listing = probes::list_probes(&monitoring.client(), "admin").await.unwrap();
    let order: Vec<&str> = listing.probes.iter().map(|p| p.probe.uuid.as_str()).collect();
    assert_eq!(order, vec!["p2", "p1", "p3"]);

    let web = probes::filter_probes(listing.probes, Some(&["web".to_string()]), None);
    assert_eq!(web.len(), 2);

    let dropped = probes::drop_probes(
        &monitoring.client(),
        "admin",
        &web,
        &listing.groups,
        Some(&["web".to_string()]),
        4,
    )
    .await
    .unwrap();

    assert_eq!(dropped, 2);
    let mut deleted = monitoring.deleted_probes.lock().unwrap().clone();
    deleted.sort();
    assert_eq!(deleted, vec!["p1", "p3"]);
    assert_eq!(*monitoring.deleted_groups.lock().unwrap(), vec!["g-web"]);
}
