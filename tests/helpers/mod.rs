//! Test helpers and mock remote services for integration tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use probeadm::clients::{InventoryClient, MonitoringClient};
use probeadm::error::Error;
use probeadm::probes::{DefinitionSet, ProbeDefinition};
use probeadm::{
    Alarm, AlarmFault, AlarmQuery, Application, ApplicationObjects, ApplicationQuery, FaultEvent,
    InstanceRecord, NewProbeGroup, Params, Probe, ProbeGroup, RenderedProbe, Result,
    ServiceRecord, Vm,
};

/// Scripted inventory service
///
/// Serves one application with the configured instance/service records and
/// resolves VM hosts from a fixed map.
#[derive(Default)]
pub struct MockInventory {
    pub application: Option<Application>,
    pub objects: ApplicationObjects,
    pub vms: BTreeMap<String, String>,
    pub vm_lookups: AtomicUsize,
}

impl MockInventory {
    pub fn client(self: &Arc<Self>) -> Arc<dyn InventoryClient> {
        Arc::clone(self) as Arc<dyn InventoryClient>
    }
}

#[async_trait]
impl InventoryClient for MockInventory {
    async fn list_applications(&self, query: &ApplicationQuery) -> Result<Vec<Application>> {
        Ok(self
            .application
            .iter()
            .filter(|app| app.name == query.name)
            .cloned()
            .collect())
    }

    async fn application_objects(&self, application: &str) -> Result<ApplicationObjects> {
        match &self.application {
            Some(app) if app.uuid == application => Ok(self.objects.clone()),
            _ => Err(Error::RemoteNotFound(format!("application {application}"))),
        }
    }

    async fn get_vm(&self, vm: &str) -> Result<Vm> {
        self.vm_lookups.fetch_add(1, Ordering::SeqCst);
        self.vms
            .get(vm)
            .map(|server_uuid| Vm {
                server_uuid: server_uuid.clone(),
            })
            .ok_or_else(|| Error::RemoteNotFound(format!("vm {vm}")))
    }
}

/// Scripted monitoring service with call recording
#[derive(Default)]
pub struct MockMonitoring {
    pub probes: Mutex<Vec<Probe>>,
    pub groups: Mutex<Vec<ProbeGroup>>,
    pub alarms: Vec<Alarm>,
    pub group_seq: AtomicUsize,
    pub created_groups: Mutex<Vec<NewProbeGroup>>,
    pub created_probes: Mutex<Vec<RenderedProbe>>,
    pub updated_probes: Mutex<Vec<(String, RenderedProbe)>>,
    pub deleted_probes: Mutex<Vec<String>>,
    pub deleted_groups: Mutex<Vec<String>>,
    pub closed_alarms: Mutex<Vec<u64>>,
    pub group_fetches: AtomicUsize,
}

impl MockMonitoring {
    pub fn client(self: &Arc<Self>) -> Arc<dyn MonitoringClient> {
        Arc::clone(self) as Arc<dyn MonitoringClient>
    }
}

#[async_trait]
impl MonitoringClient for MockMonitoring {
    async fn list_probes(&self, _user: &str) -> Result<Vec<Probe>> {
        Ok(self.probes.lock().unwrap().clone())
    }

    async fn get_probe(&self, _user: &str, uuid: &str) -> Result<Probe> {
        self.probes
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.uuid == uuid)
            .cloned()
            .ok_or_else(|| Error::RemoteNotFound(format!("probe {uuid}")))
    }

    async fn create_probe(&self, _user: &str, probe: &RenderedProbe) -> Result<Probe> {
        self.created_probes.lock().unwrap().push(probe.clone());
        let created = Probe {
            uuid: format!("probe-{}", self.created_probes.lock().unwrap().len()),
            name: probe.name.clone(),
            probe_type: probe.probe_type.clone(),
            agent: probe.agent.clone(),
            group: Some(probe.group.clone()),
            config: probe.config.clone(),
            disabled: probe.disabled,
        };
        self.probes.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn put_probe(&self, _user: &str, uuid: &str, probe: &RenderedProbe) -> Result<Probe> {
        self.updated_probes
            .lock()
            .unwrap()
            .push((uuid.to_string(), probe.clone()));
        Ok(Probe {
            uuid: uuid.to_string(),
            name: probe.name.clone(),
            probe_type: probe.probe_type.clone(),
            agent: probe.agent.clone(),
            group: Some(probe.group.clone()),
            config: probe.config.clone(),
            disabled: probe.disabled,
        })
    }

    async fn delete_probe(&self, _user: &str, uuid: &str) -> Result<()> {
        self.deleted_probes.lock().unwrap().push(uuid.to_string());
        Ok(())
    }

    async fn list_probe_groups(&self, _user: &str) -> Result<Vec<ProbeGroup>> {
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn get_probe_group(&self, _user: &str, uuid: &str) -> Result<ProbeGroup> {
        self.group_fetches.fetch_add(1, Ordering::SeqCst);
        self.groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.uuid == uuid)
            .cloned()
            .ok_or_else(|| Error::RemoteNotFound(format!("probe group {uuid}")))
    }

    async fn create_probe_group(&self, _user: &str, group: &NewProbeGroup) -> Result<ProbeGroup> {
        self.created_groups.lock().unwrap().push(group.clone());
        let created = ProbeGroup {
            uuid: format!("group-{}", self.group_seq.fetch_add(1, Ordering::SeqCst) + 1),
            name: group.name.clone(),
            contacts: group.contacts.clone(),
        };
        self.groups.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn delete_probe_group(&self, _user: &str, uuid: &str) -> Result<()> {
        self.deleted_groups.lock().unwrap().push(uuid.to_string());
        Ok(())
    }

    async fn list_alarms(&self, _user: &str, _query: &AlarmQuery) -> Result<Vec<Alarm>> {
        Ok(self.alarms.clone())
    }

    async fn close_alarm(&self, _user: &str, id: u64) -> Result<()> {
        self.closed_alarms.lock().unwrap().push(id);
        Ok(())
    }
}

/// Build an instance record with a role tag and a known host
pub fn instance_record(
    uuid: &str,
    service: &str,
    role: Option<&str>,
    server: Option<&str>,
) -> InstanceRecord {
    InstanceRecord {
        uuid: uuid.to_string(),
        service_uuid: service.to_string(),
        params: Some(Params {
            tags: role
                .map(|r| BTreeMap::from([("role".to_string(), r.to_string())]))
                .unwrap_or_default(),
            server_uuid: server.map(str::to_string),
        }),
    }
}

/// Assemble application objects from instance records
pub fn application_objects(records: Vec<InstanceRecord>) -> ApplicationObjects {
    let mut instances: BTreeMap<String, Vec<InstanceRecord>> = BTreeMap::new();
    let mut services: BTreeMap<String, ServiceRecord> = BTreeMap::new();
    for record in records {
        services
            .entry(record.service_uuid.clone())
            .or_insert_with(|| ServiceRecord {
                uuid: record.service_uuid.clone(),
                params: None,
            });
        instances
            .entry(record.service_uuid.clone())
            .or_default()
            .push(record);
    }
    ApplicationObjects {
        instances,
        services,
    }
}

pub fn definition_set(entries: &[(&str, &[&str])]) -> DefinitionSet {
    entries
        .iter()
        .map(|(role, names)| {
            (
                role.to_string(),
                names
                    .iter()
                    .map(|name| ProbeDefinition {
                        name: name.to_string(),
                        probe_type: "cmd".to_string(),
                        global: false,
                        config: json!({"cmd": "true"}),
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .collect()
}

pub fn live_probe(
    uuid: &str,
    name: &str,
    agent: &str,
    group: &str,
    config: serde_json::Value,
) -> Probe {
    Probe {
        uuid: uuid.to_string(),
        name: name.to_string(),
        probe_type: "cmd".to_string(),
        agent: agent.to_string(),
        group: Some(group.to_string()),
        config,
        disabled: false,
    }
}

pub fn probe_group(uuid: &str, name: &str) -> ProbeGroup {
    ProbeGroup {
        uuid: uuid.to_string(),
        name: name.to_string(),
        contacts: vec![],
    }
}

pub fn alarm(id: u64, faults: &[(&str, &str)]) -> Alarm {
    Alarm {
        id,
        faults: faults
            .iter()
            .map(|(agent, probe)| AlarmFault {
                probe: probe.to_string(),
                event: FaultEvent {
                    agent: agent.to_string(),
                    time: None,
                    data: json!({"message": "check failed"}),
                },
            })
            .collect(),
    }
}
