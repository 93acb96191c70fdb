pub mod alarms;
pub mod clients;
pub mod error;
pub mod probes;
pub mod queue;
pub mod topo;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

/// A live monitoring probe bound to a target agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Probe {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub probe_type: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub disabled: bool,
}

/// A remote container of probes sharing notification contacts, keyed by role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeGroup {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub contacts: Vec<String>,
}

/// Payload for creating a probe group
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewProbeGroup {
    pub name: String,
    pub contacts: Vec<String>,
}

/// A probe definition bound to one target, ready to apply remotely
///
/// `agent` is the server id for `global` definitions and the instance uuid
/// otherwise; templated config fields are already rendered. `existing` is
/// set when the probe updates a live record, carrying over that record's
/// identifier and disabled flag.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderedProbe {
    pub name: String,
    #[serde(rename = "type")]
    pub probe_type: String,
    pub agent: String,
    pub group: String,
    pub config: serde_json::Value,
    pub disabled: bool,
    #[serde(skip)]
    pub existing: Option<ExistingProbe>,
}

/// Identity of the live probe a [`RenderedProbe`] replaces
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingProbe {
    pub uuid: String,
    pub disabled: bool,
}

/// An application known to the inventory service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub uuid: String,
    pub name: String,
}

/// Query parameters for looking up applications
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApplicationQuery {
    pub name: String,
    pub include_master: bool,
}

/// Instance and service records of one application
///
/// Instances are keyed by owning service uuid. `BTreeMap` keeps every
/// traversal of the inventory deterministic.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationObjects {
    #[serde(default)]
    pub instances: BTreeMap<String, Vec<InstanceRecord>>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceRecord {
    pub uuid: String,
    pub service_uuid: String,
    #[serde(default)]
    pub params: Option<Params>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRecord {
    pub uuid: String,
    #[serde(default)]
    pub params: Option<Params>,
}

/// Tag bag shared by instance and service records
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Params {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub server_uuid: Option<String>,
}

/// Minimal VM record used for host resolution
#[derive(Debug, Clone, Deserialize)]
pub struct Vm {
    pub server_uuid: String,
}

/// An alarm raised by the monitoring service
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Alarm {
    pub id: u64,
    #[serde(default)]
    pub faults: Vec<AlarmFault>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AlarmFault {
    pub probe: String,
    pub event: FaultEvent,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FaultEvent {
    pub agent: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Query parameters for listing alarms
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct AlarmQuery {
    pub state: AlarmState,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlarmState {
    Open,
    Closed,
    All,
}
