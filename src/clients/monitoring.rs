//! Monitoring service contract

use async_trait::async_trait;

use crate::error::Result;
use crate::{Alarm, AlarmQuery, NewProbeGroup, Probe, ProbeGroup, RenderedProbe};

/// Client for the probe/alarm monitoring service
///
/// All operations act on behalf of one account (`user`). Lookup methods
/// return [`crate::Error::RemoteNotFound`] for missing entities; every
/// other remote failure maps to [`crate::Error::RemoteFailure`].
#[async_trait]
pub trait MonitoringClient: Send + Sync {
    async fn list_probes(&self, user: &str) -> Result<Vec<Probe>>;

    async fn get_probe(&self, user: &str, uuid: &str) -> Result<Probe>;

    async fn create_probe(&self, user: &str, probe: &RenderedProbe) -> Result<Probe>;

    /// Replace the probe identified by `uuid` with the rendered record
    async fn put_probe(&self, user: &str, uuid: &str, probe: &RenderedProbe) -> Result<Probe>;

    async fn delete_probe(&self, user: &str, uuid: &str) -> Result<()>;

    async fn list_probe_groups(&self, user: &str) -> Result<Vec<ProbeGroup>>;

    async fn get_probe_group(&self, user: &str, uuid: &str) -> Result<ProbeGroup>;

    async fn create_probe_group(&self, user: &str, group: &NewProbeGroup) -> Result<ProbeGroup>;

    async fn delete_probe_group(&self, user: &str, uuid: &str) -> Result<()>;

    async fn list_alarms(&self, user: &str, query: &AlarmQuery) -> Result<Vec<Alarm>>;

    async fn close_alarm(&self, user: &str, id: u64) -> Result<()>;
}
