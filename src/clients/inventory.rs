//! Inventory service contract

use async_trait::async_trait;

use crate::error::Result;
use crate::{Application, ApplicationObjects, ApplicationQuery, Vm};

/// Client for the service/instance inventory
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// List applications matching the query
    async fn list_applications(&self, query: &ApplicationQuery) -> Result<Vec<Application>>;

    /// Fetch all instance and service records of one application
    async fn application_objects(&self, application: &str) -> Result<ApplicationObjects>;

    /// Look up the VM record of an instance to learn its host server
    async fn get_vm(&self, vm: &str) -> Result<Vm>;
}
