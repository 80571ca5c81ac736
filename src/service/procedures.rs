//! Procedure browsing against the active session

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::ProcedureParameter;
use crate::error::{ProcheckError, Result};
use crate::session::{ActiveConnection, SessionLease};

/// Read-only catalog operations; each needs a verified session
pub struct ProcedureService {
    session: Arc<ActiveConnection>,
}

impl ProcedureService {
    pub fn new(session: Arc<ActiveConnection>) -> Self {
        Self { session }
    }

    /// Procedure names grouped by database
    pub async fn list_procedures(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let lease = self.session.lease().await?;
        lease.client().list_procedures().await
    }

    pub async fn list_databases(&self) -> Result<Vec<String>> {
        let lease = self.session.lease().await?;
        lease.client().list_databases().await
    }

    /// Source text of a procedure; an empty `database` means the session's
    pub async fn fetch_content(&self, database: &str, name: &str) -> Result<String> {
        let lease = self.session.lease().await?;
        let database = resolve_database(&lease, database);
        lease.client().fetch_procedure(&database, required(name)?).await
    }

    /// Declared parameters of a procedure, in position order
    pub async fn get_procedure_parameters(
        &self,
        database: &str,
        name: &str,
    ) -> Result<Vec<ProcedureParameter>> {
        let lease = self.session.lease().await?;
        let database = resolve_database(&lease, database);
        let mut parameters = lease.client().procedure_parameters(&database, required(name)?).await?;
        parameters.sort_by_key(|p| p.position);
        Ok(parameters)
    }
}

fn resolve_database(lease: &SessionLease<'_>, database: &str) -> String {
    if database.trim().is_empty() {
        lease.database().to_string()
    } else {
        database.to_string()
    }
}

fn required(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProcheckError::invalid_input("Procedure name cannot be empty"));
    }
    Ok(name)
}
