//! Application wiring
//!
//! [`Procheck`] owns one store, one vault and one active session and hands
//! them to the three services. The CLI builds it once per command; the RPC
//! server builds it once per process, so a selected connection stays active
//! across requests.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::engine::{ClientFactory, EngineConnector};
use crate::error::Result;
use crate::service::{ConnectionService, ExecutionService, ProcedureService};
use crate::session::ActiveConnection;
use crate::store::Store;
use crate::vault::{AgeCipher, CredentialVault, SecretCipher};

/// Fully wired application
pub struct Procheck {
    pub connections: ConnectionService,
    pub procedures: ProcedureService,
    pub executions: ExecutionService,
    session: Arc<ActiveConnection>,
}

impl Procheck {
    /// Open the store and resolve the age identity described by `settings`
    pub fn open(settings: &Settings) -> Result<Self> {
        let store = Store::open(&settings.store_path()?)?;
        let cipher = AgeCipher::from_settings(settings)?;
        Ok(Self::from_parts(settings, Arc::new(store), Arc::new(cipher), Arc::new(EngineConnector)))
    }

    /// Wire explicit parts (tests, embedding)
    pub fn from_parts(
        settings: &Settings,
        store: Arc<Store>,
        cipher: Arc<dyn SecretCipher>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let session = Arc::new(ActiveConnection::new());
        let vault = Arc::new(CredentialVault::new(cipher));
        let timeout = settings.evaluation_timeout_ms.map(Duration::from_millis);

        Self {
            connections: ConnectionService::new(store.clone(), vault, session.clone(), factory),
            procedures: ProcedureService::new(session.clone()),
            executions: ExecutionService::new(store, session.clone(), timeout),
            session,
        }
    }

    /// Tear down the active session, if any
    pub async fn shutdown(&self) {
        self.session.clear().await;
    }
}
