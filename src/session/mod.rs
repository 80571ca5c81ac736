//! Active Connection Context
//!
//! Holds the single live, verified [`DatabaseClient`] the engine works against.
//! The session is an explicit object handed to every evaluation call rather
//! than ambient global state.
//!
//! # Transitions
//! - [`ActiveConnection::install`]: tear down any prior client, install the new one (validity unknown)
//! - [`ActiveConnection::verify`]: ask the client; a failed check clears the slot
//! - [`ActiveConnection::switch_database`]: change database on the same client, then re-verify
//! - [`ActiveConnection::clear`]: tear down and empty; a no-op on an empty slot
//!
//! # Serialization
//! All transitions take the write lock and finish (teardown and verification
//! included) before releasing it. Evaluation runs hold a [`SessionLease`]
//! (read lock) for their whole duration, so a select, switch or disconnect
//! waits for in-flight evaluation and vice versa.
//!
//! # Teardown Failures
//! A client whose teardown fails is still dropped from the slot. The failure
//! is logged at `warn` and never surfaces to the caller.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::engine::{DatabaseClient, Provider};
use crate::error::{ProcheckError, Result};

/// Whether the installed client passed verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

#[derive(Default)]
struct Slot {
    client: Option<Arc<dyn DatabaseClient>>,
    validity: Validity,
    database: Option<String>,
    connection_id: Option<i64>,
}

impl Slot {
    /// Close the client (if any) and empty the slot
    async fn teardown(&mut self) {
        let connection_id = self.connection_id;
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                tracing::warn!(
                    connection_id,
                    provider = %client.provider(),
                    error = %e,
                    "Couldn't end connection pool; dropping client anyway"
                );
            } else {
                tracing::debug!(connection_id, "Closed active connection");
            }
        }

        *self = Self::default();
    }
}

/// Snapshot of the active session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub validity: Validity,
}

/// Process-wide single-slot session
#[derive(Default)]
pub struct ActiveConnection {
    slot: RwLock<Slot>,
}

impl ActiveConnection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any prior client with `client`. Validity starts as unknown.
    pub async fn install(&self, connection_id: Option<i64>, client: Arc<dyn DatabaseClient>) {
        let mut slot = self.slot.write().await;
        slot.teardown().await;

        let database = client.current_database().await;
        tracing::info!(connection_id, provider = %client.provider(), database = %database, "Installed connection");

        *slot = Slot {
            client: Some(client),
            validity: Validity::Unknown,
            database: Some(database),
            connection_id,
        };
    }

    /// Verify the installed client. An empty slot verifies as `false`;
    /// a failed verification clears the slot.
    pub async fn verify(&self) -> bool {
        let mut slot = self.slot.write().await;
        let Some(client) = slot.client.clone() else {
            return false;
        };

        let valid = match client.verify().await {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(connection_id = slot.connection_id, error = %e, "Verification errored");
                false
            }
        };

        if valid {
            slot.validity = Validity::Valid;
        } else {
            tracing::warn!(connection_id = slot.connection_id, "Connection failed verification");
            slot.validity = Validity::Invalid;
            slot.teardown().await;
        }

        valid
    }

    /// Change the working database without reconnecting, then re-verify.
    ///
    /// Returns `Ok(false)` (and clears the slot) when the switch or the
    /// verification fails, `Err(NoActiveConnection)` on an empty slot.
    pub async fn switch_database(&self, database: &str) -> Result<bool> {
        let mut slot = self.slot.write().await;
        let client = slot.client.clone().ok_or(ProcheckError::NoActiveConnection)?;

        if let Err(e) = client.use_database(database).await {
            tracing::warn!(database, error = %e, "Database switch failed");
            slot.teardown().await;
            return Ok(false);
        }

        match client.verify().await {
            Ok(true) => {
                tracing::info!(database, "Switched database");
                slot.database = Some(database.to_string());
                slot.validity = Validity::Valid;
                Ok(true)
            }
            Ok(false) | Err(_) => {
                tracing::warn!(database, "Connection failed verification after switch");
                slot.teardown().await;
                Ok(false)
            }
        }
    }

    /// Tear down and empty the slot. Safe on an empty slot.
    pub async fn clear(&self) {
        self.slot.write().await.teardown().await;
    }

    /// Read access for an evaluation run; requires a verified client
    pub async fn lease(&self) -> Result<SessionLease<'_>> {
        let guard = self.slot.read().await;
        let client = match (&guard.client, guard.validity) {
            (Some(client), Validity::Valid) => Arc::clone(client),
            _ => return Err(ProcheckError::NoActiveConnection),
        };

        Ok(SessionLease {
            database: guard.database.clone().unwrap_or_default(),
            connection_id: guard.connection_id,
            client,
            _guard: guard,
        })
    }

    pub async fn status(&self) -> ConnectionStatus {
        let slot = self.slot.read().await;
        ConnectionStatus {
            active: slot.client.is_some(),
            connection_id: slot.connection_id,
            provider: slot.client.as_ref().map(|client| client.provider()),
            database: slot.database.clone(),
            validity: slot.validity,
        }
    }
}

/// Shared hold on a verified session for the duration of one evaluation run
pub struct SessionLease<'a> {
    _guard: RwLockReadGuard<'a, Slot>,
    client: Arc<dyn DatabaseClient>,
    database: String,
    connection_id: Option<i64>,
}

impl SessionLease<'_> {
    pub fn client(&self) -> &dyn DatabaseClient {
        self.client.as_ref()
    }

    /// Working database of the session
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn connection_id(&self) -> Option<i64> {
        self.connection_id
    }
}
