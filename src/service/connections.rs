//! Connection lifecycle
//!
//! # Create
//! Parse the descriptor, encrypt the password, persist, then select the new
//! row. A row that fails selection is deleted again, so creation is
//! all-or-nothing.
//!
//! # Select
//! 1. Load the row and decrypt its credential. A credential that no longer
//!    decrypts marks the row unusable and leaves the session untouched.
//! 2. Record `lastUsed` (best effort).
//! 3. Connect, install the client and verify it. Any failure here leaves the
//!    session empty.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::descriptor::{self, ConnectionConfigInput, ConnectionInput, HostSpec, ParsedDescriptor};
use crate::engine::{ClientFactory, Provider};
use crate::error::{ProcheckError, Result};
use crate::session::{ActiveConnection, ConnectionStatus};
use crate::store::{ConnectionDraft, SavedConnection, Store};
use crate::vault::CredentialVault;

/// Changes applied by `connections.update`; absent fields are kept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,

    /// Re-parsed and re-encrypted when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_config: Option<ConnectionConfigInput>,
}

/// Saved connections and the active session
pub struct ConnectionService {
    store: Arc<Store>,
    vault: Arc<CredentialVault>,
    session: Arc<ActiveConnection>,
    factory: Arc<dyn ClientFactory>,
}

impl ConnectionService {
    pub fn new(
        store: Arc<Store>,
        vault: Arc<CredentialVault>,
        session: Arc<ActiveConnection>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self { store, vault, session, factory }
    }

    /// All saved connections; credentials stay encrypted
    pub fn fetch(&self) -> Result<Vec<SavedConnection>> {
        self.store.list_connections()
    }

    /// Persist a new connection and make it the active one
    pub async fn create(&self, input: ConnectionInput) -> Result<SavedConnection> {
        validate_nickname(&input.nickname)?;
        let parsed = descriptor::parse(input.provider, &input.connection_config)?;
        let draft = self.draft(input.nickname, input.provider, &parsed)?;

        let saved = self.store.insert_connection(&draft)?;
        tracing::info!(connection_id = saved.id, provider = %saved.provider, "Created connection");

        match self.select(saved.id).await {
            Ok(selected) => Ok(selected),
            Err(e) => {
                if let Err(cleanup) = self.store.delete_connection(saved.id) {
                    tracing::warn!(connection_id = saved.id, error = %cleanup, "Couldn't remove rejected connection");
                }
                Err(match e {
                    ProcheckError::InvalidConnection(_) => e,
                    other => ProcheckError::invalid_connection(other.message()),
                })
            }
        }
    }

    /// Install and verify a saved connection as the active session
    pub async fn select(&self, id: i64) -> Result<SavedConnection> {
        let saved = self.store.get_connection(id)?;

        let password = match self.vault.decrypt(&saved.password_ciphertext) {
            Ok(password) => password,
            Err(e) => {
                tracing::warn!(connection_id = id, error = %e, "Stored credential is unusable");
                if let Err(mark) = self.store.mark_unusable(id) {
                    tracing::warn!(connection_id = id, error = %mark, "Couldn't flag connection");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.store.touch_last_used(id, Utc::now()) {
            tracing::warn!(connection_id = id, error = %e, "Couldn't record last use");
        }

        let config = stored_descriptor(&saved, password).to_config(saved.provider)?;
        let client = match self.factory.connect(&config).await {
            Ok(client) => client,
            Err(e) => {
                self.session.clear().await;
                return Err(ProcheckError::invalid_connection(format!(
                    "'{}': {}",
                    saved.nickname,
                    e.message()
                )));
            }
        };

        self.session.install(Some(id), client).await;
        if !self.session.verify().await {
            return Err(ProcheckError::invalid_connection(format!(
                "'{}' failed verification",
                saved.nickname
            )));
        }

        self.store.get_connection(id)
    }

    /// Rewrite a saved connection. The active session is not affected.
    pub fn update(&self, update: ConnectionUpdate) -> Result<SavedConnection> {
        let existing = self.store.get_connection(update.id)?;
        let nickname = update.nickname.unwrap_or_else(|| existing.nickname.clone());
        validate_nickname(&nickname)?;
        let provider = update.provider.unwrap_or(existing.provider);

        let draft = match &update.connection_config {
            Some(config) => {
                let parsed = descriptor::parse(provider, config)?;
                self.draft(nickname, provider, &parsed)?
            }
            None => ConnectionDraft { nickname, provider, ..existing.to_draft() },
        };

        let saved = self.store.update_connection(update.id, &draft)?;
        tracing::info!(connection_id = saved.id, "Updated connection");
        Ok(saved)
    }

    /// Remove a saved connection. An installed client keeps running until disconnected.
    pub fn delete(&self, id: i64) -> Result<()> {
        self.store.delete_connection(id)?;
        tracing::info!(connection_id = id, "Deleted connection");
        Ok(())
    }

    /// Tear down the active session; succeeds even when teardown fails
    pub async fn disconnect(&self) {
        self.session.clear().await;
    }

    /// Switch the working database of the active session
    pub async fn switch(&self, database: &str) -> Result<bool> {
        if database.trim().is_empty() {
            return Err(ProcheckError::invalid_input("Database name cannot be empty"));
        }
        self.session.switch_database(database).await
    }

    pub async fn verify(&self) -> bool {
        self.session.verify().await
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.session.status().await
    }

    fn draft(
        &self,
        nickname: String,
        provider: Provider,
        parsed: &ParsedDescriptor,
    ) -> Result<ConnectionDraft> {
        let primary = parsed.primary().ok_or_else(|| {
            ProcheckError::no_hosts_parsed(format!("{provider} connection has no host"))
        })?;
        Ok(ConnectionDraft {
            nickname,
            provider,
            address: primary.host.clone(),
            port: primary.port,
            username: parsed.username.clone(),
            password_ciphertext: self.vault.encrypt(&parsed.password)?,
            default_database: parsed.database.clone(),
            hosts: parsed.hosts.clone(),
        })
    }
}

fn validate_nickname(nickname: &str) -> Result<()> {
    if nickname.trim().is_empty() {
        return Err(ProcheckError::invalid_input("Connection nickname cannot be empty"));
    }
    Ok(())
}

/// Rebuild the descriptor of a saved row around its decrypted password
fn stored_descriptor(saved: &SavedConnection, password: String) -> ParsedDescriptor {
    let hosts = if saved.hosts.is_empty() {
        vec![HostSpec { host: saved.address.clone(), port: saved.port }]
    } else {
        saved.hosts.clone()
    };

    ParsedDescriptor {
        username: saved.username.clone(),
        password,
        hosts,
        database: saved.default_database.clone(),
    }
}
