//! Connection Descriptor Parser
//!
//! Normalizes the two ways a connection can be described into one
//! [`ParsedDescriptor`]:
//!
//! - a manual form (`address`, `port`, `username`, `password`, `defaultDatabase`)
//! - a connection-string literal, parsed with the provider's grammar
//!
//! # Connection String Grammar
//! ```text
//! scheme://[user[:password]@]host[:port][,host[:port]]*[/database][?options]
//! ```
//!
//! | provider | schemes |
//! |---|---|
//! | postgres | `postgres`, `postgresql` |
//! | mysql | `mysql`, `mariadb` |
//! | sqlite | `sqlite://<path>`, `sqlite:<path>`, or a bare path |
//!
//! User and password are percent-decoded. IPv6 hosts must be bracketed
//! (`[::1]:5432`). A literal that yields no host is rejected with
//! `NoHostsParsed` instead of producing an empty address.
//!
//! Every host is kept in order; only the first one is used to connect.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::{ConnectionConfig, Provider};
use crate::error::{ProcheckError, Result};

/// Input for creating a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInput {
    pub nickname: String,
    pub provider: Provider,
    pub connection_config: ConnectionConfigInput,
}

/// How the connection was described
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "config", rename_all = "lowercase")]
pub enum ConnectionConfigInput {
    /// Individual fields
    #[serde(rename_all = "camelCase")]
    Manual {
        address: String,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        default_database: Option<String>,
    },

    /// A single connection-string literal
    #[serde(rename_all = "camelCase")]
    String { connection_string: String },
}

impl std::fmt::Debug for ConnectionConfigInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual { address, port, username, default_database, .. } => f
                .debug_struct("Manual")
                .field("address", address)
                .field("port", port)
                .field("username", username)
                .field("password", &"<redacted>")
                .field("default_database", default_database)
                .finish(),
            Self::String { .. } => {
                f.debug_struct("String").field("connection_string", &"<redacted>").finish()
            }
        }
    }
}

/// One host of a (possibly multi-host) descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub host: String,

    /// Absent only for file-based providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Normalized descriptor
#[derive(Clone, PartialEq, Eq)]
pub struct ParsedDescriptor {
    pub username: String,
    pub password: String,
    /// Ordered, never empty
    pub hosts: Vec<HostSpec>,
    pub database: Option<String>,
}

impl std::fmt::Debug for ParsedDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedDescriptor")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("hosts", &self.hosts)
            .field("database", &self.database)
            .finish()
    }
}

impl ParsedDescriptor {
    /// The host the single-connection model connects to
    #[must_use]
    pub fn primary(&self) -> Option<&HostSpec> {
        self.hosts.first()
    }

    /// Build the engine connection config from the primary host
    pub fn to_config(&self, provider: Provider) -> Result<ConnectionConfig> {
        let primary = self.primary().ok_or_else(|| {
            ProcheckError::no_hosts_parsed(format!("{provider} descriptor has no host"))
        })?;
        Ok(match provider {
            Provider::SQLite => ConnectionConfig::sqlite(PathBuf::from(&primary.host)),
            Provider::Postgres | Provider::MySQL => ConnectionConfig {
                provider,
                host: Some(primary.host.clone()),
                port: primary.port.or_else(|| provider.default_port()),
                user: Some(self.username.clone()),
                password: Some(self.password.clone()),
                database: self.database.clone(),
                file: None,
            },
        })
    }
}

/// Parse either form of input into a normalized descriptor
pub fn parse(provider: Provider, input: &ConnectionConfigInput) -> Result<ParsedDescriptor> {
    match input {
        ConnectionConfigInput::Manual { address, port, username, password, default_database } => {
            let address = address.trim();
            if address.is_empty() {
                return Err(ProcheckError::invalid_input("Connection address is required"));
            }

            Ok(ParsedDescriptor {
                username: username.clone(),
                password: password.clone(),
                hosts: vec![HostSpec {
                    host: address.to_string(),
                    port: port.or_else(|| provider.default_port()),
                }],
                database: default_database.clone().filter(|db| !db.trim().is_empty()),
            })
        }
        ConnectionConfigInput::String { connection_string } => {
            parse_connection_string(provider, connection_string)
        }
    }
}

/// Parse a connection-string literal with the provider's grammar
pub fn parse_connection_string(provider: Provider, input: &str) -> Result<ParsedDescriptor> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ProcheckError::malformed_connection_string("Connection string is empty"));
    }

    match provider {
        Provider::SQLite => parse_sqlite(input),
        Provider::Postgres | Provider::MySQL => parse_network(provider, input),
    }
}

fn accepted_schemes(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::Postgres => &["postgres", "postgresql"],
        Provider::MySQL => &["mysql", "mariadb"],
        Provider::SQLite => &["sqlite"],
    }
}

fn parse_sqlite(input: &str) -> Result<ParsedDescriptor> {
    let path = if let Some(path) = input.strip_prefix("sqlite://") {
        path
    } else if let Some(path) = input.strip_prefix("sqlite:") {
        path
    } else if let Some((scheme, _)) = input.split_once("://") {
        return Err(ProcheckError::malformed_connection_string(format!(
            "Scheme '{scheme}' is not valid for sqlite"
        )));
    } else {
        input
    };

    // Options are not meaningful for a file path
    let path = path.split('?').next().unwrap_or_default().trim();
    if path.is_empty() {
        return Err(ProcheckError::no_hosts_parsed("sqlite connection string has no file path"));
    }

    Ok(ParsedDescriptor {
        username: String::new(),
        password: String::new(),
        hosts: vec![HostSpec { host: path.to_string(), port: None }],
        database: None,
    })
}

fn parse_network(provider: Provider, input: &str) -> Result<ParsedDescriptor> {
    let (scheme, rest) = input.split_once("://").ok_or_else(|| {
        ProcheckError::malformed_connection_string(format!(
            "Expected '{}://...'",
            accepted_schemes(provider)[0]
        ))
    })?;

    let scheme = scheme.to_lowercase();
    if !accepted_schemes(provider).contains(&scheme.as_str()) {
        return Err(ProcheckError::malformed_connection_string(format!(
            "Scheme '{scheme}' is not valid for {provider}"
        )));
    }

    // Options are accepted and ignored
    let rest = rest.split_once('?').map_or(rest, |(before, _)| before);

    // The last '@' ends the userinfo, so unencoded '@' in passwords still parse
    let (userinfo, location) = match rest.rfind('@') {
        Some(idx) => (Some(&rest[..idx]), &rest[idx + 1..]),
        None => (None, rest),
    };

    let (username, password) = match userinfo {
        Some(info) => match info.split_once(':') {
            Some((user, pass)) => (decode(user)?, decode(pass)?),
            None => (decode(info)?, String::new()),
        },
        None => (String::new(), String::new()),
    };

    let (host_list, database) = match location.split_once('/') {
        Some((hosts, db)) => (hosts, Some(decode(db)?).filter(|db| !db.is_empty())),
        None => (location, None),
    };

    let mut hosts = Vec::new();
    for entry in host_list.split(',') {
        if let Some(host) = parse_host(provider, entry.trim())? {
            hosts.push(host);
        }
    }

    if hosts.is_empty() {
        return Err(ProcheckError::no_hosts_parsed(format!(
            "{provider} connection string contains no host"
        )));
    }

    Ok(ParsedDescriptor { username, password, hosts, database })
}

/// Parse `host`, `host:port`, `[v6]` or `[v6]:port`. Empty hosts yield `None`.
fn parse_host(provider: Provider, entry: &str) -> Result<Option<HostSpec>> {
    if entry.is_empty() {
        return Ok(None);
    }

    let (host, port) = if let Some(bracketed) = entry.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']').ok_or_else(|| {
            ProcheckError::malformed_connection_string(format!("Unterminated IPv6 host '{entry}'"))
        })?;
        let port = match after {
            "" => None,
            after => Some(after.strip_prefix(':').ok_or_else(|| {
                ProcheckError::malformed_connection_string(format!("Invalid host '{entry}'"))
            })?),
        };
        (host, port)
    } else {
        match entry.split_once(':') {
            Some((_, port)) if port.contains(':') => {
                return Err(ProcheckError::malformed_connection_string(format!(
                    "IPv6 host '{entry}' must be bracketed"
                )))
            }
            Some((host, port)) => (host, Some(port)),
            None => (entry, None),
        }
    };

    if host.is_empty() {
        return Ok(None);
    }

    let port = match port {
        Some(port) => Some(port.parse::<u16>().map_err(|_| {
            ProcheckError::malformed_connection_string(format!("Invalid port '{port}'"))
        })?),
        None => provider.default_port(),
    };

    Ok(Some(HostSpec { host: host.to_string(), port }))
}

fn decode(raw: &str) -> Result<String> {
    percent_decode_str(raw).decode_utf8().map(|s| s.into_owned()).map_err(|_| {
        ProcheckError::malformed_connection_string("Percent-encoded value is not valid UTF-8")
    })
}
