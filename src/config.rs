//! Start-up configuration for one rank of the M-to-N layer.
//!
//! Read once when the process starts and never re-read. Deserializes from
//! any serde format; the field names below are the on-disk keys.

use crate::m2n_error::M2nError;
use crate::net::registry::ConnectionRegistry;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which process group this rank belongs to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// Data server: owns the pipeline output and dials render servers.
    #[serde(rename = "server")]
    DataServer,
    /// Render server: waits for data-server connections and receives.
    RenderServer,
    /// Client (or combined server): no socket hop, data passes through.
    #[default]
    Client,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct M2nConfig {
    /// Host name per render-server rank; may be shorter than the rank count.
    pub machine_names: Vec<String>,
    /// Number of data-server → render-server socket pairs.
    pub number_of_connections: usize,
    pub mode: ServerMode,
    /// Upper bound on waiting for a caller; `None` waits forever.
    pub wait_timeout_ms: Option<u64>,
    /// Host published when the machine list has no entry for a rank.
    pub host_fallback: String,
}

impl Default for M2nConfig {
    fn default() -> Self {
        Self {
            machine_names: Vec::new(),
            number_of_connections: 1,
            mode: ServerMode::Client,
            wait_timeout_ms: None,
            host_fallback: ConnectionRegistry::DEFAULT_HOST.to_string(),
        }
    }
}

impl M2nConfig {
    pub fn validate(&self) -> Result<(), M2nError> {
        if self.number_of_connections == 0 {
            return Err(M2nError::InvalidConfig(
                "number_of_connections must be at least 1".into(),
            ));
        }
        if self.host_fallback.is_empty() {
            return Err(M2nError::InvalidConfig("host_fallback is empty".into()));
        }
        if !self.machine_names.is_empty() && self.machine_names.len() < self.number_of_connections {
            log::error!(
                "machine list names {} hosts for {} connections; the rest use {}",
                self.machine_names.len(),
                self.number_of_connections,
                self.host_fallback
            );
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    /// A fresh registry seeded with the machine list.
    pub fn registry(&self) -> ConnectionRegistry {
        let mut reg = ConnectionRegistry::new(self.number_of_connections)
            .with_fallback_host(self.host_fallback.clone());
        for (rank, name) in self.machine_names.iter().enumerate() {
            reg.set_machine_name(rank, name);
        }
        reg
    }
}
