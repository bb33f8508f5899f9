//! Rank → endpoint table for the M-to-N socket mesh.
//!
//! The registry is filled once during connection setup (machine names from
//! configuration, ports as waiters publish them) and only read afterwards.
//! A fresh registry is built for every initialization; nothing persists.

use crate::algs::collective::CollectiveDomain;
use crate::m2n_error::M2nError;
use serde::{Deserialize, Serialize};

/// Where one waiter rank can be reached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEndpoint {
    pub rank: usize,
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRegistry {
    /// Operator-supplied host names, indexed by rank; `""` means unset.
    machine_names: Vec<String>,
    /// One slot per connection (waiter rank).
    endpoints: Vec<Option<ConnectionEndpoint>>,
    /// Host used when no machine name is configured for a rank.
    fallback_host: String,
}

impl ConnectionRegistry {
    pub const DEFAULT_HOST: &'static str = "localhost";

    /// Empty registry with `number_of_connections` endpoint slots.
    pub fn new(number_of_connections: usize) -> Self {
        Self {
            machine_names: Vec::new(),
            endpoints: vec![None; number_of_connections],
            fallback_host: Self::DEFAULT_HOST.to_string(),
        }
    }

    pub fn with_fallback_host(mut self, host: impl Into<String>) -> Self {
        self.fallback_host = host.into();
        self
    }

    pub fn number_of_connections(&self) -> usize {
        self.endpoints.len()
    }

    /// Record an operator-supplied host name for `rank`.
    ///
    /// Empty names are ignored; the table grows as needed.
    pub fn set_machine_name(&mut self, rank: usize, name: &str) {
        if name.is_empty() {
            return;
        }
        if rank >= self.machine_names.len() {
            self.machine_names.resize(rank + 1, String::new());
        }
        self.machine_names[rank] = name.to_string();
    }

    pub fn machine_name(&self, rank: usize) -> Option<&str> {
        self.machine_names
            .get(rank)
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    /// Host a waiter at `rank` should publish.
    ///
    /// Without any machine names the fallback is used quietly. A non-empty
    /// table that does not cover `rank` is a configuration error: it is
    /// logged and the fallback substituted.
    pub fn resolve_host(&self, rank: usize) -> String {
        if self.machine_names.is_empty() {
            return self.fallback_host.clone();
        }
        match self.machine_name(rank) {
            Some(name) => name.to_string(),
            None => {
                log::error!(
                    "machine list has {} entries but no name for rank {rank} of {} connections; using {}",
                    self.machine_names.len(),
                    self.number_of_connections(),
                    self.fallback_host
                );
                self.fallback_host.clone()
            }
        }
    }

    /// Publish the endpoint for `rank`.
    ///
    /// An out-of-range rank is logged and reported, but leaves the registry
    /// untouched; callers that tolerate mismatched machine lists may ignore it.
    pub fn set_endpoint(&mut self, rank: usize, port: u16, host: &str) -> Result<(), M2nError> {
        let len = self.endpoints.len();
        match self.endpoints.get_mut(rank) {
            Some(slot) => {
                *slot = Some(ConnectionEndpoint {
                    rank,
                    host: host.to_string(),
                    port,
                });
                Ok(())
            }
            None => {
                log::error!("set_endpoint: rank {rank} out of range for {len} connections");
                Err(M2nError::RankOutOfRange { rank, len })
            }
        }
    }

    /// Endpoint for `rank`, or `None` if unset or out of range.
    pub fn endpoint(&self, rank: usize) -> Option<&ConnectionEndpoint> {
        self.endpoints.get(rank).and_then(Option::as_ref)
    }

    /// All published endpoints, ascending rank.
    pub fn endpoints(&self) -> impl Iterator<Item = &ConnectionEndpoint> {
        self.endpoints.iter().flatten()
    }

    /// True once every slot has been published.
    pub fn is_complete(&self) -> bool {
        self.endpoints.iter().all(Option::is_some)
    }

    /// Collective: merge every rank's own endpoint into every registry.
    ///
    /// Each rank passes the endpoint it published locally (or `None` if it
    /// is not a waiter). Afterwards every rank in `comm` holds the same
    /// endpoint table, ready to hand to the calling side.
    pub fn gather_endpoints<C: CollectiveDomain>(
        &mut self,
        comm: &C,
        mine: Option<&ConnectionEndpoint>,
    ) -> Result<(), M2nError> {
        let port = mine.map_or(0, |e| e.port as u64);
        let host = mine.map_or(&[][..], |e| e.host.as_bytes());

        let ports = comm.all_gather_u64(port)?;
        let lens: Vec<usize> = comm
            .all_gather_u64(host.len() as u64)?
            .into_iter()
            .map(|l| l as usize)
            .collect();
        let hosts = comm.all_gather_v(host, &lens)?;

        let mut at = 0;
        for (rank, (&port, &len)) in ports.iter().zip(&lens).enumerate() {
            let name = &hosts[at..at + len];
            at += len;
            if port == 0 {
                continue;
            }
            let name = std::str::from_utf8(name)
                .map_err(|e| M2nError::comm(rank, format!("host name is not UTF-8: {e}")))?;
            let port = u16::try_from(port)
                .map_err(|_| M2nError::comm(rank, format!("port {port} out of range")))?;
            // Ranks beyond the slot table are logged by set_endpoint and skipped.
            let _ = self.set_endpoint(rank, port, name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn endpoint_round_trip_is_per_rank() {
        let mut reg = ConnectionRegistry::new(3);
        reg.set_endpoint(1, 4000, "render-1").unwrap();
        reg.set_endpoint(2, 4001, "render-2").unwrap();
        let e = reg.endpoint(1).unwrap();
        assert_eq!((e.host.as_str(), e.port), ("render-1", 4000));
        assert!(reg.endpoint(0).is_none());
        assert!(!reg.is_complete());
    }

    #[test]
    fn out_of_range_endpoint_is_rejected_without_change() {
        let mut reg = ConnectionRegistry::new(2);
        let before = reg.clone();
        assert!(matches!(
            reg.set_endpoint(5, 1, "h"),
            Err(M2nError::RankOutOfRange { rank: 5, len: 2 })
        ));
        assert_eq!(reg, before);
    }

    #[test]
    fn machine_names_grow_and_ignore_empty() {
        let mut reg = ConnectionRegistry::new(1);
        reg.set_machine_name(2, "c");
        reg.set_machine_name(0, "");
        assert_eq!(reg.machine_name(2), Some("c"));
        assert_eq!(reg.machine_name(0), None);
        reg.set_machine_name(2, "c2");
        assert_eq!(reg.machine_name(2), Some("c2"));
    }

    #[test]
    fn short_machine_list_falls_back() {
        let mut reg = ConnectionRegistry::new(3);
        reg.set_machine_name(0, "node-a");
        reg.set_machine_name(1, "node-b");
        assert_eq!(reg.resolve_host(1), "node-b");
        assert_eq!(reg.resolve_host(2), "localhost");
        assert_eq!(ConnectionRegistry::new(1).resolve_host(0), "localhost");
    }

    #[test]
    fn gather_on_single_rank_keeps_own_endpoint() {
        let mut reg = ConnectionRegistry::new(1);
        let mine = ConnectionEndpoint {
            rank: 0,
            host: "h0".into(),
            port: 5555,
        };
        reg.gather_endpoints(&NoComm, Some(&mine)).unwrap();
        assert_eq!(reg.endpoint(0), Some(&mine));
        assert!(reg.is_complete());
    }
}
