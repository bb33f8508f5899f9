//! Collective operations over a [`Communicator`].
//!
//! Every rank in the domain must issue the same collectives in the same
//! order: calls are matched by issue order, not by tag. A rank that skips
//! one stalls (or corrupts) every later collective on its peers.
//!
//! The default methods are built from point-to-point messages under
//! [`COLLECTIVE_TAG`]; backends with native collectives (MPI) override them.

use crate::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
use crate::algs::wire::{WireWord, cast_slice, read_record};
use crate::m2n_error::M2nError;

/// Reserved for collective traffic; user exchanges must pick other tags.
pub const COLLECTIVE_TAG: CommTag = CommTag::new(0xC011);

/// Running-sum displacements for variable-length gathers.
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0usize, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect()
}

/// Collective-communication domain: sum, all-gather, variable all-gather.
pub trait CollectiveDomain: Communicator {
    /// One value per rank, indexed by rank.
    fn all_gather_u64(&self, local: u64) -> Result<Vec<u64>, M2nError> {
        let me = self.rank();
        let n = self.size();
        let tag = COLLECTIVE_TAG.as_u16();

        let mut pending = Vec::with_capacity(n.saturating_sub(1));
        for peer in (0..n).filter(|&p| p != me) {
            let mut buf = [0u8; 8];
            pending.push((peer, self.irecv(peer, tag, &mut buf)));
        }
        let word = WireWord::new(local);
        let sends: Vec<_> = (0..n)
            .filter(|&p| p != me)
            .map(|peer| self.isend(peer, tag, cast_slice(std::slice::from_ref(&word))))
            .collect();

        let mut out = vec![0u64; n];
        out[me] = local;
        let mut maybe_err = None;
        for (peer, h) in pending {
            match h.wait() {
                Some(data) if maybe_err.is_none() => match read_record::<WireWord>(&data) {
                    Ok(w) => out[peer] = w.get(),
                    Err(e) => maybe_err = Some(M2nError::comm(peer, e.to_string())),
                },
                None if maybe_err.is_none() => {
                    maybe_err = Some(M2nError::comm(peer, "all-gather receive failed"));
                }
                _ => {} // already failed; just drain
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Global sum visible on every rank.
    fn all_reduce_sum(&self, local: u64) -> Result<u64, M2nError> {
        Ok(self.all_gather_u64(local)?.iter().sum())
    }

    /// Concatenate every rank's `local` bytes in rank order.
    ///
    /// `counts[r]` must be rank `r`'s byte count on every rank (usually the
    /// result of a preceding [`all_gather_u64`](Self::all_gather_u64)).
    fn all_gather_v(&self, local: &[u8], counts: &[usize]) -> Result<Vec<u8>, M2nError> {
        let me = self.rank();
        let n = self.size();
        check_counts(me, n, local.len(), counts)?;
        let tag = COLLECTIVE_TAG.as_u16();
        let displs = displacements(counts);
        let total: usize = counts.iter().sum();

        // Zero-length contributions are skipped on both ends; every rank
        // knows `counts`, so the skip is symmetric.
        let mut pending = Vec::new();
        for peer in (0..n).filter(|&p| p != me && counts[p] > 0) {
            let mut buf = vec![0u8; counts[peer]];
            pending.push((peer, self.irecv(peer, tag, &mut buf)));
        }
        let sends: Vec<_> = if local.is_empty() {
            Vec::new()
        } else {
            (0..n)
                .filter(|&p| p != me)
                .map(|peer| self.isend(peer, tag, local))
                .collect()
        };

        let mut out = vec![0u8; total];
        out[displs[me]..displs[me] + local.len()].copy_from_slice(local);
        let mut maybe_err = None;
        for (peer, h) in pending {
            match h.wait() {
                Some(data) if maybe_err.is_none() => {
                    if data.len() == counts[peer] {
                        out[displs[peer]..displs[peer] + data.len()].copy_from_slice(&data);
                    } else {
                        maybe_err = Some(M2nError::comm(
                            peer,
                            format!("expected {} bytes, got {}", counts[peer], data.len()),
                        ));
                    }
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(M2nError::comm(peer, "all-gather-v receive failed"));
                }
                _ => {}
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Synchronization point for the whole domain.
    fn barrier(&self) -> Result<(), M2nError> {
        self.all_gather_u64(0).map(|_| ())
    }
}

fn check_counts(me: usize, n: usize, local_len: usize, counts: &[usize]) -> Result<(), M2nError> {
    if counts.len() != n {
        return Err(M2nError::CountMismatch(format!(
            "{} counts for a domain of {n} ranks",
            counts.len()
        )));
    }
    if counts[me] != local_len {
        return Err(M2nError::CountMismatch(format!(
            "rank {me} announced {} bytes but contributes {local_len}",
            counts[me]
        )));
    }
    Ok(())
}

impl CollectiveDomain for NoComm {}
impl CollectiveDomain for ThreadComm {}

#[cfg(feature = "mpi-support")]
impl CollectiveDomain for crate::algs::communicator::MpiComm {
    fn all_gather_u64(&self, local: u64) -> Result<Vec<u64>, M2nError> {
        use mpi::traits::*;
        let mut out = vec![0u64; self.size()];
        self.inner.world.all_gather_into(&local, &mut out[..]);
        Ok(out)
    }

    fn all_reduce_sum(&self, local: u64) -> Result<u64, M2nError> {
        use mpi::collective::SystemOperation;
        use mpi::traits::*;
        let mut total = 0u64;
        self.inner
            .world
            .all_reduce_into(&local, &mut total, SystemOperation::sum());
        Ok(total)
    }

    fn all_gather_v(&self, local: &[u8], counts: &[usize]) -> Result<Vec<u8>, M2nError> {
        use mpi::datatype::PartitionMut;
        use mpi::traits::*;
        check_counts(self.rank(), self.size(), local.len(), counts)?;
        let displs = displacements(counts);
        let total: usize = counts.iter().sum();
        let to_count = |v: &usize| {
            i32::try_from(*v).map_err(|_| M2nError::CountMismatch(format!("{v} exceeds MPI count range")))
        };
        let counts_i: Vec<i32> = counts.iter().map(to_count).collect::<Result<_, _>>()?;
        let displs_i: Vec<i32> = displs.iter().map(to_count).collect::<Result<_, _>>()?;
        let mut out = vec![0u8; total];
        {
            let mut partition = PartitionMut::new(&mut out[..], counts_i, displs_i);
            self.inner.world.all_gather_varcount_into(local, &mut partition);
        }
        Ok(out)
    }

    fn barrier(&self) -> Result<(), M2nError> {
        use mpi::traits::*;
        self.inner.world.barrier();
        Ok(())
    }
}
