//! Weighted cell redistribution scheduling.
//!
//! Given every rank's local cell count and a per-rank weight, compute the
//! point-to-point transfers that leave each rank holding a share of the
//! global cells proportional to its weight.
//!
//! The computation is split in two layers:
//! - [`compute_targets`] and [`plan_transfers`] are pure functions over the
//!   global count vector, usable (and tested) without any communicator.
//! - [`RedistributionScheduler::schedule`] gathers the counts over a
//!   [`CollectiveDomain`] and keeps only the entries touching this rank.
//!
//! # Cell ranges
//! A donor keeps its first `target` cells and ships the tail
//! `target..count`, split into consecutive ranges in receiver-rank order.
//! A receiver appends incoming ranges after its own cells in donor-rank
//! order; [`Transfer::cells`] is always expressed in the donor's local
//! numbering.

use crate::algs::collective::CollectiveDomain;
use crate::m2n_error::M2nError;
use itertools::Itertools;
use std::ops::Range;

/// One scheduled move of a contiguous block of donor cells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub from: usize,
    pub to: usize,
    /// Range in the donor's pre-redistribution cell numbering.
    pub cells: Range<usize>,
}

impl Transfer {
    pub fn count(&self) -> usize {
        self.cells.len()
    }
}

/// Weights for funneling onto the first `valid` ranks.
///
/// `valid == 0` means "all ranks" (plain balancing); `valid > num_procs`
/// clamps to `num_procs`.
pub fn funnel_weights(num_procs: usize, valid: usize) -> Vec<f64> {
    let valid = if valid == 0 { num_procs } else { valid.min(num_procs) };
    (0..num_procs)
        .map(|r| if r < valid { 1.0 } else { 0.0 })
        .collect()
}

/// Per-rank target counts for `total` cells under `weights`.
///
/// Targets are differences of rounded cumulative boundaries, so they sum to
/// exactly `total`, the last rank absorbs the rounding remainder, and equal
/// weights never differ by more than one cell.
pub fn compute_targets(total: usize, weights: &[f64]) -> Result<Vec<usize>, M2nError> {
    if weights.is_empty() {
        return Err(M2nError::InvalidWeights("empty weight vector".into()));
    }
    if let Some((r, w)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(M2nError::InvalidWeights(format!(
            "weight {w} for rank {r} is not a finite non-negative number"
        )));
    }
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return Err(M2nError::InvalidWeights("weights sum to zero".into()));
    }

    let n = weights.len();
    let mut bounds = Vec::with_capacity(n + 1);
    bounds.push(0usize);
    let mut acc = 0.0;
    for (r, w) in weights.iter().enumerate() {
        acc += w;
        // Once the remaining weight is zero the boundary is pinned to the
        // total, so trailing zero-weight ranks get exactly nothing.
        let b = if r + 1 == n || acc >= sum {
            total
        } else {
            ((total as f64 * acc / sum).round() as usize).min(total)
        };
        bounds.push(b);
    }
    Ok(bounds
        .into_iter()
        .tuple_windows()
        .map(|(lo, hi)| hi.saturating_sub(lo))
        .collect())
}

/// Match donors to receivers in rank order.
///
/// Lowest-rank donor pairs with lowest-rank receiver; each pair moves
/// `min(excess, deficit)` cells. Ranks already at target appear in no
/// entry. The result is ordered by donor, then receiver.
pub fn plan_transfers(counts: &[usize], targets: &[usize]) -> Result<Vec<Transfer>, M2nError> {
    if counts.len() != targets.len() {
        return Err(M2nError::CountMismatch(format!(
            "{} counts but {} targets",
            counts.len(),
            targets.len()
        )));
    }
    let have: usize = counts.iter().sum();
    let want: usize = targets.iter().sum();
    if have != want {
        return Err(M2nError::CountMismatch(format!(
            "{have} cells held but {want} targeted"
        )));
    }

    // (rank, next cell to ship, cells left to ship)
    let mut donors: Vec<(usize, usize, usize)> = counts
        .iter()
        .zip(targets)
        .enumerate()
        .filter(|(_, (c, t))| c > t)
        .map(|(r, (&c, &t))| (r, t, c - t))
        .collect();
    let mut receivers: Vec<(usize, usize)> = counts
        .iter()
        .zip(targets)
        .enumerate()
        .filter(|(_, (c, t))| c < t)
        .map(|(r, (&c, &t))| (r, t - c))
        .collect();

    let mut out = Vec::new();
    let (mut d, mut v) = (0, 0);
    while d < donors.len() && v < receivers.len() {
        let (from, start, excess) = donors[d];
        let (to, deficit) = receivers[v];
        let n = excess.min(deficit);
        out.push(Transfer {
            from,
            to,
            cells: start..start + n,
        });
        donors[d] = (from, start + n, excess - n);
        receivers[v] = (to, deficit - n);
        if donors[d].2 == 0 {
            d += 1;
        }
        if receivers[v].1 == 0 {
            v += 1;
        }
    }
    Ok(out)
}

/// This rank's slice of a global schedule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalSchedule {
    pub rank: usize,
    pub local_count: usize,
    pub target: usize,
    /// Outgoing transfers, ascending receiver rank.
    pub sends: Vec<Transfer>,
    /// Incoming transfers, ascending donor rank.
    pub recvs: Vec<Transfer>,
}

impl LocalSchedule {
    /// Extract `rank`'s entries from a global plan.
    pub fn from_plan(rank: usize, local_count: usize, target: usize, plan: &[Transfer]) -> Self {
        let sends = plan.iter().filter(|t| t.from == rank).cloned().collect();
        let recvs = plan.iter().filter(|t| t.to == rank).cloned().collect();
        Self {
            rank,
            local_count,
            target,
            sends,
            recvs,
        }
    }

    /// True when this rank neither sends nor receives.
    pub fn is_empty(&self) -> bool {
        self.sends.is_empty() && self.recvs.is_empty()
    }

    /// Cells this rank keeps: always a prefix of its local numbering.
    pub fn kept(&self) -> Range<usize> {
        0..self.local_count.min(self.target)
    }
}

/// Computes per-rank schedules over a collective domain.
#[derive(Clone, Debug)]
pub struct RedistributionScheduler {
    weights: Vec<f64>,
}

impl RedistributionScheduler {
    /// Scheduler with explicit per-rank weights (indexed by rank).
    pub fn weighted(weights: Vec<f64>) -> Self {
        Self { weights }
    }

    /// Equal weights: plain load balancing.
    pub fn balanced(num_procs: usize) -> Self {
        Self::funnel(num_procs, 0)
    }

    /// Funnel every cell onto ranks `0..valid` (see [`funnel_weights`]).
    pub fn funnel(num_procs: usize, valid: usize) -> Self {
        Self {
            weights: funnel_weights(num_procs, valid),
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Collective: every rank in `comm` must call this in the same order.
    ///
    /// Gathers the local counts (one all-gather, whose sum is the global
    /// total), computes the global plan identically on every rank, and
    /// returns the part involving this rank.
    pub fn schedule<C: CollectiveDomain>(
        &self,
        comm: &C,
        local_count: usize,
    ) -> Result<LocalSchedule, M2nError> {
        let me = comm.rank();
        if self.weights.len() != comm.size() {
            return Err(M2nError::CountMismatch(format!(
                "{} weights for a domain of {} ranks",
                self.weights.len(),
                comm.size()
            )));
        }
        let counts: Vec<usize> = comm
            .all_gather_u64(local_count as u64)?
            .into_iter()
            .map(|c| c as usize)
            .collect();
        if counts[me] != local_count {
            return Err(M2nError::CountMismatch(format!(
                "all-gather reported {} cells for rank {me}, expected {local_count}",
                counts[me]
            )));
        }
        let total: usize = counts.iter().sum();
        let targets = compute_targets(total, &self.weights)?;
        let plan = plan_transfers(&counts, &targets)?;
        let local = LocalSchedule::from_plan(me, local_count, targets[me], &plan);
        log::debug!(
            "rank {me}: {local_count} -> {} cells ({} sends, {} recvs, {} global transfers)",
            local.target,
            local.sends.len(),
            local.recvs.len(),
            plan.len()
        );
        Ok(local)
    }
}
