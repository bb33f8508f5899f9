//! Executing transfers: point-to-point, all-gather duplicate, and socket hops.
//!
//! Every path marshals fragments to opaque bytes right before they leave
//! the process and unmarshals them right after they arrive. Nothing here
//! retries: a failed send or receive is returned and the output is
//! whatever was assembled so far (i.e. nothing).

use crate::algs::collective::{CollectiveDomain, displacements};
use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::marshal::{Marshaler, MeshFragment};
use crate::algs::schedule::LocalSchedule;
use crate::algs::wire::{TAG_LENGTH, TAG_PAYLOAD, WireCount, cast_slice, read_record};
use crate::m2n_error::M2nError;
use crate::net::socket::SocketConnection;

/// Base tag for point-to-point redistribution; `offset(1)` carries payloads.
pub const REDISTRIBUTE_TAG: CommTag = CommTag::new(0x5200);

/// Move cells according to `schedule` with point-to-point messages.
///
/// The result holds this rank's kept prefix first, then every incoming
/// piece in ascending donor rank.
///
/// Stage 1 sends each receiver the byte length of its piece, stage 2 the
/// piece itself. Every posted handle is drained before returning, even when
/// an earlier one failed.
pub fn redistribute<C, M>(
    comm: &C,
    schedule: &LocalSchedule,
    fragment: &M::Fragment,
    marshaler: &M,
) -> Result<M::Fragment, M2nError>
where
    C: Communicator,
    M: Marshaler,
{
    if fragment.num_cells() != schedule.local_count {
        return Err(M2nError::CountMismatch(format!(
            "schedule built for {} cells, fragment has {}",
            schedule.local_count,
            fragment.num_cells()
        )));
    }
    let size_tag = REDISTRIBUTE_TAG.as_u16();
    let data_tag = REDISTRIBUTE_TAG.offset(1).as_u16();

    // 1) post size receives
    let mut size_recvs = Vec::with_capacity(schedule.recvs.len());
    for t in &schedule.recvs {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(t.from, size_tag, bytemuck::bytes_of_mut(&mut cnt));
        size_recvs.push((t, h));
    }

    // 2) marshal and send outgoing pieces: size, then payload
    let mut pending_sends = Vec::with_capacity(schedule.sends.len() * 2);
    let mut marshal_err = None;
    for t in &schedule.sends {
        let bytes = match marshaler
            .serialize(&fragment.extract_cells(t.cells.clone()))
            .and_then(|b| checked_piece_len(t.to, b.len()).map(|()| b))
        {
            Ok(b) => b,
            Err(e) => {
                // Receivers still expect a size; announce an empty piece so
                // they fail cleanly instead of hanging.
                marshal_err.get_or_insert(e);
                Vec::new()
            }
        };
        log::trace!("rank {} -> {}: {} cells, {} bytes", t.from, t.to, t.count(), bytes.len());
        let count = WireCount::new(bytes.len());
        pending_sends.push(comm.isend(t.to, size_tag, cast_slice(std::slice::from_ref(&count))));
        if !bytes.is_empty() {
            pending_sends.push(comm.isend(t.to, data_tag, &bytes));
        }
    }

    // 3) collect sizes (drain all even after an error)
    let mut maybe_err = marshal_err;
    let mut sizes = Vec::with_capacity(size_recvs.len());
    for (t, h) in size_recvs {
        match h.wait() {
            Some(data) if maybe_err.is_none() => match read_record::<WireCount>(&data) {
                Ok(c) => sizes.push((t, c.get())),
                Err(e) => maybe_err = Some(M2nError::comm(t.from, e.to_string())),
            },
            None if maybe_err.is_none() => {
                maybe_err = Some(M2nError::comm(t.from, "failed to receive piece size"));
            }
            _ => {}
        }
    }

    // 4) receive payloads
    let mut data_recvs = Vec::with_capacity(sizes.len());
    for (t, len) in sizes {
        if len == 0 {
            data_recvs.push((t, len, None));
            continue;
        }
        let mut buf = vec![0u8; len];
        let h = comm.irecv(t.from, data_tag, &mut buf);
        data_recvs.push((t, len, Some(h)));
    }
    let mut pieces = Vec::with_capacity(data_recvs.len() + 1);
    pieces.push(fragment.extract_cells(schedule.kept()));
    for (t, len, h) in data_recvs {
        let data = match h {
            Some(h) => h.wait(),
            None => Some(Vec::new()),
        };
        if maybe_err.is_some() {
            continue;
        }
        let piece = match data {
            Some(d) if d.len() == len => marshaler.deserialize(&d),
            Some(d) => Err(M2nError::comm(
                t.from,
                format!("expected {len} bytes, got {}", d.len()),
            )),
            None => Err(M2nError::comm(t.from, "failed to receive piece")),
        };
        match piece {
            Ok(p) if p.num_cells() == t.count() => pieces.push(p),
            Ok(p) => {
                maybe_err = Some(M2nError::CountMismatch(format!(
                    "rank {} scheduled {} cells, sent {}",
                    t.from,
                    t.count(),
                    p.num_cells()
                )))
            }
            Err(e) => maybe_err = Some(e),
        }
    }

    // 5) always drain sends
    for s in pending_sends {
        let _ = s.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(M::Fragment::append(pieces)),
    }
}

/// Pieces are announced with a 4-byte size.
fn checked_piece_len(to: usize, len: usize) -> Result<(), M2nError> {
    if u32::try_from(len).is_err() {
        return Err(M2nError::CountMismatch(format!(
            "piece for rank {to} is {len} bytes, over the 4-byte size field"
        )));
    }
    Ok(())
}

/// Every rank ends up with the union of every rank's fragment.
///
/// Marshals the whole local fragment, all-gathers the byte sizes, then
/// all-gathers the payloads and appends them in rank order. Bandwidth is
/// O(P²); use [`redistribute`] when a balanced share is enough.
pub fn duplicate_all_gather<C, M>(
    comm: &C,
    fragment: &M::Fragment,
    marshaler: &M,
) -> Result<M::Fragment, M2nError>
where
    C: CollectiveDomain,
    M: Marshaler,
{
    let bytes = marshaler.serialize(fragment)?;
    let counts: Vec<usize> = comm
        .all_gather_u64(bytes.len() as u64)?
        .into_iter()
        .map(|c| c as usize)
        .collect();
    let all = comm.all_gather_v(&bytes, &counts)?;
    drop(bytes);

    let displs = displacements(&counts);
    let pieces = counts
        .iter()
        .zip(&displs)
        .map(|(&len, &at)| marshaler.deserialize(&all[at..at + len]))
        .collect::<Result<Vec<_>, _>>()?;
    log::debug!(
        "rank {}: duplicated {} bytes from {} ranks",
        comm.rank(),
        all.len(),
        counts.len()
    );
    Ok(M::Fragment::append(pieces))
}

/// Send a fragment over a socket: byte length under [`TAG_LENGTH`], then
/// the payload under [`TAG_PAYLOAD`].
pub fn send_fragment<M: Marshaler>(
    socket: &mut SocketConnection,
    fragment: &M::Fragment,
    marshaler: &M,
) -> Result<(), M2nError> {
    let bytes = marshaler.serialize(fragment)?;
    socket.send_count(TAG_LENGTH, bytes.len())?;
    let sent = socket.send(TAG_PAYLOAD, &bytes)?;
    log::debug!("sent {} cells ({sent} bytes) over socket", fragment.num_cells());
    Ok(())
}

/// Counterpart of [`send_fragment`].
pub fn receive_fragment<M: Marshaler>(
    socket: &mut SocketConnection,
    marshaler: &M,
) -> Result<M::Fragment, M2nError> {
    let len = socket.receive_count(TAG_LENGTH)?;
    let mut buf = vec![0u8; len];
    socket.receive(TAG_PAYLOAD, &mut buf)?;
    let fragment = marshaler.deserialize(&buf)?;
    log::debug!("received {} cells ({len} bytes) over socket", fragment.num_cells());
    Ok(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::marshal::{CellBlock, CellBlockMarshaler};
    use crate::algs::schedule::RedistributionScheduler;

    fn block(n: usize, tag: u8) -> CellBlock {
        (0..n).map(|i| vec![tag, i as u8]).collect()
    }

    #[test]
    fn single_rank_redistribute_keeps_everything() {
        let frag = block(4, 1);
        let sched = RedistributionScheduler::balanced(1).schedule(&NoComm, 4).unwrap();
        let out = redistribute(&NoComm, &sched, &frag, &CellBlockMarshaler).unwrap();
        assert_eq!(out, frag);
    }

    #[test]
    fn schedule_fragment_mismatch_is_rejected() {
        let sched = RedistributionScheduler::balanced(1).schedule(&NoComm, 3).unwrap();
        assert!(matches!(
            redistribute(&NoComm, &sched, &block(4, 0), &CellBlockMarshaler),
            Err(M2nError::CountMismatch(_))
        ));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_piece_is_count_mismatch() {
        assert!(checked_piece_len(1, u32::MAX as usize).is_ok());
        assert!(matches!(
            checked_piece_len(1, u32::MAX as usize + 1),
            Err(M2nError::CountMismatch(_))
        ));
    }

    #[test]
    fn single_rank_duplicate_is_identity() {
        let frag = block(3, 9);
        let out = duplicate_all_gather(&NoComm, &frag, &CellBlockMarshaler).unwrap();
        assert_eq!(out, frag);
    }
}
