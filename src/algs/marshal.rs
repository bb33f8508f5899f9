//! Fragment and marshaling seams.
//!
//! The transfer layer never looks inside a mesh fragment: it only needs to
//! count cells, cut out a contiguous cell range, glue pieces back together,
//! and turn a fragment into bytes and back. [`MeshFragment`] and
//! [`Marshaler`] capture exactly that.
//!
//! [`CellBlock`] is a minimal fragment whose cells are opaque byte strings,
//! with [`CellBlockMarshaler`] as its length-prefixed encoding.

use crate::algs::wire::{WireCount, cast_slice, read_record};
use crate::m2n_error::M2nError;
use bytes::{BufMut, Bytes, BytesMut};
use std::mem::size_of;
use std::ops::Range;

/// A local piece of cell data that can be split and merged.
pub trait MeshFragment: Sized + Send {
    /// Number of cells in this piece.
    fn num_cells(&self) -> usize;
    /// Copy of the cells in `cells` (local numbering), preserving order.
    fn extract_cells(&self, cells: Range<usize>) -> Self;
    /// Merge `pieces` into one fragment; cells keep the order of `pieces`.
    fn append(pieces: Vec<Self>) -> Self;
}

/// Serialize/deserialize a fragment to an opaque byte blob.
pub trait Marshaler {
    type Fragment: MeshFragment;

    fn serialize(&self, fragment: &Self::Fragment) -> Result<Vec<u8>, M2nError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Fragment, M2nError>;
}

impl<M: Marshaler + ?Sized> Marshaler for &M {
    type Fragment = M::Fragment;

    fn serialize(&self, fragment: &Self::Fragment) -> Result<Vec<u8>, M2nError> {
        (**self).serialize(fragment)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Fragment, M2nError> {
        (**self).deserialize(bytes)
    }
}

/// Fragment whose cells are opaque byte strings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellBlock {
    cells: Vec<Bytes>,
}

impl CellBlock {
    pub fn new(cells: Vec<Bytes>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Bytes] {
        &self.cells
    }

    pub fn push(&mut self, cell: impl Into<Bytes>) {
        self.cells.push(cell.into());
    }
}

impl<T: Into<Bytes>> FromIterator<T> for CellBlock {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl MeshFragment for CellBlock {
    fn num_cells(&self) -> usize {
        self.cells.len()
    }

    fn extract_cells(&self, cells: Range<usize>) -> Self {
        let end = cells.end.min(self.cells.len());
        let start = cells.start.min(end);
        Self {
            cells: self.cells[start..end].to_vec(),
        }
    }

    fn append(pieces: Vec<Self>) -> Self {
        let total = pieces.iter().map(|p| p.cells.len()).sum();
        let mut cells = Vec::with_capacity(total);
        for p in pieces {
            cells.extend(p.cells);
        }
        Self { cells }
    }
}

/// Layout: `WireCount n`, then `n` × `WireCount len`, then the cell bytes
/// back to back.
#[derive(Clone, Copy, Debug, Default)]
pub struct CellBlockMarshaler;

impl Marshaler for CellBlockMarshaler {
    type Fragment = CellBlock;

    fn serialize(&self, fragment: &CellBlock) -> Result<Vec<u8>, M2nError> {
        let body: usize = fragment.cells.iter().map(Bytes::len).sum();
        let header = size_of::<WireCount>() * (fragment.cells.len() + 1);
        let mut out = BytesMut::with_capacity(header + body);
        out.put_slice(cast_slice(&[WireCount::new(fragment.cells.len())]));
        for cell in &fragment.cells {
            if u32::try_from(cell.len()).is_err() {
                return Err(M2nError::Marshal(format!(
                    "cell of {} bytes exceeds the 32-bit length field",
                    cell.len()
                )));
            }
            out.put_slice(cast_slice(&[WireCount::new(cell.len())]));
        }
        for cell in &fragment.cells {
            out.put_slice(cell);
        }
        Ok(out.to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CellBlock, M2nError> {
        const W: usize = size_of::<WireCount>();
        let short = |what: &str| M2nError::Marshal(format!("buffer too short for {what}"));

        let n = read_record::<WireCount>(bytes.get(..W).ok_or_else(|| short("cell count"))?)?.get();
        let lens_end = W
            .checked_mul(n + 1)
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| short("length table"))?;
        let lens: Vec<usize> = bytes[W..lens_end]
            .chunks_exact(W)
            .map(|c| read_record::<WireCount>(c).map(|w| w.get()))
            .collect::<Result<_, _>>()?;

        let body = Bytes::copy_from_slice(&bytes[lens_end..]);
        let expected: usize = lens.iter().sum();
        if expected != body.len() {
            return Err(M2nError::Marshal(format!(
                "length table announces {expected} bytes, body has {}",
                body.len()
            )));
        }
        let mut cells = Vec::with_capacity(n);
        let mut at = 0;
        for len in lens {
            cells.push(body.slice(at..at + len));
            at += len;
        }
        Ok(CellBlock { cells })
    }
}
