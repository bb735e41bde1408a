//! Fixed, little-endian wire types for exchange paths.

use bytemuck::{Pod, Zeroable};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a received byte buffer into owned values.
///
/// Received buffers carry no alignment guarantee, so this copies instead of
/// reinterpreting in place.
pub fn decode_vec<T: Pod>(raw: &[u8]) -> Vec<T> {
    let width = std::mem::size_of::<T>();
    raw.chunks_exact(width)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect()
}

/// Sentinel carried on the wire for "no entity".
pub const WIRE_NONE: u64 = u64::MAX;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64, // count of following records
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }

    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}
