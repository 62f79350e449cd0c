use std::sync::Arc;

use buffer::{Access, BufferController, BufferKind, TILE_ELEMS};
use memory::{MemorySystem, Region};

use super::{tile_count, valid_lanes, StreamState, Unit, UnitReport};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadParams {
    pub dest: usize,
    pub addr: u64,
    /// `length` for vectors, `rows * cols` for matrices.
    pub elements: usize,
}

/// Streams tiles from an address space into a buffer.
///
/// Tile `i` is a burst of up to 32 bytes at `addr + 32 * i`; bytes past the element count are
/// written as zeros. A matrix is moved as one row-major stream, so rows may straddle tiles.
pub struct LoadUnit {
    kind: BufferKind,
    region: Region,
    buffers: Arc<BufferController>,
    memory: Arc<MemorySystem>,
}

impl LoadUnit {
    pub fn vector(buffers: Arc<BufferController>, memory: Arc<MemorySystem>) -> Self {
        Self {
            kind: BufferKind::Vector,
            region: Region::VectorLoads,
            buffers,
            memory,
        }
    }

    pub fn matrix(buffers: Arc<BufferController>, memory: Arc<MemorySystem>) -> Self {
        Self {
            kind: BufferKind::Matrix,
            region: Region::MatrixLoads,
            buffers,
            memory,
        }
    }
}

impl Unit for LoadUnit {
    type Params = LoadParams;

    async fn run(&self, params: LoadParams) -> Result<UnitReport> {
        let tiles = tile_count(params.elements);
        let mut state = StreamState::start(tiles);
        if state == StreamState::Done {
            return Ok(UnitReport::default());
        }

        let _lease = self.buffers.claim(self.kind, params.dest, Access::Write)?;
        self.buffers.reset(self.kind, params.dest)?;
        let port = self.memory.port(self.region);

        while let StreamState::Transfer { tile, .. } = state {
            let addr = params.addr + (tile * TILE_ELEMS) as u64;
            let bytes = port
                .read_burst(addr, valid_lanes(params.elements, tile))
                .await?;
            let mut data = [0i8; TILE_ELEMS];
            for (lane, byte) in data.iter_mut().zip(&bytes) {
                *lane = *byte as i8;
            }
            self.buffers.write_tile(self.kind, params.dest, &data).await?;
            state = state.next();
        }

        clilog::debug!(
            "loaded {} elements from {:#x} into {} buffer {} ({} tiles)",
            params.elements,
            params.addr,
            self.kind,
            params.dest,
            tiles
        );
        Ok(UnitReport {
            tiles: tiles as u64,
        })
    }
}
