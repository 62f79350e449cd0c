use std::sync::Arc;

use buffer::{Access, BufferController, BufferKind, TILE_ELEMS};
use memory::{MemorySystem, Region};

use super::{tile_count, valid_lanes, StreamState, Unit, UnitReport};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreParams {
    pub src: usize,
    pub addr: u64,
    pub length: usize,
}

/// Streams a vector buffer out to the store address space, exactly `length` bytes.
pub struct StoreUnit {
    buffers: Arc<BufferController>,
    memory: Arc<MemorySystem>,
}

impl StoreUnit {
    pub fn new(buffers: Arc<BufferController>, memory: Arc<MemorySystem>) -> Self {
        Self { buffers, memory }
    }
}

impl Unit for StoreUnit {
    type Params = StoreParams;

    async fn run(&self, params: StoreParams) -> Result<UnitReport> {
        let tiles = tile_count(params.length);
        let mut state = StreamState::start(tiles);
        if state == StreamState::Done {
            return Ok(UnitReport::default());
        }

        let _lease = self
            .buffers
            .claim(BufferKind::Vector, params.src, Access::Read)?;
        self.buffers.rewind(BufferKind::Vector, params.src)?;
        let port = self.memory.port(Region::Store);

        while let StreamState::Transfer { tile, .. } = state {
            let data = self.buffers.read_tile(BufferKind::Vector, params.src).await?;
            let bytes: Vec<u8> = data[..valid_lanes(params.length, tile)]
                .iter()
                .map(|&v| v as u8)
                .collect();
            port.write_burst(params.addr + (tile * TILE_ELEMS) as u64, &bytes)
                .await?;
            state = state.next();
        }

        clilog::debug!(
            "stored {} elements of vector buffer {} to {:#x}",
            params.length,
            params.src,
            params.addr
        );
        Ok(UnitReport {
            tiles: tiles as u64,
        })
    }
}
