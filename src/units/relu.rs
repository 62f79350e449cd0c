use std::sync::Arc;

use buffer::{Access, BufferController, BufferKind, Tile};

use super::{mask_tile, tile_count, valid_lanes, StreamState, Unit, UnitReport};
use crate::{Result, Timing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReluParams {
    pub dest: usize,
    pub src: usize,
    pub length: usize,
}

/// Elementwise `max(0, x)` from one vector buffer into another.
pub struct ReluUnit {
    buffers: Arc<BufferController>,
    timing: Timing,
}

fn relu(tile: Tile) -> Tile {
    tile.map(|v| v.max(0))
}

impl ReluUnit {
    pub fn new(buffers: Arc<BufferController>, timing: Timing) -> Self {
        Self { buffers, timing }
    }
}

impl Unit for ReluUnit {
    type Params = ReluParams;

    async fn run(&self, params: ReluParams) -> Result<UnitReport> {
        let tiles = tile_count(params.length);
        let mut state = StreamState::start(tiles);
        if state == StreamState::Done {
            return Ok(UnitReport::default());
        }

        // Claiming both leases rejects an in-place activation.
        let _src = self
            .buffers
            .claim(BufferKind::Vector, params.src, Access::Read)?;
        let _dest = self
            .buffers
            .claim(BufferKind::Vector, params.dest, Access::Write)?;
        self.buffers.rewind(BufferKind::Vector, params.src)?;
        self.buffers.reset(BufferKind::Vector, params.dest)?;

        while let StreamState::Transfer { tile, .. } = state {
            let input = self.buffers.read_tile(BufferKind::Vector, params.src).await?;
            let output = relu(mask_tile(input, valid_lanes(params.length, tile)));
            runtime::cycle!(self.timing.relu_tile.count());
            self.buffers
                .write_tile(BufferKind::Vector, params.dest, &output)
                .await?;
            state = state.next();
        }

        Ok(UnitReport {
            tiles: tiles as u64,
        })
    }
}
