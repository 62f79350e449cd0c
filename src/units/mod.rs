//! Compute and data-movement units dispatched by the orchestrator.
//!
//! Every unit follows the same start/done contract: it is started with its parameters through
//! [`start_unit`] and raises done once by resolving the returned [`Done`].

pub mod gemv;
pub mod load;
pub mod quant;
pub mod relu;
pub mod store;

use std::sync::Arc;

use buffer::{Tile, TILE_ELEMS};
use runtime::handshake::{self, Done};

use crate::Result;

pub use gemv::{GemvEngine, GemvParams};
pub use load::{LoadParams, LoadUnit};
pub use quant::QuantizationPipeline;
pub use relu::{ReluParams, ReluUnit};
pub use store::{StoreParams, StoreUnit};

/// What a unit hands back together with its done signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitReport {
    /// Tiles moved between memory and buffers or written to the destination buffer.
    pub tiles: u64,
}

#[trait_variant::make(Send)]
pub trait Unit: Send + Sync {
    type Params: Send + 'static;

    async fn run(&self, params: Self::Params) -> Result<UnitReport>;
}

/// Raise `start` on `unit`.
pub fn start_unit<U: Unit + 'static>(unit: &Arc<U>, params: U::Params) -> Done<Result<UnitReport>> {
    let unit = unit.clone();
    handshake::start(async move { unit.run(params).await })
}

/// Progress of a unit that streams a fixed number of tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Transfer { tile: usize, tiles: usize },
    Done,
}

impl StreamState {
    pub fn start(tiles: usize) -> Self {
        if tiles == 0 {
            Self::Done
        } else {
            Self::Transfer { tile: 0, tiles }
        }
    }

    /// State after the current tile has been written.
    pub fn next(self) -> Self {
        match self {
            Self::Transfer { tile, tiles } if tile + 1 < tiles => Self::Transfer {
                tile: tile + 1,
                tiles,
            },
            Self::Transfer { .. } => Self::Done,
            other => other,
        }
    }
}

pub fn tile_count(elements: usize) -> usize {
    elements.div_ceil(TILE_ELEMS)
}

/// Number of valid elements in tile `tile` of an `elements`-long stream.
pub fn valid_lanes(elements: usize, tile: usize) -> usize {
    elements.saturating_sub(tile * TILE_ELEMS).min(TILE_ELEMS)
}

/// Zero every lane at or beyond `valid`.
pub fn mask_tile(mut tile: Tile, valid: usize) -> Tile {
    for lane in tile.iter_mut().skip(valid) {
        *lane = 0;
    }
    tile
}
