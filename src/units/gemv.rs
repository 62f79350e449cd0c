//! Tiled matrix-vector multiply with bias and dynamic quantization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use buffer::{Access, BufferController, BufferKind, Tile, TILE_ELEMS};
use runtime::handshake;

use super::quant::{QuantizationPipeline, Quantized};
use super::{mask_tile, tile_count, valid_lanes, StreamState, Unit, UnitReport};
use crate::{Result, Timing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemvParams {
    pub dest: usize,
    pub w: usize,
    pub x: usize,
    pub b: usize,
    pub rows: usize,
    pub cols: usize,
}

/// Sum the 32 lane products with a fixed-order binary tree, 32 to 16 to 8 to 4 to 2 to 1.
pub fn reduce_tree(mut products: [i32; TILE_ELEMS]) -> i32 {
    let mut width = TILE_ELEMS;
    while width > 1 {
        width /= 2;
        for lane in 0..width {
            products[lane] = products[lane].wrapping_add(products[lane + width]);
        }
    }
    products[0]
}

/// One pass of the MAC array: lane `i` multiplies `w[i] * x[i]` into an `i16`.
pub fn mac_tile(w: &Tile, x: &Tile) -> i32 {
    let mut products = [0i32; TILE_ELEMS];
    for (lane, product) in products.iter_mut().enumerate() {
        *product = (w[lane] as i16 * x[lane] as i16) as i32;
    }
    reduce_tree(products)
}

pub struct GemvEngine {
    buffers: Arc<BufferController>,
    quantizer: Arc<QuantizationPipeline>,
    timing: Timing,
    allocations: AtomicU64,
}

impl GemvEngine {
    pub fn new(buffers: Arc<BufferController>, timing: Timing) -> Self {
        Self {
            buffers,
            quantizer: Arc::new(QuantizationPipeline::new(timing)),
            timing,
            allocations: AtomicU64::new(0),
        }
    }

    /// Number of row accumulators created so far.
    pub fn accumulator_allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn quantizer(&self) -> &QuantizationPipeline {
        &self.quantizer
    }

    /// Accumulate `W * x + b` into one `i32` per row.
    async fn accumulate(&self, p: &GemvParams) -> Result<Vec<i32>> {
        let _w = self.buffers.claim(BufferKind::Matrix, p.w, Access::Read)?;
        let _x = self.buffers.claim(BufferKind::Vector, p.x, Access::Read)?;
        let _b = self.buffers.claim(BufferKind::Vector, p.b, Access::Read)?;

        let mut acc = vec![0i32; p.rows];
        self.allocations.fetch_add(1, Ordering::Relaxed);

        let tiles = tile_count(p.cols);
        for (row, sum) in acc.iter_mut().enumerate() {
            self.buffers.rewind(BufferKind::Vector, p.x)?;
            let mut state = StreamState::start(tiles);
            while let StreamState::Transfer { tile, .. } = state {
                let valid = valid_lanes(p.cols, tile);
                let offset = row * p.cols + tile * TILE_ELEMS;
                let (w, x) = futures::join!(
                    self.buffers
                        .read_tile_at(BufferKind::Matrix, p.w, offset, valid),
                    self.buffers.read_tile(BufferKind::Vector, p.x),
                );
                let x = mask_tile(x?, valid);
                let partial = mac_tile(&w?, &x);
                runtime::cycle!((self.timing.mac_tile + self.timing.reduction_tree).count());
                *sum = sum.wrapping_add(partial);
                state = state.next();
            }
        }

        self.buffers.rewind(BufferKind::Vector, p.b)?;
        for (tile, rows) in acc.chunks_mut(TILE_ELEMS).enumerate() {
            let bias = self.buffers.read_tile(BufferKind::Vector, p.b).await?;
            let bias = mask_tile(bias, valid_lanes(p.rows, tile));
            for (sum, &b) in rows.iter_mut().zip(bias.iter()) {
                *sum = sum.wrapping_add(b as i32);
            }
            runtime::cycle!(self.timing.bias_add.count());
        }

        Ok(acc)
    }
}

impl Unit for GemvEngine {
    type Params = GemvParams;

    async fn run(&self, p: GemvParams) -> Result<UnitReport> {
        if p.rows == 0 || p.cols == 0 {
            return Ok(UnitReport::default());
        }

        let acc = self.accumulate(&p).await?;
        clilog::debug!("gemv accumulators {:?}", acc);

        let quantizer = self.quantizer.clone();
        let Quantized { values, .. } =
            handshake::start(async move { quantizer.run(acc).await }).await?;

        // Inputs are released, so the output may overwrite one of them.
        let _dest = self
            .buffers
            .claim(BufferKind::Vector, p.dest, Access::Write)?;
        self.buffers.reset(BufferKind::Vector, p.dest)?;
        let tiles = tile_count(p.rows);
        for chunk in values.chunks(TILE_ELEMS) {
            let mut out = [0i8; TILE_ELEMS];
            out[..chunk.len()].copy_from_slice(chunk);
            self.buffers
                .write_tile(BufferKind::Vector, p.dest, &out)
                .await?;
        }

        Ok(UnitReport {
            tiles: tiles as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn tree_matches_linear_sum() {
        let mut products = [0i32; TILE_ELEMS];
        for (i, p) in products.iter_mut().enumerate() {
            *p = i as i32 * if i % 2 == 0 { 1 } else { -3 };
        }
        assert_eq!(reduce_tree(products), products.iter().sum::<i32>());
    }

    #[test]
    fn extreme_lanes_do_not_overflow() {
        let w = [i8::MIN; TILE_ELEMS];
        let x = [i8::MIN; TILE_ELEMS];
        assert_eq!(mac_tile(&w, &x), 32 * 16384);
        let x = [i8::MAX; TILE_ELEMS];
        assert_eq!(mac_tile(&w, &x), -32 * 16256);
    }

    proptest! {
        #[test]
        fn mac_is_a_dot_product(w in prop::array::uniform32(any::<i8>()), x in prop::array::uniform32(any::<i8>())) {
            let expected: i32 = w.iter().zip(&x).map(|(&a, &b)| a as i32 * b as i32).sum();
            prop_assert_eq!(mac_tile(&w, &x), expected);
        }
    }
}
