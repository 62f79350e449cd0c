//! Two-pass dynamic quantizer.
//!
//! The pipeline cannot emit a single row before every accumulator has been seen: calibration
//! is a barrier between accumulation and output.

use quantize::{QuantizationState, RestoringDivider, RECIP_NUMERATOR};

use crate::Timing;

#[derive(Debug, Clone)]
enum Phase {
    Calibrate { row: usize, max_abs: u32 },
    DeriveScale { max_abs: u32, divider: RestoringDivider },
    Quantize { row: usize, state: QuantizationState },
    Done { state: QuantizationState },
}

impl Phase {
    fn start(rows: usize) -> Self {
        if rows == 0 {
            Self::Done {
                state: QuantizationState::finish(0, 0),
            }
        } else {
            Self::Calibrate { row: 0, max_abs: 0 }
        }
    }

    fn quantize(state: QuantizationState, rows: usize) -> Self {
        if rows == 0 {
            Self::Done { state }
        } else {
            Self::Quantize { row: 0, state }
        }
    }
}

/// Output of one quantizer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantized {
    pub state: QuantizationState,
    pub values: Vec<i8>,
}

pub struct QuantizationPipeline {
    timing: Timing,
}

impl QuantizationPipeline {
    pub fn new(timing: Timing) -> Self {
        Self { timing }
    }

    /// Calibrate over `acc`, derive the reciprocal scale and saturate every row to `i8`.
    pub async fn run(&self, acc: Vec<i32>) -> Quantized {
        let rows = acc.len();
        let mut values = Vec::with_capacity(rows);
        let mut phase = Phase::start(rows);

        let state = loop {
            phase = match phase {
                Phase::Calibrate { row, max_abs } => {
                    let max_abs = max_abs.max(acc[row].unsigned_abs());
                    runtime::cycle!(self.timing.calibration_row.count());
                    if row + 1 < rows {
                        Phase::Calibrate {
                            row: row + 1,
                            max_abs,
                        }
                    } else if max_abs == 0 {
                        Phase::quantize(QuantizationState::finish(0, 0), rows)
                    } else {
                        Phase::DeriveScale {
                            max_abs,
                            divider: RestoringDivider::new(RECIP_NUMERATOR, max_abs),
                        }
                    }
                }
                Phase::DeriveScale {
                    max_abs,
                    mut divider,
                } => {
                    let finished = divider.step();
                    runtime::cycle!(self.timing.divider_step.count());
                    if finished {
                        let state = QuantizationState::finish(max_abs, divider.quotient());
                        clilog::debug!(
                            "max_abs {} gives scale {} (reciprocal {:#x})",
                            max_abs,
                            state.scale,
                            state.recip.to_bits()
                        );
                        Phase::quantize(state, rows)
                    } else {
                        Phase::DeriveScale { max_abs, divider }
                    }
                }
                Phase::Quantize { row, state } => {
                    if row == 0 {
                        runtime::cycle!(self.timing.quant_pipeline_depth.count());
                    }
                    values.push(state.quantize(acc[row]));
                    runtime::cycle!(self.timing.quant_row.count());
                    if row + 1 < rows {
                        Phase::Quantize { row: row + 1, state }
                    } else {
                        Phase::Done { state }
                    }
                }
                Phase::Done { state } => break state,
            };
        };

        Quantized { state, values }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quantize::{calibrate, Q8_24};
    use runtime::{Executor, Tick};

    use super::*;

    async fn quantize(acc: Vec<i32>) -> (Quantized, Tick) {
        let executor = Executor::new();
        let pipeline = Arc::new(QuantizationPipeline::new(Timing::default()));
        let out = executor
            .run(async move { pipeline.run(acc).await }, Tick::ETERNITY)
            .await
            .unwrap();
        (out, executor.now())
    }

    #[tokio::test]
    async fn matches_reference_quantizer() {
        let acc = vec![1150, -1650];
        let (out, now) = quantize(acc.clone()).await;
        let reference = QuantizationState::derive(calibrate(&acc));
        assert_eq!(out.state, reference);
        assert_eq!(out.values, vec![89, -127]);
        // Two calibration rows, 32 divider steps, pipeline fill, two output rows.
        assert_eq!(now, Tick::at(2 + 32 + 3 + 2));
    }

    #[tokio::test]
    async fn all_zero_rows_skip_the_divider() {
        let (out, now) = quantize(vec![0; 4]).await;
        assert_eq!(out.state.scale, Q8_24::ONE);
        assert_eq!(out.values, vec![0; 4]);
        assert_eq!(now, Tick::at(4 + 3 + 4));
    }

    #[tokio::test]
    async fn empty_input_finishes_immediately() {
        let (out, now) = quantize(Vec::new()).await;
        assert!(out.values.is_empty());
        assert_eq!(now, Tick::INIT);
    }
}
