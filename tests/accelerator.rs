use buffer::{Access, BufferError, BufferKind, BufferStats};
use memory::testutils::{place_i8, random_i8};
use memory::Statistics;
use quantize::{calibrate, QuantizationState};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use runtime::Cycles;
use tinyml_sim::fetch::place_program;
use tinyml_sim::{AccelError, Accelerator, AcceleratorConfig, Instruction, Opcode};

const VECTORS: u32 = 0x700;
const MATRICES: u32 = 0x10700;
const BIASES: u32 = 0x13000;
const STORE: u32 = 0x20000;
const MAX_CYCLES: u64 = 10_000_000;

fn accelerator() -> Accelerator {
    Accelerator::new(AcceleratorConfig::default()).unwrap()
}

/// Image holding one GEMV layer's operands at the usual segment starts.
fn layer_image(w: &[i8], x: &[i8], b: &[i8]) -> Vec<u8> {
    let mut image = Vec::new();
    place_i8(&mut image, MATRICES as usize, w);
    place_i8(&mut image, VECTORS as usize, x);
    place_i8(&mut image, BIASES as usize, b);
    image
}

fn layer_program(rows: u16, cols: u16) -> Vec<Instruction> {
    vec![
        Instruction::load_m(1, MATRICES, rows, cols),
        Instruction::load_v(2, VECTORS, cols),
        Instruction::load_v(3, BIASES, rows),
        Instruction::gemv(4, 1, 2, 3, rows, cols),
        Instruction::store(4, STORE, rows),
    ]
}

fn as_i8(bytes: Vec<u8>) -> Vec<i8> {
    bytes.into_iter().map(|b| b as i8).collect()
}

const W: [i8; 8] = [10, 20, 30, 40, -50, -60, 70, -80];
const X: [i8; 4] = [5, 10, 15, 20];
const B: [i8; 2] = [100, -100];

#[tokio::test]
async fn two_row_layer_end_to_end() {
    let acc = accelerator();
    let mut image = layer_image(&W, &X, &B);
    place_program(&mut image, 0, &layer_program(2, 4));
    acc.seed(&image).unwrap();

    let report = acc.simulate(MAX_CYCLES).await.unwrap();
    assert_eq!((report.executed, report.skipped), (5, 0));
    assert_eq!(as_i8(acc.dump_store(2).unwrap()), vec![127, -119]);
    // Only the two result bytes are written.
    assert_eq!(as_i8(acc.dump_store(3).unwrap())[2], 0);
    assert_eq!(acc.accumulator_allocations().unwrap(), 1);
    assert_eq!(acc.pulses().unwrap(), 5);
    let tiles: Vec<u64> = report.completions.iter().map(|c| c.tiles).collect();
    assert_eq!(tiles, vec![1, 1, 1, 1, 1]);
}

#[tokio::test]
async fn relu_after_gemv_clips_negative_rows() {
    let acc = accelerator();
    acc.seed(&layer_image(&W, &X, &B)).unwrap();
    let mut program = layer_program(2, 4);
    program.insert(4, Instruction::relu(5, 4, 2));
    program[5] = Instruction::store(5, STORE, 2);
    acc.execute_all(program, MAX_CYCLES).await.unwrap();
    assert_eq!(as_i8(acc.dump_store(2).unwrap()), vec![127, 0]);
}

#[tokio::test]
async fn nop_touches_nothing() {
    let acc = accelerator();
    let report = acc
        .execute_all(vec![Instruction::nop(); 3], MAX_CYCLES)
        .await
        .unwrap();
    assert_eq!(report.executed, 3);
    // Dispatch and completion pulse only.
    assert_eq!(report.cycles, Cycles::new(6));
    assert_eq!(acc.buffers().total_stats(), BufferStats::default());
    for (_, stats) in acc.memory_statistics() {
        assert_eq!(stats, Statistics::default());
    }
    assert_eq!(acc.accumulator_allocations().unwrap(), 0);
    assert_eq!(acc.pulses().unwrap(), 3);
}

#[tokio::test]
async fn zero_length_operations_complete_immediately() {
    let acc = accelerator();
    let report = acc
        .execute_all(
            vec![
                Instruction::load_v(0, VECTORS, 0),
                Instruction::gemv(1, 0, 0, 0, 0, 4),
                Instruction::relu(1, 0, 0),
                Instruction::store(0, STORE, 0),
            ],
            MAX_CYCLES,
        )
        .await
        .unwrap();
    assert!(report.completions.iter().all(|c| c.tiles == 0));
    assert_eq!(report.cycles, Cycles::new(8));
    assert_eq!(acc.buffers().total_stats(), BufferStats::default());
    assert_eq!(acc.accumulator_allocations().unwrap(), 0);
}

#[tokio::test]
async fn load_pads_the_last_tile() {
    let acc = accelerator();
    let mut image = Vec::new();
    place_i8(&mut image, VECTORS as usize, &[7; 40]);
    acc.seed(&image).unwrap();

    let report = acc
        .execute_all(
            vec![
                Instruction::load_v(0, VECTORS, 32),
                Instruction::load_v(1, VECTORS, 33),
            ],
            MAX_CYCLES,
        )
        .await
        .unwrap();

    let buffers = acc.buffers();
    assert_eq!(buffers.stats(BufferKind::Vector, 0).unwrap().tile_writes, 1);
    assert_eq!(buffers.stats(BufferKind::Vector, 1).unwrap().tile_writes, 2);
    let second = buffers.contents(BufferKind::Vector, 1).unwrap();
    assert_eq!(second.len(), 64);
    assert_eq!(second[32], 7);
    assert!(second[33..].iter().all(|&v| v == 0));
    // 32 byte reads, one buffer write, dispatch and pulse.
    assert_eq!(report.completions[0].cycles, Cycles::new(35));
    assert_eq!(report.completions[1].tiles, 2);
    assert_eq!(
        acc.memory_statistics()[1].1.total_bytes_read,
        32 + 33
    );
}

#[tokio::test]
async fn relu_reads_only_source_and_writes_only_destination() {
    let acc = accelerator();
    let input: Vec<i8> = (0..40).map(|i| if i % 3 == 0 { -i } else { i }).collect();
    let mut image = Vec::new();
    place_i8(&mut image, VECTORS as usize, &input);
    acc.seed(&image).unwrap();

    acc.execute_all(vec![Instruction::load_v(0, VECTORS, 40)], MAX_CYCLES)
        .await
        .unwrap();
    let buffers = acc.buffers();
    let src_before = buffers.stats(BufferKind::Vector, 0).unwrap();
    let dest_before = buffers.stats(BufferKind::Vector, 1).unwrap();

    acc.execute_all(vec![Instruction::relu(1, 0, 40)], MAX_CYCLES)
        .await
        .unwrap();
    let src = buffers.stats(BufferKind::Vector, 0).unwrap();
    let dest = buffers.stats(BufferKind::Vector, 1).unwrap();
    assert_eq!(src.tile_writes, src_before.tile_writes);
    assert_eq!(src.tile_reads, src_before.tile_reads + 2);
    assert_eq!(dest.tile_reads, dest_before.tile_reads);
    assert_eq!(dest.tile_writes, 2);

    let out = buffers.contents(BufferKind::Vector, 1).unwrap();
    let expected: Vec<i8> = input.iter().map(|&v| v.max(0)).collect();
    assert_eq!(out[..40], expected[..]);
    assert!(out[40..].iter().all(|&v| v == 0));
}

#[tokio::test]
async fn in_place_relu_is_a_conflict() {
    let acc = accelerator();
    let err = acc
        .execute_all(
            vec![
                Instruction::load_v(0, VECTORS, 4),
                Instruction::relu(0, 0, 4),
            ],
            MAX_CYCLES,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AccelError::Buffer(BufferError::BufferConflict { id: 0, .. })
    ));
    // The failed instruction left no lease behind.
    acc.execute_all(vec![Instruction::relu(1, 0, 4)], MAX_CYCLES)
        .await
        .unwrap();
}

#[tokio::test]
async fn gemv_may_overwrite_its_input_vector() {
    let acc = accelerator();
    acc.seed(&layer_image(&W, &X, &B)).unwrap();
    acc.execute_all(
        vec![
            Instruction::load_m(1, MATRICES, 2, 4),
            Instruction::load_v(2, VECTORS, 4),
            Instruction::load_v(3, BIASES, 2),
            Instruction::gemv(2, 1, 2, 3, 2, 4),
        ],
        MAX_CYCLES,
    )
    .await
    .unwrap();
    let out = acc.buffers().contents(BufferKind::Vector, 2).unwrap();
    assert_eq!(out[..2], [127, -119]);
}

#[tokio::test]
async fn invalid_opcodes_are_skipped() {
    let acc = accelerator();
    let mut image = Vec::new();
    place_i8(&mut image, VECTORS as usize, &[1, 2, 3, 4]);
    place_program(
        &mut image,
        0,
        &[
            Instruction::decode(0x1f | (3 << 5)),
            Instruction::load_v(0, VECTORS, 4),
            Instruction::store(0, STORE, 4),
        ],
    );
    acc.seed(&image).unwrap();

    let report = acc.simulate(MAX_CYCLES).await.unwrap();
    assert_eq!((report.executed, report.skipped), (3, 1));
    assert_eq!(report.completions[0].instruction.opcode, Opcode::Invalid(0x1f));
    assert_eq!(report.completions[0].cycles, Cycles::new(2));
    assert_eq!(as_i8(acc.dump_store(4).unwrap()), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn sentinel_terminates_the_program() {
    let acc = accelerator();
    let mut image = Vec::new();
    place_program(&mut image, 0, &[Instruction::load_v(0, VECTORS, 4)]);
    // A word after the sentinel.
    image.extend_from_slice(&Instruction::load_v(1, VECTORS, 4).encode().to_be_bytes());
    acc.seed(&image).unwrap();

    let report = acc.simulate(MAX_CYCLES).await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(
        acc.buffers().stats(BufferKind::Vector, 1).unwrap(),
        BufferStats::default()
    );
}

#[tokio::test]
async fn buffer_ids_beyond_the_file_are_rejected() {
    let mut config = AcceleratorConfig::default();
    config.config.buffer_count.value = 4;
    let acc = Accelerator::new(config).unwrap();
    let err = acc
        .execute_all(vec![Instruction::load_v(9, VECTORS, 4)], MAX_CYCLES)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AccelError::Buffer(BufferError::InvalidBufferId { id: 9, count: 4, .. })
    ));
}

#[tokio::test]
async fn cycle_bound_stops_the_run() {
    let acc = accelerator();
    let mut image = layer_image(&W, &X, &B);
    place_program(&mut image, 0, &layer_program(2, 4));
    acc.seed(&image).unwrap();

    assert!(matches!(
        acc.simulate(10).await,
        Err(AccelError::Timeout(10))
    ));
    assert!(acc.pulses().is_ok());
    assert!(acc.accumulator_allocations().is_ok());
    acc.simulate(MAX_CYCLES).await.unwrap();
    assert_eq!(as_i8(acc.dump_store(2).unwrap()), vec![127, -119]);
}

#[tokio::test]
async fn cycle_bound_is_inclusive() {
    let acc = accelerator();
    let report = acc
        .execute_all(vec![Instruction::nop(); 3], 6)
        .await
        .unwrap();
    assert_eq!(report.cycles, Cycles::new(6));
    assert!(matches!(
        acc.execute_all(vec![Instruction::nop(); 3], 5).await,
        Err(AccelError::Timeout(5))
    ));
}

#[tokio::test]
async fn timeout_releases_buffer_leases() {
    let acc = accelerator();
    assert!(matches!(
        acc.execute_all(vec![Instruction::load_v(0, VECTORS, 1024)], 5)
            .await,
        Err(AccelError::Timeout(5))
    ));
    drop(
        acc.buffers()
            .claim(BufferKind::Vector, 0, Access::Write)
            .unwrap(),
    );
    acc.execute_all(
        vec![
            Instruction::load_v(0, VECTORS, 4),
            Instruction::store(0, STORE, 4),
        ],
        MAX_CYCLES,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn buffer_capacity_need_not_be_a_tile_multiple() {
    let mut config = AcceleratorConfig::default();
    config.config.vector_buffer_size.value = 40;
    let acc = Accelerator::new(config).unwrap();
    let x: Vec<i8> = (1..=40).collect();
    let mut image = Vec::new();
    place_i8(&mut image, VECTORS as usize, &x);
    acc.seed(&image).unwrap();
    acc.execute_all(vec![Instruction::load_v(0, VECTORS, 40)], MAX_CYCLES)
        .await
        .unwrap();
    assert_eq!(acc.buffers().contents(BufferKind::Vector, 0).unwrap(), x);
}

#[tokio::test]
async fn random_layers_match_reference() {
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    for (rows, cols) in [(1usize, 1usize), (12, 70), (33, 40), (5, 64)] {
        let w = random_i8(&mut rng, rows * cols);
        let x = random_i8(&mut rng, cols);
        let b = random_i8(&mut rng, rows);

        let reference: Vec<i32> = (0..rows)
            .map(|r| {
                let dot: i32 = (0..cols)
                    .map(|c| w[r * cols + c] as i32 * x[c] as i32)
                    .sum();
                dot + b[r] as i32
            })
            .collect();
        let state = QuantizationState::derive(calibrate(&reference));
        let expected = state.quantize_all(&reference);

        let acc = accelerator();
        let mut image = layer_image(&w, &x, &b);
        place_program(&mut image, 0, &layer_program(rows as u16, cols as u16));
        acc.seed(&image).unwrap();
        let report = acc.simulate(MAX_CYCLES).await.unwrap();

        assert_eq!(as_i8(acc.dump_store(rows).unwrap()), expected, "{rows}x{cols}");
        assert_eq!(report.completions[0].tiles, (rows * cols).div_ceil(32) as u64);
        assert_eq!(report.completions[3].tiles, rows.div_ceil(32) as u64);
    }
}
