use std::fs;
use std::path::Path;

use anyhow::Context;
use buffer::BufferConfig;
use memory::{MemoryError, MemoryMap, Segment};
use runtime::Cycles;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ConfigValue {
    pub value: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ConfigValueUsize {
    pub value: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ConfigValueU64 {
    pub value: u64,
}

/// Address range `[start, end]`, both ends inclusive as in the memory map table.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct SegmentValue {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AcceleratorConfig {
    #[serde(rename = "CONFIG")]
    pub config: ConfigSection,
    #[serde(rename = "LATENCY")]
    pub latency: LatencySection,
    #[serde(rename = "MEMORY_MAP")]
    pub memory_map: MemoryMapSection,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConfigSection {
    #[serde(rename = "BUFFER_COUNT")]
    pub buffer_count: ConfigValueUsize,
    #[serde(rename = "VECTOR_BUFFER_SIZE")]
    pub vector_buffer_size: ConfigValueUsize,
    #[serde(rename = "MATRIX_BUFFER_SIZE")]
    pub matrix_buffer_size: ConfigValueUsize,
    #[serde(rename = "MEMORY_SIZE")]
    pub memory_size: ConfigValueU64,
    /// Simulation stops at this cycle if the program has not terminated.
    #[serde(rename = "MAX_CYCLES")]
    pub max_cycles: ConfigValueU64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LatencySection {
    #[serde(rename = "MEMORY_READ_CYCLES")]
    pub memory_read_cycles: ConfigValue,
    #[serde(rename = "MEMORY_WRITE_CYCLES")]
    pub memory_write_cycles: ConfigValue,
    #[serde(rename = "BUFFER_READ_CYCLES")]
    pub buffer_read_cycles: ConfigValue,
    #[serde(rename = "BUFFER_WRITE_CYCLES")]
    pub buffer_write_cycles: ConfigValue,
    #[serde(rename = "DISPATCH_CYCLES")]
    pub dispatch_cycles: ConfigValue,
    #[serde(rename = "MAC_TILE_CYCLES")]
    pub mac_tile_cycles: ConfigValue,
    #[serde(rename = "REDUCTION_TREE_CYCLES")]
    pub reduction_tree_cycles: ConfigValue,
    #[serde(rename = "BIAS_ADD_CYCLES")]
    pub bias_add_cycles: ConfigValue,
    #[serde(rename = "CALIBRATION_ROW_CYCLES")]
    pub calibration_row_cycles: ConfigValue,
    #[serde(rename = "DIVIDER_STEP_CYCLES")]
    pub divider_step_cycles: ConfigValue,
    #[serde(rename = "QUANT_PIPELINE_DEPTH")]
    pub quant_pipeline_depth: ConfigValue,
    #[serde(rename = "QUANT_ROW_CYCLES")]
    pub quant_row_cycles: ConfigValue,
    #[serde(rename = "RELU_TILE_CYCLES")]
    pub relu_tile_cycles: ConfigValue,
    #[serde(rename = "COMPLETION_PULSE_CYCLES")]
    pub completion_pulse_cycles: ConfigValue,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemoryMapSection {
    #[serde(rename = "INSTRUCTIONS")]
    pub instructions: SegmentValue,
    #[serde(rename = "VECTORS")]
    pub vectors: SegmentValue,
    #[serde(rename = "MATRICES")]
    pub matrices: SegmentValue,
    #[serde(rename = "BIASES")]
    pub biases: SegmentValue,
    #[serde(rename = "STORE")]
    pub store: SegmentValue,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        AcceleratorConfig {
            config: ConfigSection {
                buffer_count: ConfigValueUsize { value: 32 },
                vector_buffer_size: ConfigValueUsize { value: 1024 },
                matrix_buffer_size: ConfigValueUsize { value: 16384 },
                memory_size: ConfigValueU64 { value: 0x30000 },
                max_cycles: ConfigValueU64 { value: 100_000_000 },
            },
            latency: LatencySection {
                memory_read_cycles: ConfigValue { value: 1 },
                memory_write_cycles: ConfigValue { value: 1 },
                buffer_read_cycles: ConfigValue { value: 2 },
                buffer_write_cycles: ConfigValue { value: 1 },
                dispatch_cycles: ConfigValue { value: 1 },
                mac_tile_cycles: ConfigValue { value: 1 },
                reduction_tree_cycles: ConfigValue { value: 1 },
                bias_add_cycles: ConfigValue { value: 1 },
                calibration_row_cycles: ConfigValue { value: 1 },
                divider_step_cycles: ConfigValue { value: 1 },
                quant_pipeline_depth: ConfigValue { value: 3 },
                quant_row_cycles: ConfigValue { value: 1 },
                relu_tile_cycles: ConfigValue { value: 1 },
                completion_pulse_cycles: ConfigValue { value: 1 },
            },
            memory_map: MemoryMapSection {
                instructions: SegmentValue {
                    start: 0x000000,
                    end: 0x0006ff,
                },
                vectors: SegmentValue {
                    start: 0x000700,
                    end: 0x0106ff,
                },
                matrices: SegmentValue {
                    start: 0x010700,
                    end: 0x012fff,
                },
                biases: SegmentValue {
                    start: 0x013000,
                    end: 0x01ffff,
                },
                store: SegmentValue {
                    start: 0x020000,
                    end: 0x02ffff,
                },
            },
        }
    }
}

/// Per-stage cycle costs of the compute units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub dispatch: Cycles,
    pub mac_tile: Cycles,
    pub reduction_tree: Cycles,
    pub bias_add: Cycles,
    pub calibration_row: Cycles,
    pub divider_step: Cycles,
    pub quant_pipeline_depth: Cycles,
    pub quant_row: Cycles,
    pub relu_tile: Cycles,
    pub completion_pulse: Cycles,
}

impl Default for Timing {
    fn default() -> Self {
        AcceleratorConfig::default().timing()
    }
}

fn cycles(v: ConfigValue) -> Cycles {
    Cycles::from(v.value)
}

impl AcceleratorConfig {
    pub fn timing(&self) -> Timing {
        let l = &self.latency;
        Timing {
            dispatch: cycles(l.dispatch_cycles),
            mac_tile: cycles(l.mac_tile_cycles),
            reduction_tree: cycles(l.reduction_tree_cycles),
            bias_add: cycles(l.bias_add_cycles),
            calibration_row: cycles(l.calibration_row_cycles),
            divider_step: cycles(l.divider_step_cycles),
            quant_pipeline_depth: cycles(l.quant_pipeline_depth),
            quant_row: cycles(l.quant_row_cycles),
            relu_tile: cycles(l.relu_tile_cycles),
            completion_pulse: cycles(l.completion_pulse_cycles),
        }
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            count: self.config.buffer_count.value,
            vector_capacity: self.config.vector_buffer_size.value,
            matrix_capacity: self.config.matrix_buffer_size.value,
            read_latency: cycles(self.latency.buffer_read_cycles),
            write_latency: cycles(self.latency.buffer_write_cycles),
        }
    }

    pub fn memory_latency(&self) -> (Cycles, Cycles) {
        (
            cycles(self.latency.memory_read_cycles),
            cycles(self.latency.memory_write_cycles),
        )
    }

    pub fn memory_map(&self) -> Result<MemoryMap, MemoryError> {
        let m = &self.memory_map;
        let segments = [
            ("instructions", m.instructions),
            ("vectors", m.vectors),
            ("matrices", m.matrices),
            ("biases", m.biases),
            ("store", m.store),
        ]
        .into_iter()
        .map(|(name, s)| Segment::new(name, s.start, s.end + 1))
        .collect();
        MemoryMap::new(self.config.memory_size.value, segments)
    }
}

pub fn load_config_from_file(path: &Path) -> anyhow::Result<AcceleratorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let config: AcceleratorConfig = toml::from_str(&content)
        .with_context(|| format!("cannot parse config file {}", path.display()))?;
    Ok(config)
}
