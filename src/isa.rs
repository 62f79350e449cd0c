//! 64-bit instruction words.
//!
//! ```text
//!  63        40 39  35 34  30 29    20 19    10 9   5 4     0
//! +------------+------+------+--------+--------+-----+-------+
//! |    addr    | x_id | b_id |  rows  | length | dest|opcode |
//! +------------+------+------+--------+--------+-----+-------+
//!        w_id = bits 44:40, sharing the low bits of addr
//! ```

use std::fmt;

const OPCODE_WIDTH: u32 = 5;
const ID_WIDTH: u32 = 5;
const LENGTH_WIDTH: u32 = 10;
const ROWS_WIDTH: u32 = 10;
const ADDR_WIDTH: u32 = 24;

const DEST_SHIFT: u32 = 5;
const LENGTH_SHIFT: u32 = 10;
const ROWS_SHIFT: u32 = 20;
const B_SHIFT: u32 = 30;
const X_SHIFT: u32 = 35;
const W_SHIFT: u32 = 40;
const ADDR_SHIFT: u32 = 40;

const fn mask(width: u32) -> u64 {
    (1u64 << width) - 1
}

const fn field(word: u64, shift: u32, width: u32) -> u64 {
    (word >> shift) & mask(width)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,
    LoadV,
    LoadM,
    Store,
    Gemv,
    Relu,
    /// Any other opcode value; executed as a no-op.
    Invalid(u8),
}

impl Opcode {
    pub fn decode(raw: u8) -> Self {
        match raw {
            0x00 => Self::Nop,
            0x01 => Self::LoadV,
            0x02 => Self::LoadM,
            0x03 => Self::Store,
            0x04 => Self::Gemv,
            0x05 => Self::Relu,
            other => Self::Invalid(other),
        }
    }

    pub fn encode(self) -> u8 {
        match self {
            Self::Nop => 0x00,
            Self::LoadV => 0x01,
            Self::LoadM => 0x02,
            Self::Store => 0x03,
            Self::Gemv => 0x04,
            Self::Relu => 0x05,
            Self::Invalid(raw) => raw & mask(OPCODE_WIDTH) as u8,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::LoadV => "LOAD_V",
            Self::LoadM => "LOAD_M",
            Self::Store => "STORE",
            Self::Gemv => "GEMV",
            Self::Relu => "RELU",
            Self::Invalid(_) => "INVALID",
        }
    }
}

/// A decoded instruction word. Every field is extracted regardless of opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dest: u8,
    /// Element count for LOAD_V, STORE and RELU; column count for LOAD_M and GEMV.
    pub length_or_cols: u16,
    pub rows: u16,
    pub b_id: u8,
    pub x_id: u8,
    pub w_id: u8,
    pub addr: u32,
}

impl Instruction {
    /// The all-zero word.
    pub const SENTINEL: Self = Self {
        opcode: Opcode::Nop,
        dest: 0,
        length_or_cols: 0,
        rows: 0,
        b_id: 0,
        x_id: 0,
        w_id: 0,
        addr: 0,
    };

    pub fn decode(word: u64) -> Self {
        Self {
            opcode: Opcode::decode(field(word, 0, OPCODE_WIDTH) as u8),
            dest: field(word, DEST_SHIFT, ID_WIDTH) as u8,
            length_or_cols: field(word, LENGTH_SHIFT, LENGTH_WIDTH) as u16,
            rows: field(word, ROWS_SHIFT, ROWS_WIDTH) as u16,
            b_id: field(word, B_SHIFT, ID_WIDTH) as u8,
            x_id: field(word, X_SHIFT, ID_WIDTH) as u8,
            w_id: field(word, W_SHIFT, ID_WIDTH) as u8,
            addr: field(word, ADDR_SHIFT, ADDR_WIDTH) as u32,
        }
    }

    /// Pack the fields back into a word.
    ///
    /// `addr` and `w_id` overlap; GEMV words take `w_id`, all others take `addr`.
    pub fn encode(&self) -> u64 {
        let mut word = self.opcode.encode() as u64
            | (self.dest as u64 & mask(ID_WIDTH)) << DEST_SHIFT
            | (self.length_or_cols as u64 & mask(LENGTH_WIDTH)) << LENGTH_SHIFT
            | (self.rows as u64 & mask(ROWS_WIDTH)) << ROWS_SHIFT
            | (self.b_id as u64 & mask(ID_WIDTH)) << B_SHIFT
            | (self.x_id as u64 & mask(ID_WIDTH)) << X_SHIFT;
        word |= match self.opcode {
            Opcode::Gemv => (self.w_id as u64 & mask(ID_WIDTH)) << W_SHIFT,
            _ => (self.addr as u64 & mask(ADDR_WIDTH)) << ADDR_SHIFT,
        };
        word
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    pub fn nop() -> Self {
        Self::SENTINEL
    }

    pub fn load_v(dest: u8, addr: u32, length: u16) -> Self {
        Self {
            opcode: Opcode::LoadV,
            dest,
            length_or_cols: length,
            addr,
            ..Self::SENTINEL
        }
    }

    pub fn load_m(dest: u8, addr: u32, rows: u16, cols: u16) -> Self {
        Self {
            opcode: Opcode::LoadM,
            dest,
            length_or_cols: cols,
            rows,
            addr,
            ..Self::SENTINEL
        }
    }

    pub fn gemv(dest: u8, w_id: u8, x_id: u8, b_id: u8, rows: u16, cols: u16) -> Self {
        Self {
            opcode: Opcode::Gemv,
            dest,
            length_or_cols: cols,
            rows,
            b_id,
            x_id,
            w_id,
            ..Self::SENTINEL
        }
    }

    pub fn relu(dest: u8, src: u8, length: u16) -> Self {
        Self {
            opcode: Opcode::Relu,
            dest,
            length_or_cols: length,
            x_id: src,
            ..Self::SENTINEL
        }
    }

    pub fn store(src: u8, addr: u32, length: u16) -> Self {
        Self {
            opcode: Opcode::Store,
            dest: src,
            length_or_cols: length,
            addr,
            ..Self::SENTINEL
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode.mnemonic();
        match self.opcode {
            Opcode::Nop => write!(f, "{name}"),
            Opcode::LoadV | Opcode::Store => write!(
                f,
                "{name} {}, {:#x}, {}",
                self.dest, self.addr, self.length_or_cols
            ),
            Opcode::LoadM => write!(
                f,
                "{name} {}, {:#x}, {}, {}",
                self.dest, self.addr, self.rows, self.length_or_cols
            ),
            Opcode::Gemv => write!(
                f,
                "{name} {}, {}, {}, {}, {}, {}",
                self.dest, self.w_id, self.x_id, self.b_id, self.rows, self.length_or_cols
            ),
            Opcode::Relu => write!(
                f,
                "{name} {}, {}, {}",
                self.dest, self.x_id, self.length_or_cols
            ),
            Opcode::Invalid(raw) => write!(f, "{name}({raw:#04x})"),
        }
    }
}
