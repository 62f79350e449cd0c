use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use runtime::Cycles;
use zerocopy::IntoBytes;

/// Number of elements moved by one buffer access.
pub const TILE_ELEMS: usize = 32;

pub type Tile = [i8; TILE_ELEMS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vector,
    Matrix,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKind::Vector => write!(f, "vector"),
            BufferKind::Matrix => write!(f, "matrix"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("{kind} buffer {id} does not exist ({count} buffers configured)")]
    InvalidBufferId {
        kind: BufferKind,
        id: usize,
        count: usize,
    },
    #[error("tile write at element {offset} overflows {kind} buffer {id} of {capacity} elements")]
    BufferOverflow {
        kind: BufferKind,
        id: usize,
        offset: usize,
        capacity: usize,
    },
    #[error("{kind} buffer {id} cannot be claimed for {wanted:?}, it is already leased")]
    BufferConflict {
        kind: BufferKind,
        id: usize,
        wanted: Access,
    },
}

pub type Result<T, E = BufferError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Number of buffers in each of the vector and matrix files.
    pub count: usize,
    pub vector_capacity: usize,
    pub matrix_capacity: usize,
    pub read_latency: Cycles,
    pub write_latency: Cycles,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            count: 32,
            vector_capacity: 1024,
            matrix_capacity: 16384,
            read_latency: Cycles::new(2),
            write_latency: Cycles::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub tile_reads: u64,
    pub tile_writes: u64,
}

impl std::ops::AddAssign for BufferStats {
    fn add_assign(&mut self, rhs: Self) {
        self.tile_reads += rhs.tile_reads;
        self.tile_writes += rhs.tile_writes;
    }
}

struct Buffer {
    data: Vec<i8>,
    /// Elements below `extent` have been written since the last reset.
    extent: usize,
    read_cursor: usize,
    write_cursor: usize,
    last: Option<Access>,
    stats: BufferStats,
}

impl Buffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            extent: 0,
            read_cursor: 0,
            write_cursor: 0,
            last: None,
            stats: BufferStats::default(),
        }
    }

    fn gather(&self, offset: usize, valid: usize) -> Tile {
        let mut tile = [0; TILE_ELEMS];
        for (lane, slot) in tile.iter_mut().enumerate().take(valid) {
            let at = offset + lane;
            if at < self.extent {
                *slot = self.data[at];
            }
        }
        tile
    }
}

enum Lease {
    Readers(usize),
    Writer,
}

/// Two buffer files, vector and matrix, arbitrating tile-granular access.
///
/// Each buffer has its own read and write cursor. The first write after a read restarts the
/// write cursor and the first read after a write restarts the read cursor.
pub struct BufferController {
    config: BufferConfig,
    vectors: Vec<Mutex<Buffer>>,
    matrices: Vec<Mutex<Buffer>>,
    leases: Mutex<HashMap<(BufferKind, usize), Lease>>,
}

/// Claim on a buffer, released when dropped.
#[must_use]
pub struct BufferLease<'a> {
    controller: &'a BufferController,
    kind: BufferKind,
    id: usize,
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        let mut leases = self.controller.leases.lock().unwrap();
        let key = (self.kind, self.id);
        let release = match leases.get_mut(&key) {
            Some(Lease::Readers(n)) if *n > 1 => {
                *n -= 1;
                false
            }
            _ => true,
        };
        if release {
            leases.remove(&key);
        }
    }
}

impl BufferController {
    pub fn new(config: BufferConfig) -> Self {
        let vectors = (0..config.count)
            .map(|_| Mutex::new(Buffer::new(config.vector_capacity)))
            .collect();
        let matrices = (0..config.count)
            .map(|_| Mutex::new(Buffer::new(config.matrix_capacity)))
            .collect();
        Self {
            config,
            vectors,
            matrices,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self, kind: BufferKind) -> usize {
        match kind {
            BufferKind::Vector => self.config.vector_capacity,
            BufferKind::Matrix => self.config.matrix_capacity,
        }
    }

    fn buffer(&self, kind: BufferKind, id: usize) -> Result<&Mutex<Buffer>> {
        let file = match kind {
            BufferKind::Vector => &self.vectors,
            BufferKind::Matrix => &self.matrices,
        };
        file.get(id).ok_or(BufferError::InvalidBufferId {
            kind,
            id,
            count: self.config.count,
        })
    }

    /// Claim `access` to a buffer; multiple readers or a single writer may hold it.
    pub fn claim(&self, kind: BufferKind, id: usize, access: Access) -> Result<BufferLease<'_>> {
        self.buffer(kind, id)?;
        let mut leases = self.leases.lock().unwrap();
        let key = (kind, id);
        let next = match (leases.get(&key), access) {
            (None, Access::Read) => Lease::Readers(1),
            (None, Access::Write) => Lease::Writer,
            (Some(Lease::Readers(n)), Access::Read) => Lease::Readers(n + 1),
            _ => {
                return Err(BufferError::BufferConflict {
                    kind,
                    id,
                    wanted: access,
                })
            }
        };
        leases.insert(key, next);
        Ok(BufferLease {
            controller: self,
            kind,
            id,
        })
    }

    /// Read the tile at the read cursor and advance it. Elements past the written extent read as zero.
    pub async fn read_tile(&self, kind: BufferKind, id: usize) -> Result<Tile> {
        let tile = {
            let mut buffer = self.buffer(kind, id)?.lock().unwrap();
            if buffer.last == Some(Access::Write) {
                buffer.read_cursor = 0;
            }
            buffer.last = Some(Access::Read);
            let tile = buffer.gather(buffer.read_cursor, TILE_ELEMS);
            buffer.read_cursor += TILE_ELEMS;
            buffer.stats.tile_reads += 1;
            tile
        };
        runtime::cycle!(self.config.read_latency.count());
        Ok(tile)
    }

    /// Read `valid` elements starting at element `offset` without moving the cursors.
    ///
    /// Lanes at or beyond `valid` are zero.
    pub async fn read_tile_at(
        &self,
        kind: BufferKind,
        id: usize,
        offset: usize,
        valid: usize,
    ) -> Result<Tile> {
        let tile = {
            let mut buffer = self.buffer(kind, id)?.lock().unwrap();
            buffer.last = Some(Access::Read);
            buffer.stats.tile_reads += 1;
            buffer.gather(offset, valid.min(TILE_ELEMS))
        };
        runtime::cycle!(self.config.read_latency.count());
        Ok(tile)
    }

    /// Write a tile at the write cursor and advance it.
    ///
    /// The last slot of a buffer whose capacity is not a tile multiple is partial; lanes past the
    /// capacity are dropped and must be zero.
    pub async fn write_tile(&self, kind: BufferKind, id: usize, tile: &Tile) -> Result<()> {
        let capacity = self.capacity(kind);
        let slot = self.buffer(kind, id)?;
        {
            let buffer = slot.lock().unwrap();
            let offset = if buffer.last == Some(Access::Read) {
                0
            } else {
                buffer.write_cursor
            };
            let room = capacity.saturating_sub(offset).min(TILE_ELEMS);
            if room == 0 || tile[room..].iter().any(|&v| v != 0) {
                return Err(BufferError::BufferOverflow {
                    kind,
                    id,
                    offset,
                    capacity,
                });
            }
        }
        runtime::cycle!(self.config.write_latency.count());

        let mut buffer = slot.lock().unwrap();
        if buffer.last == Some(Access::Read) {
            buffer.write_cursor = 0;
        }
        buffer.last = Some(Access::Write);
        let offset = buffer.write_cursor;
        let room = capacity.saturating_sub(offset).min(TILE_ELEMS);
        buffer.data[offset..offset + room].copy_from_slice(&tile[..room]);
        buffer.write_cursor += TILE_ELEMS;
        buffer.extent = buffer.extent.max(offset + room);
        buffer.stats.tile_writes += 1;
        Ok(())
    }

    /// Clear both cursors and the written extent.
    pub fn reset(&self, kind: BufferKind, id: usize) -> Result<()> {
        let mut buffer = self.buffer(kind, id)?.lock().unwrap();
        buffer.read_cursor = 0;
        buffer.write_cursor = 0;
        buffer.extent = 0;
        buffer.last = None;
        clilog::debug!("reset {kind} buffer {id}");
        Ok(())
    }

    /// Move only the read cursor back to the start.
    pub fn rewind(&self, kind: BufferKind, id: usize) -> Result<()> {
        let mut buffer = self.buffer(kind, id)?.lock().unwrap();
        buffer.read_cursor = 0;
        Ok(())
    }

    /// Number of elements written since the last reset.
    pub fn extent(&self, kind: BufferKind, id: usize) -> Result<usize> {
        Ok(self.buffer(kind, id)?.lock().unwrap().extent)
    }

    /// The written part of a buffer.
    pub fn contents(&self, kind: BufferKind, id: usize) -> Result<Vec<i8>> {
        let buffer = self.buffer(kind, id)?.lock().unwrap();
        Ok(buffer.data[..buffer.extent].to_vec())
    }

    /// The written part of a buffer as raw two's complement bytes.
    pub fn dump(&self, kind: BufferKind, id: usize) -> Result<Vec<u8>> {
        let buffer = self.buffer(kind, id)?.lock().unwrap();
        Ok(buffer.data[..buffer.extent].as_bytes().to_vec())
    }

    pub fn stats(&self, kind: BufferKind, id: usize) -> Result<BufferStats> {
        Ok(self.buffer(kind, id)?.lock().unwrap().stats)
    }

    /// Statistics summed over every buffer of both files.
    pub fn total_stats(&self) -> BufferStats {
        let mut total = BufferStats::default();
        for slot in self.vectors.iter().chain(&self.matrices) {
            total += slot.lock().unwrap().stats;
        }
        total
    }
}
