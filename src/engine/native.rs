// Arena-backed engine for the packed gaussian asset format.
//
// The engine owns all of its memory: callers allocate a buffer, copy the
// packed payload in, decode, and read the outputs back out before freeing
// every handle. Output memory is raw little-endian f32 bytes; `read_f32`
// is the typed view over it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::traits::{DecodeEngine, RawBuffer, RawScene};
use crate::cloud::{sh_coeff_count, MAX_SH_DEGREE, SH_CHANNELS};
use crate::config::LoaderConfig;
use crate::error::{EngineError, InitializationError};

pub const MAGIC: u32 = 0x5053_474E; // "NGSP"
pub const VERSION: u32 = 2;
pub const FLAG_ANTIALIASED: u8 = 0x1;
pub const HEADER_LEN: usize = 16;

/// Hard ceiling on the point count a single asset may declare.
pub const MAX_POINTS: u32 = 16_000_000;

/// Packed colors span [-0.5, 0.5] scaled by this factor.
const COLOR_SCALE: f32 = 0.15;

struct Arena {
    slots: HashMap<u32, Box<[u8]>>,
    next_ptr: u32,
    capacity: usize,
    used: usize,
}

impl Arena {
    fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            next_ptr: 1,
            capacity,
            used: 0,
        }
    }

    fn allocate(&mut self, len: usize) -> Result<RawBuffer, EngineError> {
        let available = self.capacity - self.used;
        if len > u32::MAX as usize || len > available {
            return Err(EngineError::Exhausted {
                requested: len,
                available,
            });
        }
        let ptr = self.next_ptr;
        self.next_ptr = self.next_ptr.wrapping_add(1).max(1);
        self.slots.insert(ptr, vec![0u8; len].into_boxed_slice());
        self.used += len;
        Ok(RawBuffer {
            ptr,
            len: len as u32,
        })
    }

    fn allocate_f32s(&mut self, values: &[f32]) -> Result<RawBuffer, EngineError> {
        let buf = self.allocate(values.len() * std::mem::size_of::<f32>())?;
        let dst = self
            .slots
            .get_mut(&buf.ptr)
            .ok_or(EngineError::InvalidHandle { handle: buf.ptr })?;
        for (chunk, v) in dst.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        Ok(buf)
    }

    fn free(&mut self, buf: RawBuffer) {
        match self.slots.remove(&buf.ptr) {
            Some(slab) => self.used -= slab.len(),
            None => warn!("free of unknown engine buffer {:#x}", buf.ptr),
        }
    }

    fn get(&self, buf: RawBuffer) -> Result<&[u8], EngineError> {
        let slab = self
            .slots
            .get(&buf.ptr)
            .ok_or(EngineError::InvalidHandle { handle: buf.ptr })?;
        if slab.len() != buf.len as usize {
            return Err(EngineError::InvalidHandle { handle: buf.ptr });
        }
        Ok(slab)
    }

    fn get_mut(&mut self, buf: RawBuffer) -> Result<&mut [u8], EngineError> {
        let slab = self
            .slots
            .get_mut(&buf.ptr)
            .ok_or(EngineError::InvalidHandle { handle: buf.ptr })?;
        if slab.len() != buf.len as usize {
            return Err(EngineError::InvalidHandle { handle: buf.ptr });
        }
        Ok(slab)
    }
}

pub struct NativeSplatEngine {
    arena: Mutex<Arena>,
}

impl NativeSplatEngine {
    pub fn new(arena_capacity: usize) -> Self {
        Self {
            arena: Mutex::new(Arena::new(arena_capacity)),
        }
    }

    /// Bring up an engine sized from `config`. Async because initialization
    /// is a suspension point of the engine contract.
    pub async fn load(config: &LoaderConfig) -> Result<Self, InitializationError> {
        if config.arena_capacity < HEADER_LEN {
            return Err(InitializationError(format!(
                "arena capacity {} is smaller than one asset header",
                config.arena_capacity
            )));
        }
        info!(
            "native splat engine ready, arena capacity {} bytes",
            config.arena_capacity
        );
        Ok(Self::new(config.arena_capacity))
    }

    /// Buffers currently allocated. Zero whenever no decode is in flight.
    pub fn outstanding(&self) -> usize {
        self.arena.lock().slots.len()
    }

    /// Bytes currently allocated.
    pub fn used_bytes(&self) -> usize {
        self.arena.lock().used
    }
}

impl DecodeEngine for NativeSplatEngine {
    fn allocate(&self, len: usize) -> Result<RawBuffer, EngineError> {
        self.arena.lock().allocate(len)
    }

    fn write(&self, buf: RawBuffer, bytes: &[u8]) -> Result<(), EngineError> {
        let mut arena = self.arena.lock();
        let dst = arena.get_mut(buf)?;
        if bytes.len() != dst.len() {
            return Err(EngineError::malformed(format!(
                "write of {} bytes into a {} byte buffer",
                bytes.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn decode(&self, input: RawBuffer) -> Result<RawScene, EngineError> {
        let mut arena = self.arena.lock();
        let unpacked = unpack(arena.get(input)?)?;

        let arrays = [
            &unpacked.positions,
            &unpacked.scales,
            &unpacked.rotations,
            &unpacked.alphas,
            &unpacked.colors,
            &unpacked.sh,
        ];
        let mut outputs: Vec<RawBuffer> = Vec::with_capacity(arrays.len());
        for array in arrays {
            match arena.allocate_f32s(array) {
                Ok(buf) => outputs.push(buf),
                Err(e) => {
                    // Never leak partial outputs out of a failed decode.
                    for buf in outputs.drain(..) {
                        arena.free(buf);
                    }
                    return Err(e);
                }
            }
        }

        debug!(
            "decoded {} points, sh_degree={}",
            unpacked.num_points, unpacked.sh_degree
        );
        Ok(RawScene {
            num_points: unpacked.num_points,
            sh_degree: unpacked.sh_degree,
            antialiased: unpacked.antialiased,
            positions: outputs[0],
            scales: outputs[1],
            rotations: outputs[2],
            alphas: outputs[3],
            colors: outputs[4],
            sh: outputs[5],
        })
    }

    fn read_f32(&self, buf: RawBuffer) -> Result<Vec<f32>, EngineError> {
        let arena = self.arena.lock();
        let src = arena.get(buf)?;
        if src.len() % 4 != 0 {
            return Err(EngineError::malformed(format!(
                "buffer of {} bytes is not a whole number of f32s",
                src.len()
            )));
        }
        Ok(src
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn free(&self, buf: RawBuffer) {
        self.arena.lock().free(buf);
    }
}

struct Unpacked {
    num_points: u32,
    sh_degree: u8,
    antialiased: bool,
    positions: Vec<f32>,
    scales: Vec<f32>,
    rotations: Vec<f32>,
    alphas: Vec<f32>,
    colors: Vec<f32>,
    sh: Vec<f32>,
}

struct Reader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, off: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EngineError> {
        let end = self
            .off
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                EngineError::malformed(format!(
                    "input truncated at byte {}, wanted {} more",
                    self.off, n
                ))
            })?;
        let slice = &self.data[self.off..end];
        self.off = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, EngineError> {
        Ok(self.take(1)?[0])
    }

    fn u32_le(&mut self) -> Result<u32, EngineError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn finish(&self) -> Result<(), EngineError> {
        if self.off != self.data.len() {
            return Err(EngineError::malformed(format!(
                "{} trailing bytes after the payload",
                self.data.len() - self.off
            )));
        }
        Ok(())
    }
}

/// Sign-extend a 24-bit little-endian fixed-point value.
fn fixed24(bytes: &[u8]) -> f32 {
    let mut v = bytes[0] as i32 | (bytes[1] as i32) << 8 | (bytes[2] as i32) << 16;
    if v & 0x0080_0000 != 0 {
        v -= 0x0100_0000;
    }
    v as f32
}

fn unpack(data: &[u8]) -> Result<Unpacked, EngineError> {
    let mut r = Reader::new(data);

    let magic = r.u32_le()?;
    if magic != MAGIC {
        return Err(EngineError::malformed(format!("bad magic {magic:#010x}")));
    }
    let version = r.u32_le()?;
    if version != VERSION {
        return Err(EngineError::malformed(format!(
            "unsupported version {version}"
        )));
    }
    let num_points = r.u32_le()?;
    if num_points > MAX_POINTS {
        return Err(EngineError::malformed(format!(
            "point count {num_points} over the {MAX_POINTS} limit"
        )));
    }
    let sh_degree = r.u8()?;
    if sh_degree > MAX_SH_DEGREE {
        return Err(EngineError::malformed(format!(
            "sh degree {sh_degree} over the {MAX_SH_DEGREE} limit"
        )));
    }
    let fractional_bits = r.u8()?;
    if fractional_bits > 24 {
        return Err(EngineError::malformed(format!(
            "{fractional_bits} fractional bits in a 24-bit position"
        )));
    }
    let flags = r.u8()?;
    let reserved = r.u8()?;
    if reserved != 0 {
        return Err(EngineError::malformed("nonzero reserved header byte"));
    }

    let n = num_points as usize;
    let sh_dim = SH_CHANNELS * sh_coeff_count(sh_degree);
    let position_scale = 1.0 / (1u32 << fractional_bits) as f32;

    let mut positions = Vec::with_capacity(n * 3);
    for triple in r.take(n * 9)?.chunks_exact(3) {
        positions.push(fixed24(triple) * position_scale);
    }

    let alphas: Vec<f32> = r.take(n)?.iter().map(|&b| b as f32 / 255.0).collect();

    let colors: Vec<f32> = r
        .take(n * 3)?
        .iter()
        .map(|&b| (b as f32 / 255.0 - 0.5) / COLOR_SCALE)
        .collect();

    let scales: Vec<f32> = r
        .take(n * 3)?
        .iter()
        .map(|&b| b as f32 / 16.0 - 10.0)
        .collect();

    // Rotations pack xyz only; w is recovered from the unit-norm constraint.
    let mut rotations = Vec::with_capacity(n * 4);
    for triple in r.take(n * 3)?.chunks_exact(3) {
        let x = triple[0] as f32 / 127.5 - 1.0;
        let y = triple[1] as f32 / 127.5 - 1.0;
        let z = triple[2] as f32 / 127.5 - 1.0;
        let w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
        rotations.extend_from_slice(&[x, y, z, w]);
    }

    let sh: Vec<f32> = r
        .take(n * sh_dim)?
        .iter()
        .map(|&b| (b as f32 - 128.0) / 128.0)
        .collect();

    r.finish()?;

    Ok(Unpacked {
        num_points,
        sh_degree,
        antialiased: flags & FLAG_ANTIALIASED != 0,
        positions,
        scales,
        rotations,
        alphas,
        colors,
        sh,
    })
}
