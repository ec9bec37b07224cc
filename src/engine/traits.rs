use crate::error::EngineError;

/// Opaque handle plus length naming a region inside the engine arena. Owned
/// by the engine until freed; holders must not outlive the bridge call that
/// produced the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawBuffer {
    pub ptr: u32,
    pub len: u32,
}

/// Engine-owned decode output: six buffers plus scalar metadata.
#[derive(Debug, Clone, Copy)]
pub struct RawScene {
    pub num_points: u32,
    pub sh_degree: u8,
    pub antialiased: bool,
    pub positions: RawBuffer,
    pub scales: RawBuffer,
    pub rotations: RawBuffer,
    pub alphas: RawBuffer,
    pub colors: RawBuffer,
    pub sh: RawBuffer,
}

impl RawScene {
    /// The output buffers in extraction order.
    pub fn buffers(&self) -> [RawBuffer; 6] {
        [
            self.positions,
            self.scales,
            self.rotations,
            self.alphas,
            self.colors,
            self.sh,
        ]
    }
}

/// Contract of the native decode engine. `decode` is not reentrant; callers
/// serialize decode invocations externally.
pub trait DecodeEngine: Send + Sync {
    /// Reserve `len` bytes inside the engine arena.
    fn allocate(&self, len: usize) -> Result<RawBuffer, EngineError>;

    /// Copy `bytes` into an allocated buffer. The slice length must match
    /// the buffer length exactly.
    fn write(&self, buf: RawBuffer, bytes: &[u8]) -> Result<(), EngineError>;

    /// Decode a previously written input buffer into engine-owned output
    /// buffers. The input buffer is not consumed; the caller frees it.
    fn decode(&self, input: RawBuffer) -> Result<RawScene, EngineError>;

    /// View an engine buffer as little-endian f32s and copy them out into
    /// host memory.
    fn read_f32(&self, buf: RawBuffer) -> Result<Vec<f32>, EngineError>;

    /// Release an engine buffer. Unknown handles are ignored.
    fn free(&self, buf: RawBuffer);
}
