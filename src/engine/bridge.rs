// Decode bridge — copy-in, decode, copy-out, unconditional release.
//
// Engine memory is short lived: everything allocated for one decode is
// freed before the call returns, on success and on every error path. The
// copy in `extract` is the only point where data crosses from engine
// ownership into host ownership, and it is mandatory; the engine buffers
// are gone right after.

use tracing::debug;

use super::traits::{DecodeEngine, RawBuffer, RawScene};
use crate::cloud::GaussianCloud;
use crate::error::LoadError;

/// Frees every tracked engine buffer when dropped, so each exit path out of
/// the bridge releases exactly what it acquired.
struct BufferGuard<'a> {
    engine: &'a dyn DecodeEngine,
    buffers: Vec<RawBuffer>,
}

impl<'a> BufferGuard<'a> {
    fn new(engine: &'a dyn DecodeEngine) -> Self {
        Self {
            engine,
            buffers: Vec::new(),
        }
    }

    fn track(&mut self, buf: RawBuffer) {
        self.buffers.push(buf);
    }
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        for buf in self.buffers.drain(..) {
            self.engine.free(buf);
        }
    }
}

/// Run one decode: allocate and copy the payload into the engine, decode,
/// copy every output array into host memory, and free all engine buffers.
pub fn decode_cloud(engine: &dyn DecodeEngine, bytes: &[u8]) -> Result<GaussianCloud, LoadError> {
    let mut guard = BufferGuard::new(engine);

    let input = engine.allocate(bytes.len()).map_err(LoadError::from_engine)?;
    guard.track(input);
    engine.write(input, bytes).map_err(LoadError::from_engine)?;

    let raw = engine.decode(input).map_err(LoadError::from_engine)?;
    for buf in raw.buffers() {
        guard.track(buf);
    }

    let cloud = extract(engine, &raw)?;
    cloud.validate().map_err(LoadError::Decode)?;
    debug!(
        "decoded cloud: {} points, sh_degree={}, {} input bytes",
        cloud.num_points,
        cloud.sh_degree,
        bytes.len()
    );
    Ok(cloud)
}

fn extract(engine: &dyn DecodeEngine, raw: &RawScene) -> Result<GaussianCloud, LoadError> {
    Ok(GaussianCloud {
        num_points: raw.num_points,
        sh_degree: raw.sh_degree,
        antialiased: raw.antialiased,
        positions: engine.read_f32(raw.positions).map_err(LoadError::from_engine)?,
        scales: engine.read_f32(raw.scales).map_err(LoadError::from_engine)?,
        rotations: engine.read_f32(raw.rotations).map_err(LoadError::from_engine)?,
        alphas: engine.read_f32(raw.alphas).map_err(LoadError::from_engine)?,
        colors: engine.read_f32(raw.colors).map_err(LoadError::from_engine)?,
        sh: engine.read_f32(raw.sh).map_err(LoadError::from_engine)?,
    })
}
