// Decoded gaussian cloud — per-point geometry and appearance arrays.

use crate::error::EngineError;

/// Floats per point in each fixed-stride array.
pub const POSITION_STRIDE: usize = 3;
pub const SCALE_STRIDE: usize = 3;
pub const ROTATION_STRIDE: usize = 4;
pub const ALPHA_STRIDE: usize = 1;
pub const COLOR_STRIDE: usize = 3;

/// Color channels per SH coefficient.
pub const SH_CHANNELS: usize = 3;

/// Highest spherical-harmonic degree the format carries.
pub const MAX_SH_DEGREE: u8 = 3;

/// SH coefficients per color channel for a given degree.
pub fn sh_coeff_count(sh_degree: u8) -> usize {
    match sh_degree {
        0 => 0,
        1 => 3,
        2 => 8,
        _ => 15,
    }
}

/// A decoded point-cloud scene. Every array holds `num_points` entries at its
/// field stride; `sh` additionally scales with the SH degree.
#[derive(Debug, Clone, Default)]
pub struct GaussianCloud {
    pub num_points: u32,
    pub sh_degree: u8,
    pub antialiased: bool,
    pub positions: Vec<f32>,
    pub scales: Vec<f32>,
    pub rotations: Vec<f32>,
    pub alphas: Vec<f32>,
    pub colors: Vec<f32>,
    pub sh: Vec<f32>,
}

impl GaussianCloud {
    /// Expected length of the SH array for a point count and degree.
    pub fn sh_len(num_points: u32, sh_degree: u8) -> usize {
        num_points as usize * SH_CHANNELS * sh_coeff_count(sh_degree)
    }

    /// Check every array against its per-point stride. A mismatch means the
    /// decode produced a silently short (or long) array and must be treated
    /// as a decode failure.
    pub fn validate(&self) -> Result<(), EngineError> {
        let n = self.num_points as usize;
        let checks = [
            ("positions", self.positions.len(), n * POSITION_STRIDE),
            ("scales", self.scales.len(), n * SCALE_STRIDE),
            ("rotations", self.rotations.len(), n * ROTATION_STRIDE),
            ("alphas", self.alphas.len(), n * ALPHA_STRIDE),
            ("colors", self.colors.len(), n * COLOR_STRIDE),
            ("sh", self.sh.len(), Self::sh_len(self.num_points, self.sh_degree)),
        ];
        for (name, got, want) in checks {
            if got != want {
                return Err(EngineError::malformed(format!(
                    "{name} array holds {got} floats, expected {want}"
                )));
            }
        }
        Ok(())
    }

    /// Interleave the arrays into one record per point. Color occupies the
    /// first three slots of `color_sh`, SH coefficients follow in storage
    /// order, and degrees below 3 leave the tail zeroed.
    pub fn to_splats(&self) -> Vec<Splat> {
        let n = self.num_points as usize;
        let sh_stride = SH_CHANNELS * sh_coeff_count(self.sh_degree);
        let mut splats = vec![Splat::default(); n];
        for (i, splat) in splats.iter_mut().enumerate() {
            splat.position = [
                self.positions[i * 3],
                self.positions[i * 3 + 1],
                self.positions[i * 3 + 2],
            ];
            splat.scale = [
                self.scales[i * 3],
                self.scales[i * 3 + 1],
                self.scales[i * 3 + 2],
            ];
            splat.rotation = [
                self.rotations[i * 4],
                self.rotations[i * 4 + 1],
                self.rotations[i * 4 + 2],
                self.rotations[i * 4 + 3],
            ];
            splat.alpha = self.alphas[i];
            splat.color_sh[..3].copy_from_slice(&self.colors[i * 3..i * 3 + 3]);
            splat.color_sh[3..3 + sh_stride]
                .copy_from_slice(&self.sh[i * sh_stride..(i + 1) * sh_stride]);
        }
        splats
    }
}

/// One point in interleaved layout: 59 floats, 236 bytes.
#[derive(Debug, Clone, Copy)]
pub struct Splat {
    pub position: [f32; 3],
    pub scale: [f32; 3],
    pub rotation: [f32; 4],
    pub alpha: f32,
    /// RGB in the first three slots, SH coefficients after.
    pub color_sh: [f32; 48],
}

impl Default for Splat {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            scale: [0.0; 3],
            rotation: [0.0; 4],
            alpha: 0.0,
            color_sh: [0.0; 48],
        }
    }
}
