// Transfer envelope — moves decoded buffers to the consumer without copying.

use crate::cloud::GaussianCloud;

/// Scalar scene metadata carried alongside the moved buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneMeta {
    pub num_points: u32,
    pub sh_degree: u8,
    pub antialiased: bool,
}

/// The externally visible load result. Building one consumes the decoded
/// cloud, so the moved-from scene can never be read again.
#[derive(Debug)]
pub struct TransferEnvelope {
    pub meta: SceneMeta,
    pub positions: Vec<f32>,
    pub scales: Vec<f32>,
    pub rotations: Vec<f32>,
    pub alphas: Vec<f32>,
    pub colors: Vec<f32>,
    pub sh: Vec<f32>,
}

impl TransferEnvelope {
    /// Move every buffer out of `cloud`. No array data is copied.
    pub fn build(cloud: GaussianCloud) -> Self {
        Self {
            meta: SceneMeta {
                num_points: cloud.num_points,
                sh_degree: cloud.sh_degree,
                antialiased: cloud.antialiased,
            },
            positions: cloud.positions,
            scales: cloud.scales,
            rotations: cloud.rotations,
            alphas: cloud.alphas,
            colors: cloud.colors,
            sh: cloud.sh,
        }
    }

    /// Total bytes held by the six buffers.
    pub fn payload_bytes(&self) -> usize {
        (self.positions.len()
            + self.scales.len()
            + self.rotations.len()
            + self.alphas.len()
            + self.colors.len()
            + self.sh.len())
            * std::mem::size_of::<f32>()
    }
}

impl From<GaussianCloud> for TransferEnvelope {
    fn from(cloud: GaussianCloud) -> Self {
        Self::build(cloud)
    }
}
