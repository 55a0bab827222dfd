use serde::{Deserialize, Serialize};

use crate::DEFAULT_POOL_SIZE;

/// Byte boundary to which outbound frames are padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Granularity {
    #[default]
    Four,
    Eight,
    Sixteen,
    ThirtyTwo,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Four,
        Granularity::Eight,
        Granularity::Sixteen,
        Granularity::ThirtyTwo,
    ];

    pub fn bytes(self) -> usize {
        match self {
            Granularity::Four => 4,
            Granularity::Eight => 8,
            Granularity::Sixteen => 16,
            Granularity::ThirtyTwo => 32,
        }
    }
}

impl TryFrom<u32> for Granularity {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            4 => Ok(Granularity::Four),
            8 => Ok(Granularity::Eight),
            16 => Ok(Granularity::Sixteen),
            32 => Ok(Granularity::ThirtyTwo),
            other => Err(format!("granularity must be 4, 8, 16 or 32 (got {other})")),
        }
    }
}

impl From<Granularity> for u32 {
    fn from(value: Granularity) -> Self {
        value.bytes() as u32
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

/// Link layer settings fixed at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Padding boundary for outbound frames.
    pub granularity: Granularity,
    /// Number of frame buffers in the pool.
    pub pool_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::Four,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}
