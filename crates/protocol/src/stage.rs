//! Generation stage vocabulary.
//!
//! A job's execution passes through six fixed stages. Each stage carries
//! a fixed weight toward the overall completion percentage (weights sum
//! to exactly 100) and a default duration estimate used by the progress
//! tracker until historical samples are available.

use serde::{Deserialize, Serialize};

/// One of the six fixed phases of a generation job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    Initializing,
    LoadingModels,
    Encoding,
    Sampling,
    Decoding,
    PostProcessing,
}

impl GenerationStage {
    /// All stages in execution order.
    pub const ALL: [GenerationStage; 6] = [
        GenerationStage::Initializing,
        GenerationStage::LoadingModels,
        GenerationStage::Encoding,
        GenerationStage::Sampling,
        GenerationStage::Decoding,
        GenerationStage::PostProcessing,
    ];

    /// Fixed completion weight of this stage, as a percentage of the
    /// whole job. Sampling dominates because it scales with step count;
    /// every other stage is near-fixed overhead.
    pub fn weight(self) -> f64 {
        match self {
            Self::Initializing => 2.0,
            Self::LoadingModels => 10.0,
            Self::Encoding => 3.0,
            Self::Sampling => 80.0,
            Self::Decoding => 4.0,
            Self::PostProcessing => 1.0,
        }
    }

    /// Default duration estimate in seconds, used when no historical
    /// timing samples exist yet for this stage.
    pub fn default_estimate_secs(self) -> f64 {
        match self {
            Self::Initializing => 0.5,
            Self::LoadingModels => 2.0,
            Self::Encoding => 0.5,
            Self::Sampling => 10.0,
            Self::Decoding => 1.0,
            Self::PostProcessing => 0.5,
        }
    }

    /// Index of this stage within [`Self::ALL`].
    pub fn ordinal(self) -> usize {
        match self {
            Self::Initializing => 0,
            Self::LoadingModels => 1,
            Self::Encoding => 2,
            Self::Sampling => 3,
            Self::Decoding => 4,
            Self::PostProcessing => 5,
        }
    }

    /// Stages that come strictly after this one, in execution order.
    pub fn remaining_after(self) -> &'static [GenerationStage] {
        &Self::ALL[self.ordinal() + 1..]
    }
}
