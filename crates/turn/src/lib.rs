//! End-of-utterance and end-of-turn decision logic.
//!
//! The detector is a pure calculator: given a view diff it answers "how
//! long until this turn should be finalized". Scheduling and cancellation
//! live in the `TurnTaskProcessor`, which gates end-of-turn emission on
//! the completion of every task registered within the current turn. The
//! optional acoustic model sits behind the `SmartTurnPredicate` seam.

mod detector;
mod processor;

pub use detector::{EndOfUtteranceMode, TurnDetector, TurnDetectorConfig};
pub use processor::TurnTaskProcessor;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("prediction failed: {0}")]
    Prediction(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, TurnError>;

/// Verdict from the acoustic turn model.
#[derive(Debug, Clone, Copy)]
pub struct TurnPrediction {
    pub probability: f32,
    pub threshold: f32,
}

impl TurnPrediction {
    pub fn is_complete(&self) -> bool {
        self.probability >= self.threshold
    }
}

/// Acoustic endpoint predictor over a recent window of session audio.
///
/// Implementations typically wrap an ONNX model; whether the model is
/// cached process-wide is the implementation's concern.
#[async_trait]
pub trait SmartTurnPredicate: Send + Sync {
    /// Predict whether the speech in `audio` (raw PCM in the session's
    /// encoding) sounds complete.
    async fn predict(&self, audio: &[u8], language: &str) -> Result<TurnPrediction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_threshold() {
        let complete = TurnPrediction {
            probability: 0.9,
            threshold: 0.8,
        };
        let incomplete = TurnPrediction {
            probability: 0.5,
            threshold: 0.8,
        };
        assert!(complete.is_complete());
        assert!(!incomplete.is_complete());
    }
}
