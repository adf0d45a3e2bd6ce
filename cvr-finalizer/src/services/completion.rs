//! Completion percentage estimation
//!
//! The objective/turn-budget state machine lives in the live agent. This
//! service only consumes the resulting percentage, through the
//! `CompletionEstimator` seam.

use anyhow::{bail, Result};
use cvr_common::db::{ConversationResponse, Speaker, TranscriptTurn};

/// Produces a completion percentage in 0..=100
pub trait CompletionEstimator: Send + Sync {
    fn estimate(&self, response: &ConversationResponse, transcript: &[TranscriptTurn]) -> Result<u8>;
}

/// Uses the progress the live agent reported on the response
///
/// A transcript without a single participant turn is 0% regardless of
/// what was reported; a missing report is also 0%.
#[derive(Debug, Clone, Default)]
pub struct ReportedProgressEstimator;

impl CompletionEstimator for ReportedProgressEstimator {
    fn estimate(&self, response: &ConversationResponse, transcript: &[TranscriptTurn]) -> Result<u8> {
        if !transcript.iter().any(|turn| turn.speaker == Speaker::User) {
            return Ok(0);
        }

        match response.agent_progress {
            None => Ok(0),
            Some(progress) if !progress.is_finite() => {
                bail!("agent progress is not a finite number: {}", progress)
            }
            Some(progress) => Ok(progress.round().clamp(0.0, 100.0) as u8),
        }
    }
}
