//! The uniform engine surface the dispatcher routes through.

mod nam;
mod network;
mod slot;

pub use nam::NamEngine;
pub use network::NetworkEngine;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use atomic_float::AtomicF32;

/// Uniform lifecycle and per-block contract over the model back-ends.
///
/// Two actors call in: a loader thread drives the lifecycle
/// (`set_model_file`, `load_model`, `unload_model`, `clean_up`) and may
/// block; the audio thread calls `compute` (and `normalize`) under a hard
/// deadline and must never block or allocate.
pub trait Engine: Send + Sync {
    /// Record the pending model path. No I/O happens here.
    fn set_model_file(&self, path: &Path);

    fn model_file(&self) -> PathBuf;

    /// Parse and construct the model, then publish it for the audio
    /// thread. Loader thread only. On failure the previously published
    /// model, if any, keeps playing.
    fn load_model(&self) -> Result<()>;

    /// Begin fading out the active model. Frees nothing.
    fn unload_model(&self);

    /// Wait for the fade-out to complete, then release the retired model.
    /// Loader thread only; bounded wait.
    fn clean_up(&self);

    /// Reset recurrent/filter state without touching load state.
    fn clear_state(&self);

    /// Set the host sample rate. Must be called before the first `compute`.
    fn init(&self, sample_rate: u32);

    /// Bind an external control value to a port index.
    fn connect(&self, port: u32, source: Arc<AtomicF32>);

    /// Apply the loudness-normalization gain. No-op outside the
    /// difference family.
    fn normalize(&self, buf: &mut [f32]);

    /// Per-block hot path. RT-safe.
    fn compute(&self, input: &[f32], output: &mut [f32]);

    /// Extra latency in host samples introduced by the model/resampler
    /// pair, for the caller's delay compensation.
    fn phase_offset(&self) -> i32;

    /// True once a model is constructed and safe to process with.
    fn is_ready(&self) -> bool;
}

/// Placeholder engine active before any model family was ever selected.
/// Audio keeps flowing: `compute` passes the input through unchanged.
pub struct PassThrough;

impl Engine for PassThrough {
    fn set_model_file(&self, _path: &Path) {}

    fn model_file(&self) -> PathBuf {
        PathBuf::new()
    }

    fn load_model(&self) -> Result<()> {
        bail!("no model family selected")
    }

    fn unload_model(&self) {}

    fn clean_up(&self) {}

    fn clear_state(&self) {}

    fn init(&self, _sample_rate: u32) {}

    fn connect(&self, _port: u32, _source: Arc<AtomicF32>) {}

    fn normalize(&self, _buf: &mut [f32]) {}

    fn compute(&self, input: &[f32], output: &mut [f32]) {
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        output[n..].fill(0.0);
    }

    fn phase_offset(&self) -> i32 {
        0
    }

    fn is_ready(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_through_copies_input() {
        let engine = PassThrough;
        let input = [0.1, -0.2, 0.3];
        let mut output = [0.0f32; 3];
        engine.compute(&input, &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn test_pass_through_never_loads() {
        let engine = PassThrough;
        assert!(engine.load_model().is_err());
        assert!(!engine.is_ready());
        assert_eq!(engine.phase_offset(), 0);
    }
}
