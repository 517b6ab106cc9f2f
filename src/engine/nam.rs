//! Difference-family engine: `.nam` profiles with loudness normalization.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use atomic_float::AtomicF32;

use crate::constants::TARGET_LOUDNESS_DB;
use crate::nam::load_nam_file;

use super::slot::{Loaded, ModelSlot};
use super::Engine;

pub struct NamEngine {
    slot: ModelSlot,
    /// Post-inference gain bringing the model to the loudness target.
    /// Read lock-free by `normalize`.
    norm_gain: AtomicF32,
}

impl NamEngine {
    pub fn new() -> Self {
        Self {
            slot: ModelSlot::new(),
            norm_gain: AtomicF32::new(1.0),
        }
    }
}

impl Default for NamEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for NamEngine {
    fn set_model_file(&self, path: &Path) {
        self.slot.set_file(path);
    }

    fn model_file(&self) -> PathBuf {
        self.slot.file()
    }

    fn load_model(&self) -> Result<()> {
        let path = self.slot.file();
        let profile = load_nam_file(&path)?;
        let model_rate = profile.kernel.sample_rate();
        let loaded = Loaded::new(profile.kernel, self.slot.host_rate());

        let gain = profile
            .loudness_db
            .map_or(1.0, |db| 10f32.powf((TARGET_LOUDNESS_DB - db) / 20.0));
        self.norm_gain.store(gain, Ordering::Relaxed);

        self.slot.publish(loaded);
        log::info!(
            "loaded .nam model {} (rate={}, norm_gain={:.3})",
            path.display(),
            model_rate,
            gain
        );
        Ok(())
    }

    fn unload_model(&self) {
        self.slot.retire();
    }

    fn clean_up(&self) {
        self.slot.wait_retired();
    }

    fn clear_state(&self) {
        self.slot.clear_state();
    }

    fn init(&self, sample_rate: u32) {
        self.slot.init(sample_rate);
    }

    fn connect(&self, port: u32, source: Arc<AtomicF32>) {
        self.slot.connect(port, source);
    }

    fn normalize(&self, buf: &mut [f32]) {
        let gain = self.norm_gain.load(Ordering::Relaxed);
        if gain != 1.0 {
            for s in buf.iter_mut() {
                *s *= gain;
            }
        }
    }

    fn compute(&self, input: &[f32], output: &mut [f32]) {
        self.slot.compute(input, output);
    }

    fn phase_offset(&self) -> i32 {
        self.slot.phase_offset()
    }

    fn is_ready(&self) -> bool {
        self.slot.is_ready()
    }
}
