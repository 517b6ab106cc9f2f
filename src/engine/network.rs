//! Network-family engine: RTNeural-style `.json` / `.aidax` models.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use atomic_float::AtomicF32;

use crate::network::load_network_file;

use super::slot::{Loaded, ModelSlot};
use super::Engine;

pub struct NetworkEngine {
    slot: ModelSlot,
}

impl NetworkEngine {
    pub fn new() -> Self {
        Self {
            slot: ModelSlot::new(),
        }
    }
}

impl Default for NetworkEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for NetworkEngine {
    fn set_model_file(&self, path: &Path) {
        self.slot.set_file(path);
    }

    fn model_file(&self) -> PathBuf {
        self.slot.file()
    }

    fn load_model(&self) -> Result<()> {
        let path = self.slot.file();
        let kernel = load_network_file(&path)?;
        let model_rate = kernel.sample_rate();
        let loaded = Loaded::new(kernel, self.slot.host_rate());
        self.slot.publish(loaded);
        log::info!(
            "loaded network model {} (rate={})",
            path.display(),
            model_rate
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

    fn normalize(&self, _buf: &mut [f32]) {}

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
