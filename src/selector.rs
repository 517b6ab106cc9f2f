//! Routing between the two model families.
//!
//! The selector owns one long-lived engine per family plus a pass-through
//! placeholder; nothing is reconstructed on a switch. The active-engine
//! choice is a single atomic tag so the audio thread's `compute` and the
//! loader's `set_model_file` never contend on a lock here.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::Result;
use atomic_float::AtomicF32;

use crate::engine::{Engine, NamEngine, NetworkEngine, PassThrough};

/// The two interchangeable back-end families.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Family {
    /// `.nam` profiles (difference-equation style kernels).
    Difference,
    /// `.json` / `.aidax` layer-stack models.
    Network,
}

impl Family {
    /// Classify a model path by extension. Unrecognized extensions yield
    /// `None` and must leave the current selection unchanged.
    pub fn from_path(path: &Path) -> Option<Family> {
        match path.extension()?.to_str()? {
            "nam" => Some(Family::Difference),
            "json" | "aidax" => Some(Family::Network),
            _ => None,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Family::Difference => 1,
            Family::Network => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Family> {
        match tag {
            1 => Some(Family::Difference),
            2 => Some(Family::Network),
            _ => None,
        }
    }
}

/// Dispatcher over the engine slots. Every operation forwards to the
/// engine of the currently selected family.
pub struct EngineSelector {
    nam: NamEngine,
    network: NetworkEngine,
    bypass: PassThrough,
    family: AtomicU8,
    sample_rate: AtomicU32,
}

impl EngineSelector {
    pub fn new() -> Self {
        Self {
            nam: NamEngine::new(),
            network: NetworkEngine::new(),
            bypass: PassThrough,
            family: AtomicU8::new(0),
            sample_rate: AtomicU32::new(0),
        }
    }

    /// The currently selected family, `None` before the first recognized
    /// model file.
    pub fn family(&self) -> Option<Family> {
        Family::from_tag(self.family.load(Ordering::Acquire))
    }

    fn active(&self) -> &dyn Engine {
        match self.family() {
            None => &self.bypass,
            Some(Family::Difference) => &self.nam,
            Some(Family::Network) => &self.network,
        }
    }

    /// Classify the file and rebind the active engine only when its
    /// family differs from the current selection; a freshly selected
    /// engine is re-initialized with the last known host rate before it
    /// can be computed. The file-set is forwarded either way.
    pub fn set_model_file(&self, path: &Path) {
        if let Some(family) = Family::from_path(path) {
            if self.family() != Some(family) {
                self.family.store(family.tag(), Ordering::Release);
                self.active().init(self.sample_rate.load(Ordering::Relaxed));
            }
        }
        self.active().set_model_file(path);
    }

    pub fn model_file(&self) -> PathBuf {
        self.active().model_file()
    }

    pub fn init(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.active().init(sample_rate);
    }

    pub fn load_model(&self) -> Result<()> {
        self.active().load_model()
    }

    pub fn unload_model(&self) {
        self.active().unload_model();
    }

    pub fn clean_up(&self) {
        self.active().clean_up();
    }

    pub fn clear_state(&self) {
        self.active().clear_state();
    }

    pub fn connect(&self, port: u32, source: Arc<AtomicF32>) {
        self.active().connect(port, source);
    }

    pub fn normalize(&self, buf: &mut [f32]) {
        self.active().normalize(buf);
    }

    pub fn compute(&self, input: &[f32], output: &mut [f32]) {
        self.active().compute(input, output);
    }

    pub fn phase_offset(&self) -> i32 {
        self.active().phase_offset()
    }

    pub fn is_ready(&self) -> bool {
        self.active().is_ready()
    }
}

impl Default for EngineSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_mapping_is_pinned() {
        assert_eq!(
            Family::from_path(Path::new("amp.nam")),
            Some(Family::Difference)
        );
        assert_eq!(
            Family::from_path(Path::new("amp.json")),
            Some(Family::Network)
        );
        assert_eq!(
            Family::from_path(Path::new("amp.aidax")),
            Some(Family::Network)
        );
        assert_eq!(Family::from_path(Path::new("amp.txt")), None);
        assert_eq!(Family::from_path(Path::new("amp")), None);
    }

    #[test]
    fn test_same_family_does_not_rebind() {
        let selector = EngineSelector::new();
        selector.init(48_000);

        selector.set_model_file(Path::new("a.nam"));
        assert_eq!(selector.family(), Some(Family::Difference));
        assert_eq!(selector.model_file(), PathBuf::from("a.nam"));

        selector.set_model_file(Path::new("b.nam"));
        assert_eq!(selector.family(), Some(Family::Difference));
        assert_eq!(selector.model_file(), PathBuf::from("b.nam"));
    }

    #[test]
    fn test_family_change_rebinds() {
        let selector = EngineSelector::new();
        selector.init(48_000);

        selector.set_model_file(Path::new("a.nam"));
        selector.set_model_file(Path::new("b.json"));
        assert_eq!(selector.family(), Some(Family::Network));

        // The difference slot kept its own pending file.
        selector.set_model_file(Path::new("c.nam"));
        assert_eq!(selector.family(), Some(Family::Difference));
        assert_eq!(selector.model_file(), PathBuf::from("c.nam"));
    }

    #[test]
    fn test_unknown_extension_keeps_selection() {
        let selector = EngineSelector::new();
        selector.init(48_000);

        selector.set_model_file(Path::new("a.json"));
        selector.set_model_file(Path::new("whatever.txt"));
        assert_eq!(selector.family(), Some(Family::Network));
        // The file-set is still forwarded to the active engine.
        assert_eq!(selector.model_file(), PathBuf::from("whatever.txt"));
    }

    #[test]
    fn test_pass_through_before_any_selection() {
        let selector = EngineSelector::new();
        selector.init(48_000);

        let input = [0.5f32, -0.5, 0.25];
        let mut output = [0.0f32; 3];
        selector.compute(&input, &mut output);
        assert_eq!(output, input);
        assert!(selector.load_model().is_err());
        assert!(!selector.is_ready());
    }
}
