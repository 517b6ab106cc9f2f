//! Click-free hot-swap engine for neural amp/cab models.
//!
//! Two interchangeable inference back-ends live behind one dispatcher:
//! `.nam` profiles (difference family) and RTNeural-style `.json`/`.aidax`
//! layer stacks (network family). Models are loaded and torn down on a
//! non-real-time loader thread while the audio thread keeps calling
//! [`EngineSelector::compute`]; every swap is crossfaded and every model's
//! native sample rate is adapted to the host rate.
//!
//! Hot-path contract: `compute` and `normalize` never block (one
//! `try_lock` attempt at most) and never allocate.

pub mod constants;
pub mod engine;
mod kernel;
pub mod nam;
pub mod network;
pub mod resampler;
mod selector;

pub use engine::{Engine, NamEngine, NetworkEngine, PassThrough};
pub use kernel::Kernel;
pub use selector::{EngineSelector, Family};
