//! The inference seam shared by both model families.

/// A loaded, ready-to-run inference model.
///
/// Implementations process audio at their native sample rate with internal
/// recurrent state. All methods are RT-safe after construction (no
/// allocation or I/O).
pub trait Kernel: Send {
    /// Process a block. `input` and `output` must have the same length.
    fn process(&mut self, input: &[f32], output: &mut [f32]);

    /// Reset internal state (hidden states, delay lines).
    fn reset(&mut self);

    /// The sample rate this model was trained at.
    fn sample_rate(&self) -> u32;
}
