//! Model publication, crossfade, and disposal machinery shared by both
//! engine families.
//!
//! Two actors touch a slot: the loader (set file, publish, retire, wait,
//! drop) and the audio callback (`compute`). The audio side takes a single
//! `try_lock` attempt per block and outputs silence when the loader holds
//! the lock; the loader only holds the lock for pointer swaps and state
//! flips, never while parsing or constructing a model. A retired model is
//! dropped only after its ramp-out completed, or after the bounded wait
//! expired; in that case the drop still happens under the lock, where no
//! concurrent reader can exist.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use atomic_float::AtomicF32;

use crate::constants::{ramp_len, MAX_BLOCK_SIZE, PORT_INPUT_GAIN, PORT_OUTPUT_GAIN};
use crate::kernel::Kernel;
use crate::resampler::FixedRateResampler;

/// A fully constructed model plus its rate-adaptation state.
pub(crate) struct Loaded {
    kernel: Box<dyn Kernel>,
    resampler: Option<FixedRateResampler>,
    model_rate: u32,
    model_in: Vec<f32>,
    model_out: Vec<f32>,
    host_back: Vec<f32>,
}

impl Loaded {
    pub fn new(kernel: Box<dyn Kernel>, host_rate: u32) -> Self {
        let model_rate = kernel.sample_rate();
        let mut loaded = Self {
            kernel,
            resampler: None,
            model_rate,
            model_in: Vec::new(),
            model_out: Vec::new(),
            host_back: Vec::new(),
        };
        loaded.configure(host_rate);
        loaded
    }

    /// (Re)derive the resampling stage for a host rate. Loader-thread only.
    pub fn configure(&mut self, host_rate: u32) {
        if host_rate != self.model_rate && host_rate > 0 {
            let to_model =
                FixedRateResampler::max_output_len(MAX_BLOCK_SIZE, host_rate, self.model_rate);
            let back = FixedRateResampler::max_output_len(to_model, self.model_rate, host_rate);
            self.model_in = vec![0.0; to_model + 64];
            self.model_out = vec![0.0; to_model + 64];
            self.host_back = vec![0.0; back + 64];
            self.resampler = Some(FixedRateResampler::new(host_rate, self.model_rate));
        } else {
            self.resampler = None;
            self.model_in = Vec::new();
            self.model_out = Vec::new();
            self.host_back = Vec::new();
        }
    }

    pub fn latency(&self) -> i32 {
        self.resampler.as_ref().map_or(0, FixedRateResampler::latency)
    }

    fn reset(&mut self) {
        self.kernel.reset();
        if let Some(rs) = &mut self.resampler {
            rs.reset();
        }
    }

    /// Run the model over one host-rate block. RT-safe.
    fn render(&mut self, input: &[f32], output: &mut [f32]) {
        match &mut self.resampler {
            Some(rs) => {
                let n = rs.to_model(input, &mut self.model_in).min(self.model_out.len());
                self.kernel
                    .process(&self.model_in[..n], &mut self.model_out[..n]);
                let m = rs
                    .from_model(&self.model_out[..n], &mut self.host_back)
                    .min(output.len());
                output[..m].copy_from_slice(&self.host_back[..m]);
                output[m..].fill(0.0);
            }
            None => self.kernel.process(input, output),
        }
    }
}

struct Inner {
    current: Option<Loaded>,
    retiring: Option<Loaded>,
    model_file: PathBuf,
    ramp_in_pos: f32,
    ramp_out_pos: f32,
    ramp_step: f32,
    ramping_in: bool,
    ramping_out: bool,
    in_buf: Vec<f32>,
    mix_buf: Vec<f32>,
    in_gain: Option<Arc<AtomicF32>>,
    out_gain: Option<Arc<AtomicF32>>,
}

impl Inner {
    fn process(&mut self, input: &[f32], output: &mut [f32], ready: bool, retired: &Condvar) {
        output.fill(0.0);
        let n = input.len().min(output.len());
        let output = &mut output[..n];

        let Inner {
            current,
            retiring,
            ramp_in_pos,
            ramp_out_pos,
            ramp_step,
            ramping_in,
            ramping_out,
            in_buf,
            mix_buf,
            in_gain,
            out_gain,
            ..
        } = self;

        let gain_in = in_gain.as_ref().map_or(1.0, |g| g.load(Ordering::Relaxed));
        let src: &[f32] = if gain_in != 1.0 {
            for (b, x) in in_buf[..n].iter_mut().zip(input.iter()) {
                *b = x * gain_in;
            }
            &in_buf[..n]
        } else {
            input
        };

        if ready {
            if let Some(cur) = current {
                cur.render(src, output);
                if *ramping_in {
                    for y in output.iter_mut() {
                        *y *= *ramp_in_pos;
                        *ramp_in_pos = (*ramp_in_pos + *ramp_step).min(1.0);
                    }
                    if *ramp_in_pos >= 1.0 {
                        *ramping_in = false;
                    }
                }
            }
        }

        if *ramping_out {
            match retiring {
                Some(old) => {
                    let mix = &mut mix_buf[..n];
                    old.render(src, mix);
                    for (y, m) in output.iter_mut().zip(mix.iter()) {
                        *y += m * (1.0 - *ramp_out_pos);
                        *ramp_out_pos = (*ramp_out_pos + *ramp_step).min(1.0);
                    }
                }
                None => *ramp_out_pos = 1.0,
            }
            if *ramp_out_pos >= 1.0 {
                *ramping_out = false;
                retired.notify_all();
            }
        }

        let gain_out = out_gain.as_ref().map_or(1.0, |g| g.load(Ordering::Relaxed));
        if gain_out != 1.0 {
            for y in output.iter_mut() {
                *y *= gain_out;
            }
        }
    }

    /// Demote the current model into the retiring slot, keeping the fade
    /// continuous when the demotion lands mid-ramp-in.
    fn demote_current(&mut self) {
        if let Some(prev) = self.current.take() {
            if self.retiring.replace(prev).is_some() {
                log::debug!("superseding a retiring model before its fade completed");
            }
            self.ramp_out_pos = if self.ramping_in {
                1.0 - self.ramp_in_pos
            } else {
                0.0
            };
            self.ramping_in = false;
            self.ramping_out = true;
        }
    }
}

/// One long-lived model slot; each engine family owns exactly one.
pub(crate) struct ModelSlot {
    inner: Mutex<Inner>,
    retired: Condvar,
    ready: AtomicBool,
    host_rate: AtomicU32,
    phase_offset: AtomicI32,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: None,
                retiring: None,
                model_file: PathBuf::new(),
                ramp_in_pos: 0.0,
                ramp_out_pos: 0.0,
                ramp_step: 1.0 / ramp_len(48_000) as f32,
                ramping_in: false,
                ramping_out: false,
                in_buf: vec![0.0; MAX_BLOCK_SIZE],
                mix_buf: vec![0.0; MAX_BLOCK_SIZE],
                in_gain: None,
                out_gain: None,
            }),
            retired: Condvar::new(),
            ready: AtomicBool::new(false),
            host_rate: AtomicU32::new(0),
            phase_offset: AtomicI32::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_file(&self, path: &Path) {
        self.lock().model_file = path.to_path_buf();
    }

    pub fn file(&self) -> PathBuf {
        self.lock().model_file.clone()
    }

    pub fn host_rate(&self) -> u32 {
        self.host_rate.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn phase_offset(&self) -> i32 {
        self.phase_offset.load(Ordering::Relaxed)
    }

    pub fn init(&self, sample_rate: u32) {
        self.host_rate.store(sample_rate, Ordering::Relaxed);
        let mut inner = self.lock();
        inner.ramp_step = 1.0 / ramp_len(sample_rate) as f32;
        if let Some(cur) = &mut inner.current {
            cur.configure(sample_rate);
            self.phase_offset.store(cur.latency(), Ordering::Relaxed);
        }
        if let Some(old) = &mut inner.retiring {
            old.configure(sample_rate);
        }
    }

    /// Install a freshly constructed model: demote any current model to the
    /// ramp-out slot, arm the ramp-in, publish readiness. Loader-thread.
    pub fn publish(&self, loaded: Loaded) {
        let mut inner = self.lock();
        inner.demote_current();
        self.phase_offset.store(loaded.latency(), Ordering::Relaxed);
        inner.current = Some(loaded);
        inner.ramp_in_pos = 0.0;
        inner.ramping_in = true;
        self.ready.store(true, Ordering::Release);
    }

    /// Begin fading out the current model. Frees nothing.
    pub fn retire(&self) {
        let mut inner = self.lock();
        self.ready.store(false, Ordering::Release);
        inner.demote_current();
    }

    /// Wait until the retiring model's fade completed, then drop it.
    /// Bounded: if the audio actor is not draining the ramp, the wait
    /// expires after the ramp duration plus a margin and the model is
    /// finalized under the lock.
    pub fn wait_retired(&self) {
        let rate = self.host_rate().max(1);
        let bound = Duration::from_secs_f32(ramp_len(rate) as f32 / rate as f32 + 0.02);

        let mut inner = self.lock();
        while inner.retiring.is_some() && inner.ramping_out {
            let (guard, result) = self
                .retired
                .wait_timeout(inner, bound)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            if result.timed_out() {
                if inner.ramping_out {
                    log::warn!("ramp-out not drained in time; disposing under lock");
                    inner.ramping_out = false;
                }
                break;
            }
        }
        inner.retiring = None;
    }

    /// Reset kernel and resampler state without touching load state.
    /// Skips silently when the lock is contended.
    pub fn clear_state(&self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(cur) = &mut inner.current {
                cur.reset();
            }
            if let Some(old) = &mut inner.retiring {
                old.reset();
            }
        }
    }

    pub fn connect(&self, port: u32, source: Arc<AtomicF32>) {
        let mut inner = self.lock();
        match port {
            PORT_INPUT_GAIN => inner.in_gain = Some(source),
            PORT_OUTPUT_GAIN => inner.out_gain = Some(source),
            other => log::warn!("ignoring connect to unknown port {}", other),
        }
    }

    /// Per-block hot path. RT-safe: one `try_lock` attempt, no allocation.
    pub fn compute(&self, input: &[f32], output: &mut [f32]) {
        if input.len() > MAX_BLOCK_SIZE {
            debug_assert!(false, "block of {} exceeds MAX_BLOCK_SIZE", input.len());
            output.fill(0.0);
            return;
        }
        let mut inner = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                output.fill(0.0);
                return;
            }
        };
        let ready = self.ready.load(Ordering::Acquire);
        inner.process(input, output, ready, &self.retired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Test kernel: scales input by a constant, reports a fixed rate.
    struct GainKernel {
        gain: f32,
        rate: u32,
    }

    impl Kernel for GainKernel {
        fn process(&mut self, input: &[f32], output: &mut [f32]) {
            for (x, y) in input.iter().zip(output.iter_mut()) {
                *y = x * self.gain;
            }
        }
        fn reset(&mut self) {}
        fn sample_rate(&self) -> u32 {
            self.rate
        }
    }

    fn slot_at_48k() -> ModelSlot {
        let slot = ModelSlot::new();
        slot.init(48_000);
        slot
    }

    fn loaded_gain(gain: f32, rate: u32, host: u32) -> Loaded {
        Loaded::new(Box::new(GainKernel { gain, rate }), host)
    }

    #[test]
    fn test_silence_before_publish() {
        let slot = slot_at_48k();
        let input = vec![1.0f32; 64];
        let mut output = vec![9.9f32; 64];
        slot.compute(&input, &mut output);
        assert!(output.iter().all(|&y| y == 0.0));
        assert!(!slot.is_ready());
    }

    #[test]
    fn test_ramp_in_reaches_unity_without_jumps() {
        let slot = slot_at_48k();
        slot.publish(loaded_gain(1.0, 48_000, 48_000));
        assert!(slot.is_ready());

        let input = vec![1.0f32; 64];
        let mut output = vec![0.0f32; 64];
        let step = 1.0 / 512.0;
        let mut last = 0.0f32;
        for _ in 0..16 {
            slot.compute(&input, &mut output);
            for &y in &output {
                assert!(
                    (y - last).abs() <= step + 1e-6,
                    "discontinuity {} -> {}",
                    last,
                    y
                );
                last = y;
            }
        }
        // 16 * 64 = 1024 samples, ramp is 512: fully faded in by now.
        assert!((last - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_swap_crossfade_keeps_constant_sum() {
        let slot = slot_at_48k();
        slot.publish(loaded_gain(1.0, 48_000, 48_000));

        // Drain the first ramp-in.
        let input = vec![1.0f32; 512];
        let mut output = vec![0.0f32; 512];
        slot.compute(&input, &mut output);

        // Swap in a second unity model: old fades down while new fades up.
        slot.publish(loaded_gain(1.0, 48_000, 48_000));
        slot.compute(&input, &mut output);
        for (i, &y) in output.iter().enumerate() {
            assert!((y - 1.0).abs() < 1e-4, "sample {} broke the sum: {}", i, y);
        }
    }

    #[test]
    fn test_retire_fades_out_then_disposes() {
        let slot = slot_at_48k();
        slot.publish(loaded_gain(1.0, 48_000, 48_000));
        let input = vec![1.0f32; 512];
        let mut output = vec![0.0f32; 512];
        slot.compute(&input, &mut output);

        slot.retire();
        assert!(!slot.is_ready());

        // One full ramp worth of samples drains the fade to zero.
        slot.compute(&input, &mut output);
        assert!(output[0] > 0.9, "fade should start near unity");
        assert!(output[511].abs() < 0.01, "fade should end near zero");

        let start = Instant::now();
        slot.wait_retired();
        assert!(start.elapsed() < Duration::from_millis(50));

        slot.compute(&input, &mut output);
        assert!(output.iter().all(|&y| y == 0.0));
    }

    #[test]
    fn test_wait_retired_is_bounded_without_audio() {
        let slot = slot_at_48k();
        slot.publish(loaded_gain(1.0, 48_000, 48_000));
        slot.retire();

        // No compute() calls drain the ramp; the wait must still return.
        let start = Instant::now();
        slot.wait_retired();
        assert!(start.elapsed() < Duration::from_secs(1));

        let input = vec![1.0f32; 64];
        let mut output = vec![0.0f32; 64];
        slot.compute(&input, &mut output);
        assert!(output.iter().all(|&y| y == 0.0));
    }

    #[test]
    fn test_unload_mid_ramp_in_stays_continuous() {
        let slot = slot_at_48k();
        slot.publish(loaded_gain(1.0, 48_000, 48_000));

        // Advance the ramp-in only part way (128 of 512 samples).
        let input = vec![1.0f32; 128];
        let mut output = vec![0.0f32; 128];
        slot.compute(&input, &mut output);
        let reached = output[127];

        // Retiring now must resume the fade from where the ramp-in left it.
        slot.retire();
        let mut out2 = vec![0.0f32; 128];
        slot.compute(&input, &mut out2);
        assert!(
            (out2[0] - reached).abs() < 0.02,
            "fade jumped from {} to {}",
            reached,
            out2[0]
        );
    }

    #[test]
    fn test_phase_offset_follows_resample_ratio() {
        let slot = slot_at_48k();
        slot.publish(loaded_gain(1.0, 48_000, 48_000));
        assert_eq!(slot.phase_offset(), 0);

        slot.publish(loaded_gain(1.0, 44_100, 48_000));
        assert!(slot.phase_offset() > 0);
    }

    #[test]
    fn test_gain_ports_scale_input_and_output() {
        let slot = slot_at_48k();
        let in_gain = Arc::new(AtomicF32::new(0.5));
        let out_gain = Arc::new(AtomicF32::new(2.0));
        slot.connect(PORT_INPUT_GAIN, Arc::clone(&in_gain));
        slot.connect(PORT_OUTPUT_GAIN, Arc::clone(&out_gain));

        slot.publish(loaded_gain(1.0, 48_000, 48_000));
        let input = vec![1.0f32; 1024];
        let mut output = vec![0.0f32; 1024];
        slot.compute(&input, &mut output);
        // 0.5 in-gain * 2.0 out-gain cancel once the ramp is done.
        assert!((output[1023] - 1.0).abs() < 1e-4);

        out_gain.store(4.0, Ordering::Relaxed);
        slot.compute(&input, &mut output);
        assert!((output[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_resampled_model_produces_output() {
        let slot = slot_at_48k();
        slot.publish(loaded_gain(1.0, 24_000, 48_000));

        let input = vec![0.5f32; 1024];
        let mut output = vec![0.0f32; 1024];
        for _ in 0..4 {
            slot.compute(&input, &mut output);
        }
        let energy: f32 = output.iter().map(|&y| y * y).sum();
        assert!(energy > 0.0);
        assert!(output.iter().all(|y| y.is_finite()));
    }
}
