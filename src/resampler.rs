//! Rational-ratio resampling between the host rate and a model's native rate.
//!
//! Each loaded model owns one [`FixedRateResampler`]: a matched pair of
//! polyphase Kaiser-sinc stages, one running host→model, one model→host.
//! The stages are designed at construction; both `process` directions are
//! allocation-free.

use std::f32::consts::PI;

const TAPS_PER_PHASE: usize = 16;
const KAISER_BETA: f32 = 5.0;

/// One direction of rational resampling (L/M polyphase FIR).
struct Stage {
    /// Branch coefficients, flat `[phase * TAPS_PER_PHASE + tap]`.
    coeffs: Vec<f32>,
    /// FIR delay line, circular.
    history: [f32; TAPS_PER_PHASE],
    hist_pos: usize,
    up: usize,
    down: usize,
    phase_acc: usize,
}

impl Stage {
    fn new(src_rate: u32, dst_rate: u32) -> Self {
        let g = gcd(src_rate, dst_rate);
        let up = (dst_rate / g) as usize;
        let down = (src_rate / g) as usize;

        let total = TAPS_PER_PHASE * up;
        let cutoff = PI / up.max(down) as f32;
        let center = (total - 1) as f32 / 2.0;

        // Windowed-sinc prototype, interleaved directly into branch order:
        // branch p reads prototype indices p, p+L, p+2L, ...
        let mut coeffs = vec![0.0f32; total];
        for p in 0..up {
            for t in 0..TAPS_PER_PHASE {
                let i = p + t * up;
                let x = i as f32 - center;
                let sinc = if x.abs() < 1e-6 {
                    1.0
                } else {
                    (cutoff * x).sin() / (PI * x) * up as f32
                };
                coeffs[p * TAPS_PER_PHASE + t] = sinc * kaiser(i, total, KAISER_BETA);
            }
        }

        Self {
            coeffs,
            history: [0.0; TAPS_PER_PHASE],
            hist_pos: 0,
            up,
            down,
            phase_acc: 0,
        }
    }

    /// Feed `input`, write converted samples to `output`. Returns the
    /// number of output samples produced; excess is dropped if `output`
    /// is too short (callers size buffers via [`max_output_len`]).
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let mut produced = 0;
        for &sample in input {
            self.history[self.hist_pos] = sample;
            self.hist_pos = (self.hist_pos + 1) % TAPS_PER_PHASE;

            while self.phase_acc < self.up {
                let branch = &self.coeffs
                    [self.phase_acc * TAPS_PER_PHASE..(self.phase_acc + 1) * TAPS_PER_PHASE];
                let mut acc = 0.0f32;
                for (t, &c) in branch.iter().enumerate() {
                    let idx = (self.hist_pos + TAPS_PER_PHASE - 1 - t) % TAPS_PER_PHASE;
                    acc += self.history[idx] * c;
                }
                if produced < output.len() {
                    output[produced] = acc;
                }
                produced += 1;
                self.phase_acc += self.down;
            }
            self.phase_acc -= self.up;
        }
        produced.min(output.len())
    }

    fn reset(&mut self) {
        self.history.fill(0.0);
        self.hist_pos = 0;
        self.phase_acc = 0;
    }
}

/// Host↔model resampler pair with round-trip latency reporting.
pub struct FixedRateResampler {
    to_model: Stage,
    from_model: Stage,
    host_rate: u32,
    model_rate: u32,
}

impl FixedRateResampler {
    pub fn new(host_rate: u32, model_rate: u32) -> Self {
        Self {
            to_model: Stage::new(host_rate, model_rate),
            from_model: Stage::new(model_rate, host_rate),
            host_rate,
            model_rate,
        }
    }

    /// Convert a host-rate block to the model rate. Returns samples written.
    pub fn to_model(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        self.to_model.process(input, output)
    }

    /// Convert a model-rate block back to the host rate. Returns samples written.
    pub fn from_model(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        self.from_model.process(input, output)
    }

    /// Upper bound on output samples for `input_len` samples through one stage.
    pub fn max_output_len(input_len: usize, src_rate: u32, dst_rate: u32) -> usize {
        let n = input_len as u64 * dst_rate as u64 + src_rate as u64 - 1;
        (n / src_rate as u64) as usize + 1
    }

    /// Round-trip group delay in host samples: half the FIR length through
    /// the host→model stage plus half through the model→host stage mapped
    /// back to host time. Reported to the caller for delay compensation.
    pub fn latency(&self) -> i32 {
        let half = TAPS_PER_PHASE as f32 / 2.0;
        let back = half * self.host_rate as f32 / self.model_rate as f32;
        (half + back).round() as i32
    }

    pub fn reset(&mut self) {
        self.to_model.reset();
        self.from_model.reset();
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

fn bessel_i0(x: f32) -> f32 {
    let mut sum = 1.0f32;
    let mut term = 1.0f32;
    let x2 = x * x * 0.25;
    for k in 1..20 {
        term *= x2 / (k * k) as f32;
        sum += term;
        if term < 1e-10 * sum {
            break;
        }
    }
    sum
}

fn kaiser(n: usize, length: usize, beta: f32) -> f32 {
    let center = (length - 1) as f32 / 2.0;
    let x = (n as f32 - center) / center;
    bessel_i0(beta * (1.0 - x * x).max(0.0).sqrt()) / bessel_i0(beta)
}
