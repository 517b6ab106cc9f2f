use anyhow::{bail, Result};

use crate::kernel::Kernel;

use super::LstmSpec;

/// One LSTM layer, weights fused into a single `[4H, I+H]` matrix acting
/// on the concatenated `[input; hidden]` vector.
struct Layer {
    w: Vec<f32>,    // [4H, I+H] row-major
    bias: Vec<f32>, // [4H], bias_ih + bias_hh pre-summed
    input_size: usize,
    hidden: usize,
    h: Vec<f32>,
    c: Vec<f32>,
    xh: Vec<f32>,    // scratch [I+H]
    gates: Vec<f32>, // scratch [4H]
}

impl Layer {
    fn with_dims(input_size: usize, hidden: usize) -> Self {
        Self {
            w: vec![0.0; 4 * hidden * (input_size + hidden)],
            bias: vec![0.0; 4 * hidden],
            input_size,
            hidden,
            h: vec![0.0; hidden],
            c: vec![0.0; hidden],
            xh: vec![0.0; input_size + hidden],
            gates: vec![0.0; 4 * hidden],
        }
    }

    /// Consume one layer's parameters from the flat weight stream,
    /// in PyTorch `nn.LSTM` order: `weight_ih`, `weight_hh`, `bias_ih`,
    /// `bias_hh`. Returns the advanced offset.
    fn unpack(&mut self, weights: &[f32], mut offset: usize) -> usize {
        let (i, h) = (self.input_size, self.hidden);
        let row = i + h;
        for g in 0..4 * h {
            self.w[g * row..g * row + i].copy_from_slice(&weights[offset..offset + i]);
            offset += i;
        }
        for g in 0..4 * h {
            self.w[g * row + i..(g + 1) * row].copy_from_slice(&weights[offset..offset + h]);
            offset += h;
        }
        for g in 0..4 * h {
            self.bias[g] = weights[offset + g] + weights[offset + 4 * h + g];
        }
        offset + 8 * h
    }

    fn param_count(input_size: usize, hidden: usize) -> usize {
        4 * hidden * (input_size + hidden) + 8 * hidden
    }

    fn step(&mut self, input: &[f32]) {
        let h_size = self.hidden;
        let row = self.input_size + h_size;

        self.xh[..self.input_size].copy_from_slice(input);
        self.xh[self.input_size..].copy_from_slice(&self.h);

        for g in 0..4 * h_size {
            let w_row = &self.w[g * row..(g + 1) * row];
            let mut acc = self.bias[g];
            for (wv, xv) in w_row.iter().zip(self.xh.iter()) {
                acc += wv * xv;
            }
            self.gates[g] = acc;
        }

        // Gate order: input, forget, candidate, output.
        for j in 0..h_size {
            let i_g = sigmoid(self.gates[j]);
            let f_g = sigmoid(self.gates[h_size + j]);
            let c_g = self.gates[2 * h_size + j].tanh();
            let o_g = sigmoid(self.gates[3 * h_size + j]);
            self.c[j] = f_g * self.c[j] + i_g * c_g;
            self.h[j] = o_g * self.c[j].tanh();
        }
    }

    fn reset(&mut self) {
        self.h.fill(0.0);
        self.c.fill(0.0);
    }
}

/// `.nam` LSTM architecture: stacked layers plus a scalar linear head.
pub(crate) struct LstmKernel {
    layers: Vec<Layer>,
    head_w: Vec<f32>, // [H]
    head_b: f32,
    sample_rate: u32,
}

impl LstmKernel {
    pub fn from_weights(spec: &LstmSpec, weights: &[f32], sample_rate: u32) -> Result<Self> {
        let h = spec.hidden_size;

        let mut expected = 0usize;
        for k in 0..spec.num_layers {
            let inp = if k == 0 { spec.input_size } else { h };
            expected += Layer::param_count(inp, h);
        }
        expected += h + 1; // head

        if weights.len() < expected {
            bail!(
                "LSTM weight stream too short: expected at least {}, got {}",
                expected,
                weights.len()
            );
        }

        let mut layers = Vec::with_capacity(spec.num_layers);
        let mut offset = 0;
        for k in 0..spec.num_layers {
            let inp = if k == 0 { spec.input_size } else { h };
            let mut layer = Layer::with_dims(inp, h);
            offset = layer.unpack(weights, offset);
            layers.push(layer);
        }

        let head_w = weights[offset..offset + h].to_vec();
        let head_b = weights[offset + h];

        Ok(Self {
            layers,
            head_w,
            head_b,
            sample_rate,
        })
    }

    fn process_sample(&mut self, x: f32) -> f32 {
        let first = [x];
        let mut idx = 0;
        while idx < self.layers.len() {
            if idx == 0 {
                self.layers[0].step(&first);
            } else {
                let (prev, rest) = self.layers.split_at_mut(idx);
                rest[0].step(&prev[idx - 1].h);
            }
            idx += 1;
        }

        let last = &self.layers[self.layers.len() - 1].h;
        let mut y = self.head_b;
        for (w, hv) in self.head_w.iter().zip(last.iter()) {
            y += w * hv;
        }
        y
    }
}

impl Kernel for LstmKernel {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.process_sample(*x);
        }
    }

    fn reset(&mut self) {
        for layer in &mut self.layers {
            layer.reset();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
