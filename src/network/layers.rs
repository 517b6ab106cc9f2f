use anyhow::{bail, Result};

/// One layer of a network-family model, stepped once per sample.
pub(crate) enum Layer {
    Lstm(LstmLayer),
    Dense(DenseLayer),
}

impl Layer {
    pub fn step(&mut self, input: &[f32], output: &mut [f32]) {
        match self {
            Layer::Lstm(l) => l.step(input, output),
            Layer::Dense(l) => l.step(input, output),
        }
    }

    pub fn out_size(&self) -> usize {
        match self {
            Layer::Lstm(l) => l.hidden,
            Layer::Dense(l) => l.out_size,
        }
    }

    pub fn reset(&mut self) {
        if let Layer::Lstm(l) = self {
            l.reset();
        }
    }
}

/// Recurrent layer with keras-layout weights: kernel `[in, 4H]`,
/// recurrent kernel `[H, 4H]`, bias `[4H]`, gate order i, f, c, o.
pub(crate) struct LstmLayer {
    w_x: Vec<f32>, // [in, 4H], row-major by input index
    w_h: Vec<f32>, // [H, 4H]
    bias: Vec<f32>,
    pub hidden: usize,
    h: Vec<f32>,
    c: Vec<f32>,
    gates: Vec<f32>,
}

impl LstmLayer {
    pub fn new(
        in_size: usize,
        hidden: usize,
        w_x: Vec<f32>,
        w_h: Vec<f32>,
        bias: Vec<f32>,
    ) -> Result<Self> {
        if w_x.len() != in_size * 4 * hidden
            || w_h.len() != hidden * 4 * hidden
            || bias.len() != 4 * hidden
        {
            bail!(
                "lstm weight shapes do not match in={} hidden={}",
                in_size,
                hidden
            );
        }
        Ok(Self {
            w_x,
            w_h,
            bias,
            hidden,
            h: vec![0.0; hidden],
            c: vec![0.0; hidden],
            gates: vec![0.0; 4 * hidden],
        })
    }

    fn step(&mut self, input: &[f32], output: &mut [f32]) {
        let h4 = 4 * self.hidden;
        self.gates.copy_from_slice(&self.bias);
        for (i, &x) in input.iter().enumerate() {
            let row = &self.w_x[i * h4..(i + 1) * h4];
            for (g, &w) in row.iter().enumerate() {
                self.gates[g] += w * x;
            }
        }
        for (j, &hv) in self.h.iter().enumerate() {
            let row = &self.w_h[j * h4..(j + 1) * h4];
            for (g, &w) in row.iter().enumerate() {
                self.gates[g] += w * hv;
            }
        }

        let n = self.hidden;
        for j in 0..n {
            let i_g = sigmoid(self.gates[j]);
            let f_g = sigmoid(self.gates[n + j]);
            let c_g = self.gates[2 * n + j].tanh();
            let o_g = sigmoid(self.gates[3 * n + j]);
            self.c[j] = f_g * self.c[j] + i_g * c_g;
            self.h[j] = o_g * self.c[j].tanh();
        }
        output[..n].copy_from_slice(&self.h);
    }

    fn reset(&mut self) {
        self.h.fill(0.0);
        self.c.fill(0.0);
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Activation {
    Linear,
    Tanh,
    Relu,
}

impl Activation {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "" | "linear" => Ok(Activation::Linear),
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            other => bail!("unsupported activation '{}'", other),
        }
    }

    fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.max(0.0),
        }
    }
}

/// Fully connected layer, keras layout: kernel `[in, out]`, bias `[out]`.
pub(crate) struct DenseLayer {
    w: Vec<f32>,
    bias: Vec<f32>,
    pub out_size: usize,
    activation: Activation,
}

impl DenseLayer {
    pub fn new(
        in_size: usize,
        out_size: usize,
        w: Vec<f32>,
        bias: Vec<f32>,
        activation: Activation,
    ) -> Result<Self> {
        if w.len() != in_size * out_size || bias.len() != out_size {
            bail!(
                "dense weight shapes do not match in={} out={}",
                in_size,
                out_size
            );
        }
        Ok(Self {
            w,
            bias,
            out_size,
            activation,
        })
    }

    fn step(&mut self, input: &[f32], output: &mut [f32]) {
        for o in 0..self.out_size {
            let mut acc = self.bias[o];
            for (i, &x) in input.iter().enumerate() {
                acc += self.w[i * self.out_size + o] * x;
            }
            output[o] = self.activation.apply(acc);
        }
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_identity() {
        // 2-in 2-out identity matrix, zero bias
        let layer = DenseLayer::new(
            2,
            2,
            vec![1.0, 0.0, 0.0, 1.0],
            vec![0.0, 0.0],
            Activation::Linear,
        );
        let mut layer = layer.unwrap();
        let mut out = [0.0f32; 2];
        layer.step(&[0.3, -0.7], &mut out);
        assert_eq!(out, [0.3, -0.7]);
    }

    #[test]
    fn test_dense_relu_clamps() {
        let mut layer =
            DenseLayer::new(1, 1, vec![1.0], vec![0.0], Activation::Relu).unwrap();
        let mut out = [0.0f32; 1];
        layer.step(&[-1.0], &mut out);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_dense_shape_mismatch() {
        assert!(DenseLayer::new(2, 2, vec![1.0], vec![0.0, 0.0], Activation::Linear).is_err());
    }

    #[test]
    fn test_lstm_shape_mismatch() {
        assert!(LstmLayer::new(1, 4, vec![0.0; 3], vec![0.0; 64], vec![0.0; 16]).is_err());
    }

    #[test]
    fn test_lstm_state_evolves_and_resets() {
        let h = 2;
        let mut layer = LstmLayer::new(
            1,
            h,
            vec![0.1; 4 * h],
            vec![0.1; h * 4 * h],
            vec![0.0; 4 * h],
        )
        .unwrap();
        let mut out1 = [0.0f32; 2];
        let mut out2 = [0.0f32; 2];
        layer.step(&[1.0], &mut out1);
        layer.step(&[1.0], &mut out2);
        assert_ne!(out1, out2);

        layer.reset();
        let mut out3 = [0.0f32; 2];
        layer.step(&[1.0], &mut out3);
        assert_eq!(out1, out3);
    }
}
