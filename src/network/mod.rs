//! Network-family model loading: RTNeural-style `.json` / `.aidax` files.
//!
//! These are keras-export documents: an `in_shape`, a `layers` array
//! (type + activation + nested weight arrays), and a `samplerate` field.
//! The sample rate is mandatory here: unlike `.nam` files there is no
//! trainer default to fall back on, and running a model at the wrong rate
//! silently detunes it, so a missing or malformed value fails the load.

mod layers;

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::kernel::Kernel;
use layers::{Activation, DenseLayer, Layer, LstmLayer};

/// A loaded layer-stack model, stepped one sample at a time.
pub struct NetworkModel {
    layers: Vec<Layer>,
    buf_a: Vec<f32>,
    buf_b: Vec<f32>,
    sample_rate: u32,
}

impl std::fmt::Debug for NetworkModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkModel")
            .field("num_layers", &self.layers.len())
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl Kernel for NetworkModel {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());
        for (x, y) in input.iter().zip(output.iter_mut()) {
            self.buf_a[0] = *x;
            let mut width = 1;
            for layer in &mut self.layers {
                let next = layer.out_size();
                layer.step(&self.buf_a[..width], &mut self.buf_b[..next]);
                width = next;
                std::mem::swap(&mut self.buf_a, &mut self.buf_b);
            }
            *y = self.buf_a[0];
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

#[derive(Deserialize)]
struct RawNetwork {
    in_shape: Option<Vec<Option<u64>>>,
    layers: Vec<RawLayer>,
    samplerate: Option<Value>,
}

#[derive(Deserialize)]
struct RawLayer {
    #[serde(rename = "type")]
    kind: String,
    activation: Option<String>,
    weights: Value,
}

/// Load a `.json` / `.aidax` model from disk. Not RT-safe.
pub fn load_network_file(path: &Path) -> Result<Box<dyn Kernel>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read model file: {}", path.display()))?;
    let model = parse_network(&raw)?;
    Ok(Box::new(model))
}

fn parse_network(json: &str) -> Result<NetworkModel> {
    let raw: RawNetwork = serde_json::from_str(json).context("malformed network model JSON")?;

    let sample_rate = parse_sample_rate(raw.samplerate.as_ref())?;

    let in_size = raw
        .in_shape
        .as_ref()
        .and_then(|s| s.last().cloned().flatten())
        .unwrap_or(1) as usize;
    if in_size != 1 {
        bail!("only mono models are supported (in_shape ends in {})", in_size);
    }

    if raw.layers.is_empty() {
        bail!("model declares no layers");
    }

    let mut layers = Vec::with_capacity(raw.layers.len());
    let mut width = in_size;
    for (idx, layer) in raw.layers.iter().enumerate() {
        let built = build_layer(layer, width)
            .with_context(|| format!("layer {} ({})", idx, layer.kind))?;
        width = built.out_size();
        layers.push(built);
    }
    if width != 1 {
        bail!("final layer must produce one channel, got {}", width);
    }

    let max_width = layers.iter().map(Layer::out_size).max().unwrap_or(1).max(1);
    Ok(NetworkModel {
        layers,
        buf_a: vec![0.0; max_width],
        buf_b: vec![0.0; max_width],
        sample_rate,
    })
}

/// The `samplerate` field doubles as the model's rate declaration; some
/// exporters write it as a string.
fn parse_sample_rate(value: Option<&Value>) -> Result<u32> {
    let value = value.context("model is missing the 'samplerate' field")?;
    let rate = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match rate {
        Some(r) if r > 0.0 => Ok(r as u32),
        _ => bail!("model 'samplerate' is not a positive number: {}", value),
    }
}

fn build_layer(raw: &RawLayer, in_size: usize) -> Result<Layer> {
    match raw.kind.as_str() {
        "lstm" => {
            let parts = raw
                .weights
                .as_array()
                .context("lstm weights must be [kernel, recurrent, bias]")?;
            if parts.len() != 3 {
                bail!("lstm weights must have 3 parts, got {}", parts.len());
            }
            let w_x = flatten_matrix(&parts[0])?;
            let w_h = flatten_matrix(&parts[1])?;
            let bias = flatten_vector(&parts[2])?;
            if bias.len() % 4 != 0 {
                bail!("lstm bias length {} is not a multiple of 4", bias.len());
            }
            let hidden = bias.len() / 4;
            Ok(Layer::Lstm(LstmLayer::new(in_size, hidden, w_x, w_h, bias)?))
        }
        "dense" => {
            let parts = raw
                .weights
                .as_array()
                .context("dense weights must be [kernel, bias]")?;
            if parts.len() != 2 {
                bail!("dense weights must have 2 parts, got {}", parts.len());
            }
            let w = flatten_matrix(&parts[0])?;
            let bias = flatten_vector(&parts[1])?;
            let activation = Activation::parse(raw.activation.as_deref().unwrap_or(""))?;
            Ok(Layer::Dense(DenseLayer::new(
                in_size,
                bias.len(),
                w,
                bias,
                activation,
            )?))
        }
        other => bail!("unsupported layer type '{}'", other),
    }
}

fn flatten_matrix(value: &Value) -> Result<Vec<f32>> {
    let rows = value.as_array().context("expected a weight matrix")?;
    let mut flat = Vec::new();
    for row in rows {
        let row = row.as_array().context("expected a matrix row")?;
        for v in row {
            flat.push(v.as_f64().context("non-numeric weight")? as f32);
        }
    }
    Ok(flat)
}

fn flatten_vector(value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .context("expected a weight vector")?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32).context("non-numeric weight"))
        .collect()
}
