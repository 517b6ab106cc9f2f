//! Difference-family model loading: `.nam` profiles.
//!
//! A `.nam` file is a JSON document carrying an architecture tag, an
//! architecture-specific config object, a flat weight array, and optional
//! metadata (sample rate, measured loudness). Only the LSTM architecture
//! is executed in-process; other declared architectures fail the load.

mod lstm;

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::kernel::Kernel;

/// LSTM dimensions pulled out of the config object.
pub(crate) struct LstmSpec {
    pub num_layers: usize,
    pub input_size: usize,
    pub hidden_size: usize,
}

/// Everything `load_nam_file` extracts besides the kernel itself.
pub struct NamProfile {
    pub kernel: Box<dyn Kernel>,
    /// Measured loudness of the capture in dBFS, when the file declares it.
    pub loudness_db: Option<f32>,
}

impl std::fmt::Debug for NamProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamProfile")
            .field("loudness_db", &self.loudness_db)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct RawProfile {
    version: Option<String>,
    architecture: String,
    config: Value,
    weights: Vec<f64>,
    sample_rate: Option<f64>,
    metadata: Option<RawMetadata>,
}

#[derive(Deserialize)]
struct RawMetadata {
    sample_rate: Option<f64>,
    loudness: Option<f64>,
}

/// Load a `.nam` profile from disk. Not RT-safe (file I/O, allocation).
pub fn load_nam_file(path: &Path) -> Result<NamProfile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read model file: {}", path.display()))?;
    parse_profile(&raw)
}

fn parse_profile(json: &str) -> Result<NamProfile> {
    let raw: RawProfile = serde_json::from_str(json).context("malformed .nam JSON")?;

    if let Some(ref ver) = raw.version {
        if !ver.starts_with("0.5") && !ver.starts_with("0.6") && !ver.starts_with("0.7") {
            log::warn!("unexpected .nam version '{}', loading anyway", ver);
        }
    }

    if raw.weights.is_empty() {
        bail!("model file contains no weights");
    }

    // Sample rate priority: top level, then metadata, then the 48 kHz
    // the trainer defaults to.
    let sample_rate = raw
        .sample_rate
        .or_else(|| raw.metadata.as_ref().and_then(|m| m.sample_rate))
        .unwrap_or(48_000.0) as u32;

    let loudness_db = raw
        .metadata
        .as_ref()
        .and_then(|m| m.loudness)
        .map(|v| v as f32);

    let weights: Vec<f32> = raw.weights.iter().map(|&w| w as f32).collect();

    let kernel: Box<dyn Kernel> = match raw.architecture.as_str() {
        "LSTM" => {
            let spec = lstm_spec(&raw.config)?;
            Box::new(lstm::LstmKernel::from_weights(&spec, &weights, sample_rate)?)
        }
        arch => bail!("unsupported .nam architecture '{}'", arch),
    };

    Ok(NamProfile {
        kernel,
        loudness_db,
    })
}

fn lstm_spec(config: &Value) -> Result<LstmSpec> {
    let num_layers = config
        .get("num_layers")
        .and_then(Value::as_u64)
        .context("LSTM config missing 'num_layers'")? as usize;
    let input_size = config
        .get("input_size")
        .and_then(Value::as_u64)
        .unwrap_or(1) as usize;
    let hidden_size = config
        .get("hidden_size")
        .and_then(Value::as_u64)
        .context("LSTM config missing 'hidden_size'")? as usize;

    if num_layers == 0 || hidden_size == 0 {
        bail!("LSTM config has zero num_layers or hidden_size");
    }

    Ok(LstmSpec {
        num_layers,
        input_size,
        hidden_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lstm_json(extra: &str) -> String {
        // 1 layer, hidden 2: 4*2*(1+2)=24 gate weights + 16 biases + 2 head + 1 bias
        let n = 4 * 2 * (1 + 2) + 8 * 2 + 2 + 1;
        let weights: Vec<String> = (0..n).map(|_| "0.01".to_string()).collect();
        format!(
            r#"{{
                "version": "0.5.4",
                "architecture": "LSTM",
                "config": {{"num_layers": 1, "input_size": 1, "hidden_size": 2}},
                "weights": [{}]{}
            }}"#,
            weights.join(","),
            extra
        )
    }

    #[test]
    fn test_parse_lstm_profile() {
        let profile = parse_profile(&lstm_json(r#", "sample_rate": 48000.0"#)).unwrap();
        assert_eq!(profile.kernel.sample_rate(), 48_000);
        assert!(profile.loudness_db.is_none());
    }

    #[test]
    fn test_metadata_sample_rate_and_loudness() {
        let profile = parse_profile(&lstm_json(
            r#", "metadata": {"sample_rate": 44100.0, "loudness": -13.5}"#,
        ))
        .unwrap();
        assert_eq!(profile.kernel.sample_rate(), 44_100);
        assert_eq!(profile.loudness_db, Some(-13.5));
    }

    #[test]
    fn test_default_sample_rate() {
        let profile = parse_profile(&lstm_json("")).unwrap();
        assert_eq!(profile.kernel.sample_rate(), 48_000);
    }

    #[test]
    fn test_unsupported_architecture_fails() {
        let json = r#"{
            "architecture": "WaveNet",
            "config": {"channels": 8, "dilations": [1, 2]},
            "weights": [1.0, 2.0]
        }"#;
        let err = parse_profile(json).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn test_empty_weights_fail() {
        let json = r#"{
            "architecture": "LSTM",
            "config": {"num_layers": 1, "hidden_size": 2},
            "weights": []
        }"#;
        assert!(parse_profile(json).is_err());
    }

    #[test]
    fn test_garbage_is_a_parse_failure() {
        assert!(parse_profile("not json at all").is_err());
    }
}
