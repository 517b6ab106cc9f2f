//! Offline renderer: run a wav file through a model and write the result.
//!
//! Also serves as the reference call order for the loader side:
//! `init` → `set_model_file` → `load_model` → `compute` loop →
//! `unload_model` → `clean_up`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use modeler_engine::EngineSelector;

const BLOCK: usize = 512;

fn parse_arg(args: &[String], key: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == key)
        .map(|w| w[1].clone())
}

fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open input wav: {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        bail!("input wav has no channels");
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    // Downmix to mono.
    let mono: Vec<f32> = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create output wav: {}", path.display()))?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0).round() as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let (input, output, model) = match (
        parse_arg(&args, "--input"),
        parse_arg(&args, "--output"),
        parse_arg(&args, "--model"),
    ) {
        (Some(i), Some(o), Some(m)) => (PathBuf::from(i), PathBuf::from(o), PathBuf::from(m)),
        _ => {
            eprintln!(
                "Usage: render --input <in.wav> --output <out.wav> --model <model.nam|.json|.aidax> [--normalize]"
            );
            std::process::exit(2);
        }
    };
    let apply_normalize = args.iter().any(|a| a == "--normalize");

    let (samples, sample_rate) = read_wav_mono(&input)?;

    let selector = EngineSelector::new();
    selector.init(sample_rate);
    selector.set_model_file(&model);
    selector
        .load_model()
        .with_context(|| format!("failed to load model: {}", model.display()))?;

    let mut rendered = Vec::with_capacity(samples.len());
    let mut block_in = [0.0f32; BLOCK];
    let mut block_out = [0.0f32; BLOCK];
    for chunk in samples.chunks(BLOCK) {
        block_in[..chunk.len()].copy_from_slice(chunk);
        block_in[chunk.len()..].fill(0.0);
        selector.compute(&block_in, &mut block_out);
        if apply_normalize {
            selector.normalize(&mut block_out[..chunk.len()]);
        }
        rendered.extend_from_slice(&block_out[..chunk.len()]);
    }

    // Drain the fade-out so clean_up never has to fall back to its
    // bounded wait, and the rendered file ends with the ramp tail.
    selector.unload_model();
    block_in.fill(0.0);
    let ramp = modeler_engine::constants::ramp_len(sample_rate) as usize;
    for _ in 0..(ramp + BLOCK - 1) / BLOCK {
        selector.compute(&block_in, &mut block_out);
        rendered.extend_from_slice(&block_out);
    }
    selector.clean_up();

    write_wav(&output, &rendered, sample_rate)?;
    println!(
        "done: {} ({} samples @{} Hz, phase offset {} samples)",
        output.display(),
        rendered.len(),
        sample_rate,
        selector.phase_offset()
    );
    Ok(())
}
