//! Streams a synthetic test tone through a freshly initialized model chunk
//! by chunk and reports level statistics.

use std::f32::consts::TAU;
use std::path::PathBuf;

use burn::config::Config;
use burn::prelude::*;
use clap::Parser;
use log::info;
use tracing_subscriber::EnvFilter;

use ampssm::complex::read_back;
use ampssm::device::{Backend, init_device};
use ampssm::{AmpModelConfig, ChunkTag, SsmError, StackConfig};

#[derive(Parser, Debug)]
#[command(name = "render")]
#[command(about = "Render a test tone through a conditioned SSM stack", long_about = None)]
struct Args {
    /// Model configuration as JSON; overrides the size flags below
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model width
    #[arg(long, default_value_t = 16)]
    d_model: usize,

    /// Number of residual layers
    #[arg(long, default_value_t = 4)]
    layers: usize,

    /// Latent state size per layer
    #[arg(long, default_value_t = 32)]
    d_state: usize,

    /// Samples to render
    #[arg(short, long, default_value_t = 48_000)]
    length: usize,

    /// Samples per processed chunk
    #[arg(long, default_value_t = 4096)]
    chunk: usize,

    /// Playback sample rate in Hz
    #[arg(long, default_value_t = 48_000.0)]
    sample_rate: f64,

    /// Sample rate the model was trained at in Hz
    #[arg(long, default_value_t = 48_000.0)]
    trained_rate: f64,

    /// Test tone frequency in Hz
    #[arg(long, default_value_t = 110.0)]
    frequency: f32,

    /// Control values, one per conditioning input (e.g. gain, tone)
    #[arg(long, value_delimiter = ',', default_value = "0.5,0.5")]
    control: Vec<f32>,

    /// Seed of the structured initialization
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = init_device();

    let config = match &args.config {
        Some(path) => AmpModelConfig::load(path)?,
        None => AmpModelConfig::new(
            StackConfig::new(args.d_model)
                .with_n_layers(args.layers)
                .with_d_state(args.d_state)
                .with_seed(args.seed),
        )
        .with_c_dim(args.control.len()),
    };
    if args.control.len() != config.c_dim {
        return Err(SsmError::ShapeMismatch {
            what: "control values",
            expected: config.c_dim,
            actual: args.control.len(),
        }
        .into());
    }

    let mut model = config.init::<Backend>(&device)?;
    // Δ scales inversely with the sample rate.
    model.change_scale(args.trained_rate / args.sample_rate)?;

    let channels = model.input_size();
    let tone: Vec<f32> = (0..args.length)
        .flat_map(|n| {
            let t = n as f32 / args.sample_rate as f32;
            let sample = 0.5 * (TAU * args.frequency * t).sin();
            std::iter::repeat_n(sample, channels)
        })
        .collect();
    let audio = Tensor::<Backend, 3>::from_data(
        TensorData::new(tone.clone(), [1, args.length, channels]),
        &device,
    );
    let control = Tensor::<Backend, 2>::from_data(
        TensorData::new(args.control.clone(), [1, config.c_dim]),
        &device,
    );

    let chunk = args.chunk.max(1);
    let mut state = model.init_state();
    let mut rendered = Vec::with_capacity(args.length * model.output_size());
    let mut offset = 0;
    while offset < args.length {
        let end = (offset + chunk).min(args.length);
        let [batch, _, width] = audio.dims();
        let window = audio.clone().slice([0..batch, offset..end, 0..width]);
        let (y, next) =
            model.forward_tagged(window, control.clone(), state, ChunkTag::new(0, offset))?;
        rendered.extend(read_back(&y)?);
        state = next;
        offset = end;
    }

    info!(
        "rendered {} samples in {} chunks",
        args.length,
        args.length.div_ceil(chunk)
    );
    println!("input  rms {:.6} peak {:.6}", rms(&tone), peak(&tone));
    println!("output rms {:.6} peak {:.6}", rms(&rendered), peak(&rendered));
    Ok(())
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0, |acc, s| acc.max(s.abs()))
}
