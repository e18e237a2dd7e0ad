use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Builder, ListBuilder, StringBuilder, UInt32Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Write a synthetic GWOSC-like strain segment and a manifest naming it.
#[derive(Parser, Debug)]
#[command(name = "generate_sample")]
struct Args {
    /// Segment duration in seconds.
    #[arg(long, default_value_t = 256)]
    seconds: usize,

    /// Sampling rate in Hz.
    #[arg(long, default_value_t = 4096)]
    rate: usize,

    /// Directory receiving `<name>.txt` and `Data/<name>.parquet`.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Base name of the manifest and data file.
    #[arg(long, default_value = "sample")]
    name: String,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

const SHORTNAMES: [&str; 7] = [
    "DATA",
    "CBC_CAT1",
    "CBC_CAT2",
    "CBC_CAT3",
    "BURST_CAT1",
    "BURST_CAT2",
    "BURST_CAT3",
];

/// Typical strain amplitude of detector noise.
const NOISE_LEVEL: f64 = 1e-21;

/// Box-Muller transform for normal distribution
fn gauss(rng: &mut ChaCha8Rng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-15);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

/// What happens during one second of the segment.
#[derive(Clone, Copy, PartialEq)]
enum Second {
    Clean,
    /// Loud sine-Gaussian burst, flagged in the CBC categories.
    Glitch,
    /// No data recorded.
    Gap,
}

impl Second {
    fn dq_mask(self, rng: &mut ChaCha8Rng) -> u32 {
        match self {
            Second::Gap => 0,
            Second::Clean => 0b000_0001,
            // CAT1 always, CAT2/CAT3 sometimes; burst bits are noise
            Second::Glitch => {
                let mut mask = 0b000_0011;
                if rng.gen_bool(0.5) {
                    mask |= 0b0100;
                }
                if rng.gen_bool(0.3) {
                    mask |= 0b1000;
                }
                mask | (rng.gen_range(0..8) << 4)
            }
        }
    }
}

fn generate_second(kind: Second, rate: usize, rng: &mut ChaCha8Rng) -> Vec<Option<f64>> {
    match kind {
        Second::Gap => vec![None; rate],
        Second::Clean => (0..rate)
            .map(|_| Some(gauss(rng, 0.0, NOISE_LEVEL)))
            .collect(),
        Second::Glitch => {
            let centre = rng.gen_range(0.2..0.8);
            let freq = rng.gen_range(40.0..400.0);
            let amplitude = NOISE_LEVEL * rng.gen_range(5.0..20.0);
            (0..rate)
                .map(|i| {
                    let t = i as f64 / rate as f64;
                    let envelope = (-((t - centre) / 0.05).powi(2)).exp();
                    let burst = amplitude * envelope * (2.0 * std::f64::consts::PI * freq * t).sin();
                    Some(gauss(rng, 0.0, NOISE_LEVEL) + burst)
                })
                .collect()
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);

    let kinds: Vec<Second> = (0..args.seconds)
        .map(|_| match rng.gen_range(0..100) {
            0..=4 => Second::Gap,
            5..=24 => Second::Glitch,
            _ => Second::Clean,
        })
        .collect();

    // One row holding the whole segment
    let mut strain_builder = ListBuilder::new(Float64Builder::new());
    let mut mask_builder = ListBuilder::new(UInt32Builder::new());
    for &kind in &kinds {
        for sample in generate_second(kind, args.rate, &mut rng) {
            strain_builder.values().append_option(sample);
        }
        mask_builder.values().append_value(kind.dq_mask(&mut rng));
    }
    strain_builder.append(true);
    mask_builder.append(true);

    let mut names_builder = ListBuilder::new(StringBuilder::new());
    for name in SHORTNAMES {
        names_builder.values().append_value(name);
    }
    names_builder.append(true);

    let item = |dt: DataType| Arc::new(Field::new("item", dt, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("strain", DataType::List(item(DataType::Float64)), false),
        Field::new("dq_mask", DataType::List(item(DataType::UInt32)), false),
        Field::new("dq_shortnames", DataType::List(item(DataType::Utf8)), true),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(strain_builder.finish()),
            Arc::new(mask_builder.finish()),
            Arc::new(names_builder.finish()),
        ],
    )
    .context("building record batch")?;

    let data_dir = args.out_dir.join("Data");
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let data_name = format!("{}.parquet", args.name);
    let data_path = data_dir.join(&data_name);
    let file = std::fs::File::create(&data_path)
        .with_context(|| format!("creating {}", data_path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;

    let manifest_path = args.out_dir.join(format!("{}.txt", args.name));
    std::fs::write(
        &manifest_path,
        format!("# Synthetic segment, seed {}\n{data_name}\n", args.seed),
    )
    .with_context(|| format!("writing {}", manifest_path.display()))?;

    let glitches = kinds.iter().filter(|k| **k == Second::Glitch).count();
    let gaps = kinds.iter().filter(|k| **k == Second::Gap).count();
    println!(
        "Wrote {} seconds at {} Hz ({glitches} flagged, {gaps} gaps) to {}",
        args.seconds,
        args.rate,
        data_path.display()
    );
    println!("Manifest: {}", manifest_path.display());
    Ok(())
}
