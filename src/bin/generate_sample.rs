use std::f64::consts::PI;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use ctplot::data::loader::write_parquet;
use ctplot::data::Table;

/// Write a synthetic weather station and neutron monitor store.
#[derive(Parser, Debug)]
#[command(name = "generate_sample")]
struct Args {
    /// Store directory; tables land below `raw/`.
    #[arg(long, default_value = "data/sample")]
    out: PathBuf,

    /// Days of hourly records.
    #[arg(long, default_value_t = 60)]
    days: u32,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        mean + std_dev * z
    }
}

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

/// Hourly temperature, humidity, pressure and wind with daily and
/// seasonal cycles.
fn weather(hours: usize, rng: &mut SimpleRng) -> Result<Table> {
    let mut rows = Vec::with_capacity(hours);
    let mut pressure = 1013.0;
    for h in 0..hours {
        let time = h as f64 * 3600.0;
        let day = (h % 24) as f64 / 24.0;
        let season = (h as f64 / (24.0 * 365.0)) * 2.0 * PI;
        let t_a = 8.0 - 10.0 * season.cos() + 5.0 * (2.0 * PI * (day - 0.375)).sin() + rng.gauss(0.0, 1.0);
        let h_a = (75.0 - 2.0 * (t_a - 8.0) + rng.gauss(0.0, 4.0)).clamp(5.0, 100.0);
        pressure += rng.gauss(0.0, 0.6) - 0.01 * (pressure - 1013.0);
        let wind = rng.gauss(0.0, 3.0).abs() + 0.5;
        rows.push(vec![time, t_a, h_a, pressure, wind]);
    }
    Table::from_rows(
        "Zeuthen weather station",
        "/raw/weather",
        names(&["time", "T_a", "H_a", "p", "wind"]),
        names(&["s", "°C", "%", "hPa", "m/s"]),
        &rows,
    )
    .map_err(anyhow::Error::msg)
}

/// Minute-wise neutron counts anti-correlated with pressure.
fn neutron(minutes: usize, rng: &mut SimpleRng) -> Result<Table> {
    let mut rows = Vec::with_capacity(minutes);
    let mut pressure = 1013.0;
    for m in 0..minutes {
        pressure += rng.gauss(0.0, 0.02) - 0.0005 * (pressure - 1013.0);
        let expected = 6000.0 * (-0.0072 * (pressure - 1013.0)).exp();
        let counts = rng.gauss(expected, expected.sqrt()).round().max(0.0);
        rows.push(vec![m as f64 * 60.0, counts, pressure]);
    }
    Table::from_rows(
        "Neutron monitor",
        "/raw/neutron",
        names(&["time", "counts", "p"]),
        names(&["s", "1", "hPa"]),
        &rows,
    )
    .map_err(anyhow::Error::msg)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);
    let hours = args.days as usize * 24;

    let raw = args.out.join("raw");
    std::fs::create_dir_all(&raw).with_context(|| format!("creating {}", raw.display()))?;

    let tables = [
        ("weather", weather(hours, &mut rng)?),
        ("neutron", neutron(hours * 60, &mut rng)?),
    ];
    for (name, table) in &tables {
        let path = raw.join(format!("{name}.parquet"));
        write_parquet(&path, table).with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {} rows to {}", table.len(), path.display());
    }
    Ok(())
}
