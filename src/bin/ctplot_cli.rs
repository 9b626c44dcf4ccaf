use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ctplot::data::available_tables;
use ctplot::layer::Mode;
use ctplot::options::RECOGNIZED;
use ctplot::{make_plot, Config, ParameterBag, Progress};

#[derive(Parser, Debug)]
#[command(name = "ctplot-cli", about = "Compose plots of sensor tables from key=value parameters")]
struct Cli {
    /// JSON config file; `CTPLOT_*` variables override it.
    #[arg(long, default_value = "ctplot.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compose a figure and write it as JSON.
    Plot {
        /// Parameters such as `m0=h1 s0=data/sample:/raw/weather x0=T_a`.
        params: Vec<String>,

        /// Session file to start from; `params` override its keys.
        #[arg(long)]
        session: Option<PathBuf>,

        /// Output file name without extension; defaults to the parameter hash.
        #[arg(long)]
        out: Option<String>,

        /// Hide the progress bar.
        #[arg(long)]
        quiet: bool,
    },
    /// List the tables below the data directory.
    List,
    /// Show the options each mode interprets.
    Options {
        #[arg(long)]
        mode: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config).with_env();

    match cli.command {
        Command::Plot {
            params,
            session,
            out,
            quiet,
        } => plot(&config, params, session, out, quiet),
        Command::List => list(&config),
        Command::Options { mode } => options(mode.as_deref()),
    }
}

fn plot(
    config: &Config,
    params: Vec<String>,
    session: Option<PathBuf>,
    out: Option<String>,
    quiet: bool,
) -> Result<()> {
    let mut bag = match &session {
        Some(path) => ParameterBag::load(path).with_context(|| format!("loading session {}", path.display()))?,
        None => ParameterBag::new(),
    };
    for (k, v) in ParameterBag::from_pairs(&params)?.iter() {
        bag.insert(k, v);
    }
    let bag = bag.sanitized();

    let progress = Progress::new();
    let bar = (!quiet).then(|| spawn_progress_bar(Arc::clone(&progress)));
    let result = make_plot(&bag, config, Arc::clone(&progress));
    progress.finish();
    if let Some(bar) = bar {
        let _ = bar.join();
    }
    let figure = result?;

    let name = match out {
        Some(name) => name,
        None => bag.hash()?,
    };
    let path = config.plot_path().join(format!("{name}.json"));
    figure.save_json(&path)?;
    println!("{}", path.display());
    Ok(())
}

fn spawn_progress_bar(progress: Arc<Progress>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stderr = std::io::stderr();
        loop {
            let p = progress.get();
            let filled = (p * 40.0).round() as usize;
            let _ = write!(stderr, "\r[{:<40}] {:>3.0}%", "#".repeat(filled), p * 100.0);
            let _ = stderr.flush();
            if progress.is_done() {
                let _ = writeln!(stderr);
                break;
            }
            thread::sleep(Duration::from_millis(200));
        }
    })
}

fn list(config: &Config) -> Result<()> {
    let tables = available_tables(&config.data_path())?;
    if tables.is_empty() {
        println!("No tables below {}", config.data_path().display());
    }
    for (key, specs) in &tables {
        println!("{key}  ({} rows) {}", specs.rows, specs.title);
        for (c, u) in specs.colnames.iter().zip(&specs.units) {
            println!("    {c} [{u}]");
        }
    }
    Ok(())
}

fn options(mode: Option<&str>) -> Result<()> {
    let mode: Option<Mode> = mode.map(str::parse).transpose()?;
    for (m, key, default, effect) in RECOGNIZED {
        if mode.is_some_and(|want| want != *m) {
            continue;
        }
        println!("{:<4} {key:<14} {default:<30} {effect}", m.as_str());
    }
    Ok(())
}
