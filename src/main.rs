use anyhow::{Context, Result};
use gcode::{read_parameters, transform, write_output, ParameterStore, WaveConfig};
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::Level;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "non_planar",
    about = "Displaces the layers of a sliced G-code file onto a wavy, non-planar surface"
)]
struct Opt {
    /// Sliced G-code to transform. Read from stdin if not given
    #[structopt(parse(from_os_str))]
    input: Option<PathBuf>,

    /// Output file for the resulting G code
    #[structopt(short, long, parse(from_os_str), default_value = "output.gcode")]
    output: PathBuf,

    /// Override a parameter, e.g. --set wave_amplitude=1.5. May be repeated
    #[structopt(long = "set", number_of_values = 1)]
    overrides: Vec<String>,

    /// More logging. May be repeated
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

/// The whole source as text. Bytes that aren't UTF-8 are an error.
fn read_gcode(mut reader: impl Read) -> io::Result<String> {
    let mut source = String::new();
    reader.read_to_string(&mut source)?;
    Ok(source)
}

fn read_source(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) => File::open(path)
            .and_then(read_gcode)
            .with_context(|| format!("can't read {}", path.display())),
        None => read_gcode(io::stdin().lock()).context("can't read G-code from stdin"),
    }
}

fn help_text(config: &WaveConfig) {
    println!("Displacing layers between z={} and z={}", config.wave_in(), config.wave_out());
    println!("{config}");
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    init_logging(opt.verbose);

    let source = read_source(opt.input.as_ref())?;
    let lines: Vec<&str> = source.lines().collect();

    let mut store = ParameterStore::new();
    let found = read_parameters(&lines, &mut store);
    tracing::info!(directives = found, "read parameters");
    for assignment in &opt.overrides {
        store
            .apply_override(assignment)
            .with_context(|| format!("bad --set {assignment}"))?;
    }
    for (key, value) in store.iter() {
        tracing::debug!(key, %value, "parameter");
    }
    let config = store.resolve().context("invalid wave parameters")?;
    help_text(&config);

    let result = transform(&lines, &config)
        .with_context(|| format!("transform failed with parameters:\n{config}"))?;
    write_output(&opt.output, &result.lines)
        .with_context(|| format!("can't write {}", opt.output.display()))?;

    println!("Output written to: {}", opt.output.display());
    Ok(())
}
