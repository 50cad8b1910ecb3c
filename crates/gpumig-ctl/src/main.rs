//! gpumig-ctl: drive the migration stream against a simulated device.

mod cmd;

use anyhow::{Context, Result};
use gpumig_core::MigrationConfig;

use cmd::Options;

fn print_usage() {
    println!("Usage: gpumig-ctl <command> [options]");
    println!();
    println!("Commands:");
    println!("  save <file>       Stream a simulated device's state into <file>");
    println!("  resume <file>     Apply a saved stream to a blank simulated device");
    println!("  inspect <file>    List the items in a saved stream");
    println!("  loopback          Save and resume in memory, compare digests");
    println!();
    println!("Options:");
    println!(
        "  --tiles <n>         Tiles on the simulated device (default: {})",
        cmd::DEFAULT_TILES
    );
    println!(
        "  --seed <s>          Seed for simulated device contents (default: {})",
        cmd::DEFAULT_SEED
    );
    println!("  --read-size <b>     Bytes per read call (default: {})", cmd::DEFAULT_IO_SIZE);
    println!("  --write-size <b>    Bytes per write call (default: {})", cmd::DEFAULT_IO_SIZE);
    println!("  --json              Machine-readable output");
    println!();
    println!("Config: {}", MigrationConfig::file_path().display());
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T> {
    args.get(i)
        .with_context(|| format!("{flag} requires a value"))?
        .parse()
        .map_err(|_| anyhow::anyhow!("{flag} must be a number"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut opts = Options::default();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--tiles" => {
                i += 1;
                opts.tiles = Some(parse_value(&args, i, "--tiles")?);
            }
            "--seed" => {
                i += 1;
                opts.seed = parse_value(&args, i, "--seed")?;
            }
            "--read-size" => {
                i += 1;
                opts.read_size = parse_value(&args, i, "--read-size")?;
            }
            "--write-size" => {
                i += 1;
                opts.write_size = parse_value(&args, i, "--write-size")?;
            }
            "--json" => opts.json = true,
            other => remaining.push(other),
        }
        i += 1;
    }
    if opts.read_size == 0 || opts.write_size == 0 {
        anyhow::bail!("--read-size and --write-size must be non-zero");
    }

    let config = MigrationConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MigrationConfig::default()
    });

    match remaining.as_slice() {
        ["save", path] => cmd::save::run(&config, path, &opts),
        ["resume", path] => cmd::resume::run(&config, path, &opts),
        ["inspect", path] => cmd::inspect::run(path, &opts),
        ["loopback"] => cmd::loopback::run(&config, &opts),
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
