use std::io::stdout;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use hopstat::cli::Args;
use hopstat::config::Config;
use hopstat::export::{export_csv, export_json, generate_report};
use hopstat::lookup::SystemResolver;
use hopstat::trace::Tracer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    SimpleLogger::new()
        .with_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .init()
        .context("failed to install logger")?;

    let config = Config::from(&args);
    let tracer = Tracer::new(config).context("failed to start trace")?;
    tracer.run().await?;

    if args.report {
        let resolver = SystemResolver::new().context("failed to build system resolver")?;
        generate_report(&tracer, &resolver, stdout())?;
    } else if args.csv {
        export_csv(&tracer, stdout())?;
    } else {
        export_json(&tracer, stdout())?;
    }

    Ok(())
}
