use std::{error::Error, time::Duration};

use clap::Parser;
use jiff::civil::Date;
use log::info;
use simem::{
    db::{
        prod_db::ProdDb,
        simem::{
            lib_simem::{SimemClient, BASE_URL},
            public_data_archive::{Outcome, SimemArchive},
        },
    },
    interval::date_range::Frequency,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// First day to download, e.g. 2024-01-01
    #[arg(long, default_value = "2024-01-01")]
    start: Date,

    /// Last day to download, inclusive
    #[arg(long, default_value = "2024-12-31")]
    end: Date,

    /// Comma separated list of SIMEM dataset ids
    #[arg(long, value_delimiter = ',', default_value = "E17D25,972263,0bfc9d,d31647")]
    dataset_ids: Vec<String>,

    /// One of daily, weekly, monthly
    #[arg(long, default_value = "daily")]
    frequency: Frequency,

    /// Seconds to wait after each request
    #[arg(long, default_value_t = 1.0)]
    delay: f64,

    /// Archive folder, one subfolder for each dataset id
    #[arg(long)]
    base_dir: Option<String>,
}

/// Download the raw SIMEM files for a range of days.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let archive = match args.base_dir {
        Some(base_dir) => SimemArchive { base_dir },
        None => ProdDb::simem_public_data(),
    };
    let client = SimemClient::new(BASE_URL, Duration::from_secs(30))?;
    let delay = Duration::try_from_secs_f64(args.delay)?;

    let out = archive.extract_range(
        &client,
        args.start,
        args.end,
        &args.dataset_ids,
        args.frequency,
        delay,
    );

    let saved = out
        .iter()
        .filter(|e| matches!(e.outcome, Outcome::Saved { .. }))
        .count();
    let empty = out
        .iter()
        .filter(|e| matches!(e.outcome, Outcome::Empty))
        .count();
    info!(
        "{} requests: {} files saved, {} empty, {} failed",
        out.len(),
        saved,
        empty,
        out.len() - saved - empty
    );

    Ok(())
}
