mod args;
mod election;

use clap::Parser;
use log::warn;
use snafu::ErrorCompat;

fn main() {
    let args = args::Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let config_path = match args.config {
        Some(c) => c,
        None => {
            eprintln!("A configuration file is required: pbtally --config election.json");
            std::process::exit(2);
        }
    };

    let res = election::run_election(
        config_path.as_str(),
        args.reference.as_deref(),
        args.out.as_deref(),
    );
    if let Err(e) = res {
        warn!("Error occured {:?}", e);
        eprintln!("An error occured {}", e);
        if let Some(bt) = ErrorCompat::backtrace(&e) {
            eprintln!("trace: {}", bt);
        }
        std::process::exit(1);
    }
}
