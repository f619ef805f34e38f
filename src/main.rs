use std::process::ExitCode;

use mseed_filter::cli::{self, Command};
use mseed_filter::{logging, pipeline};
use tracing::error;

fn main() -> ExitCode {
    let config = match cli::parse_args(std::env::args_os()) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Exit { code, message }) => {
            print!("{message}");
            return ExitCode::from(code);
        }
        Err(e) => {
            logging::init(0);
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.verbosity);
    match pipeline::run(*config) {
        Ok(totals) if totals.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
