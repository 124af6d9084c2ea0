use std::process::ExitCode;

use colored::Colorize;
use log::error;

use renv::cli::Cli;
use renv::engine::lookup_remote_env;
use renv::logging;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    logging::init(cli.verbose);

    if cli.pid < 0 {
        eprintln!(
            "{} negative pids are not valid process ids: {}",
            "renv:".red().bold(),
            cli.pid
        );
        return ExitCode::FAILURE;
    }

    match lookup_remote_env(cli.pid, &cli.name) {
        Ok(Some(value)) => {
            println!("{}", value);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", "renv:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
