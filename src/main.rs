use std::process::ExitCode;

use rubbish::builder;
use rubbish::cli;

fn main() -> ExitCode {
    env_logger::init();

    let matches = match cli::parse() {
        Ok(matches) => matches,
        Err(err) => {
            // clap prints --help/--version output through Ok-equivalent errors;
            // let those through with success, everything else is a usage error.
            if err.exit_code() == 0 {
                err.print().ok();
                return ExitCode::SUCCESS;
            }
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let specs = match cli::device_specs(&matches) {
        Ok(specs) => specs,
        Err(err) => {
            eprintln!("rubbish: {err}");
            return ExitCode::FAILURE;
        }
    };

    let backplane = match builder::build(specs) {
        Ok(backplane) => backplane,
        Err(err) => {
            eprintln!("rubbish: {err}");
            return ExitCode::FAILURE;
        }
    };

    backplane.run();
    ExitCode::SUCCESS
}
