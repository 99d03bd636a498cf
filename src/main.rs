use clap::Parser;
use jobwatch::commands::Cli;
use jobwatch::supervisor;
use jobwatch::utils::logger::init_logger;
use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    if let Err(err) = init_logger(None) {
        eprintln!("warning: logging disabled: {err}");
    }

    let command = match cli.command_line() {
        Ok(command) => command,
        Err(err) => return report_failure(&err),
    };

    match supervisor::run_command(&command, &mut io::stderr()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => report_failure(&err),
    }
}

fn report_failure(err: &jobwatch::TrackerError) -> ExitCode {
    tracing::debug!("run failed during {:?}", err.phase());
    for line in err.user_lines() {
        eprintln!("{line}");
    }
    ExitCode::from(1)
}
