use std::process::ExitCode;

fn main() -> ExitCode {
    banko_cli::run()
}
