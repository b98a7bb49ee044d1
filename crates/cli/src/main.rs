use std::process::ExitCode;

fn main() -> ExitCode {
    stayql_cli::run()
}
