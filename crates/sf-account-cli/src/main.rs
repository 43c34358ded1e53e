use std::process::ExitCode;

fn main() -> ExitCode {
    sf_account_cli::run(std::env::args())
}
