use std::process::ExitCode;

fn main() -> ExitCode {
    rustvox::cli::run()
}
