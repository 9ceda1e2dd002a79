use std::process::ExitCode;

fn main() -> ExitCode {
    taskforge_cli::run()
}
