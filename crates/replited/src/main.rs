use std::process::ExitCode;

fn main() -> ExitCode {
    match replited::run_server() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("replited: {error}");
            ExitCode::FAILURE
        }
    }
}
