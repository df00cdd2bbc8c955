use std::process::ExitCode;

fn main() -> ExitCode {
    legal_events_lib::run()
}
