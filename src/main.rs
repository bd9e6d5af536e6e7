use std::process::ExitCode;

fn main() -> ExitCode {
    netbox_compliance::run()
}
