use std::process::ExitCode;

fn main() -> ExitCode {
    kilat::cli_main(std::env::args().skip(1).collect())
}
