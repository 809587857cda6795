use std::process::ExitCode;

fn main() -> ExitCode {
    rspamd_move::cli::xmain()
}
