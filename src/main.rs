// # RepliDB driver
//
// Reads a command script, feeds it to the transaction engine, and prints
// the event stream to stdout. Diagnostics go to stderr so the event output
// stays byte-comparable. Exits 0 on clean end of input, nonzero when the
// input file cannot be opened.

use std::fs::File;
use std::io::{self, BufReader};
use std::process::ExitCode;

use tracing::{error, info};

use replidb::{run_script, VERSION};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let Some(path) = std::env::args().nth(1) else {
        error!("usage: replidb <input-file>");
        return ExitCode::from(2);
    };

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(err) => {
            error!(%path, %err, "cannot open input file");
            return ExitCode::FAILURE;
        }
    };

    info!(version = VERSION, %path, "replidb starting");

    let stdout = io::stdout();
    match run_script(BufReader::new(file), stdout.lock()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "run failed");
            ExitCode::FAILURE
        }
    }
}
