// CLI entry point: reads one `ExecutionRequest` as JSON (from a file argument, or stdin if
// none is given), runs it, and prints the resulting `ExecutionResult` as JSON.
//
// Grounded on pantsbuild-pants' `sandboxer_server_main.rs`: a plain `#[tokio::main]`, manual
// `env::args()` handling rather than a CLI-argument crate, and `env_logger::init()` reading
// `RUST_LOG`.

use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

use sandbox_exec::{Config, ExecutionCoordinator, ExecutionRequest, NsjailInvoker};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let request_json = match read_request_input() {
        Ok(input) => input,
        Err(err) => {
            eprintln!("sandbox-run: {err}");
            return ExitCode::FAILURE;
        }
    };

    let request: ExecutionRequest = match serde_json::from_str(&request_json) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("sandbox-run: invalid request JSON: {err}");
            return ExitCode::FAILURE;
        }
    };

    let config = Config::from_env();
    if let Err(err) = config.check() {
        eprintln!("sandbox-run: configuration error: {err}");
        return ExitCode::FAILURE;
    }

    let jail = Arc::new(NsjailInvoker::new(config.jail_bin.clone()));
    let coordinator = ExecutionCoordinator::new(config, jail);
    let result = coordinator.run(request).await;

    match serde_json::to_string_pretty(&result) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("sandbox-run: failed to serialize result: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Reads the request JSON from the path given as the first CLI argument, or from stdin if no
/// argument was given.
fn read_request_input() -> std::io::Result<String> {
    match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}
