// src/main.rs

use nodevisor::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if let Err(err) = logging::init_logging(args.log_level, args.log_file.as_deref()) {
        eprintln!("nodevisor error: {err:?}");
        std::process::exit(1);
    }

    if let Err(err) = run(args).await {
        if err.is_startup_fatal() {
            eprintln!("nodevisor: startup aborted: {err}");
        } else {
            eprintln!("nodevisor error: {err}");
        }
        std::process::exit(1);
    }
}
