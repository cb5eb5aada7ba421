// src/main.rs

use thoth::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("thoth: {err:#}");
        std::process::exit(thoth::EXIT_CONFIG_ERROR);
    }
    let code = run(args).await;
    std::process::exit(code);
}
