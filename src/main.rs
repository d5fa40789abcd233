//! db-harvest - SQL Server extraction and cataloguing toolkit.

use db_harvest::cli::Cli;
use db_harvest::{app, logging};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let log_path = cli.log_path();
    match &log_path {
        Some(path) => {
            if let Err(e) = logging::init_file_logging(path) {
                eprintln!("{}: {}", e.category(), e);
                std::process::exit(1);
            }
        }
        None => logging::init_stderr_logging(),
    }

    if let Err(e) = app::run(cli).await {
        error!("{}: {}", e.category(), e);
        if log_path.is_some() {
            eprintln!("{}: {}", e.category(), e);
        }
        std::process::exit(1);
    }
}
