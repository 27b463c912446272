mod app;

use std::process::ExitCode;

use log::{error, info};

fn main() -> ExitCode {
    env_logger::init();

    info!("starting kvbench");

    match app::run() {
        Ok(code) => code,
        Err(e) => {
            error!("run aborted: {:?}", e);
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
