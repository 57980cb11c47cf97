use magdata::config::SessionConfig;
use magdata::daemon::Daemon;
use magdata::tracing::{self, prelude::*};

#[tokio::main]
async fn main() {
    tracing::init_journald_or_stdout();

    let config = match SessionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = Daemon::new(config).run().await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
