//! Runs the gateway against the simulated backend.
//!
//! Every session pairs by itself: a random code shows up right after
//! `/start`, and `AUTO_PAIR_SECS` later (default 5) the session connects
//! as a random phone number. Handy for poking at the HTTP API and the
//! push channel without a real device.
//!
//! Settings come from the process environment, then `../.env.local`, then
//! `../.env`. Earlier sources win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pairline::prelude::*;
use pairline::ConfigError;
use pairline_session::sim::SimBackend;

const DEFAULT_AUTO_PAIR: Duration = Duration::from_secs(5);

/// Env files read from `dir`, highest precedence first.
const ENV_FILES: [&str; 2] = [".env.local", ".env"];

/// Loads the env files under `dir` into the process environment.
///
/// Variables that are already set are left alone, so the process
/// environment beats `.env.local`, which beats `.env`. Missing files are
/// skipped. Returns the files that were loaded.
fn load_env_files(dir: &Path) -> Vec<PathBuf> {
    let mut loaded = Vec::new();
    for name in ENV_FILES {
        let path = dir.join(name);
        match dotenvy::from_path(&path) {
            Ok(()) => loaded.push(path),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping env file"),
        }
    }
    loaded
}

fn auto_pair_delay() -> Result<Duration, ConfigError> {
    match std::env::var("AUTO_PAIR_SECS") {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Duration::from_secs)
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key: "AUTO_PAIR_SECS",
                value: raw.clone(),
                reason: e.to_string(),
            }),
        _ => Ok(DEFAULT_AUTO_PAIR),
    }
}

async fn serve(config: ServerConfig, backend: SimBackend) -> Result<(), PairlineError> {
    // The simulated store keeps nothing on disk, but a real one would
    // expect the directory to exist.
    tokio::fs::create_dir_all(&config.session_path).await?;

    let server = PairlineServer::<SimBackend>::builder().config(config).build(backend).await?;
    tracing::info!(addr = %server.local_addr()?, "loopback gateway ready");
    server.run().await
}

#[tokio::main]
async fn main() {
    init_tracing();

    for path in load_env_files(Path::new("..")) {
        tracing::info!(path = %path.display(), "loaded env file");
    }

    let setup = ServerConfig::from_env().and_then(|config| Ok((config, auto_pair_delay()?)));
    let (config, delay) = match setup {
        Ok(setup) => setup,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = serve(config, SimBackend::with_auto_pair(delay)).await {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}
