mod audit;
mod backup;
mod cgpa;
mod config;
mod csv;
mod db;
mod import;
mod ipc;
mod rank;
mod skills;

use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn main() {
    let config = config::Config::parse();

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let workspace = config.workspace.clone();
    let mut state = ipc::AppState::new(config);
    if let Some(path) = workspace {
        if let Err(e) = ipc::select_workspace(&mut state, &path) {
            tracing::warn!(path = %path.display(), error = %e, "could not open workspace at startup");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                tracing::debug!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
