mod calc;
mod grades;
mod ipc;
mod report;
mod settings;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    // stdout carries the protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().filter_or(settings::ENV_LOG, "info"))
        .init();

    let mut state = ipc::AppState::new(settings::Settings::from_env());
    log::info!("gradebookd {} ready", env!("CARGO_PKG_VERSION"));

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::warn!("stdin closed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                log::warn!("bad request line: {}", e);
                let _ = writeln!(
                    stdout,
                    "{}",
                    json!({ "ok": false, "error": { "code": "bad_json", "message": e.to_string() } })
                );
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
