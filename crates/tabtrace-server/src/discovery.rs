//! Discovery file
//!
//! The browser extension has no other way to learn which port the server
//! bound to, since `TABTRACE_PORT` is only a default. Written once the HTTP
//! listener is live, removed on clean shutdown.

use std::path::PathBuf;

use serde::Serialize;

#[derive(Serialize)]
struct DiscoveryFile {
    port: u16,
}

fn discovery_path() -> PathBuf {
    let home = std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    home.join(".tabtrace").join("port.json")
}

/// Write `~/.tabtrace/port.json`, creating the directory if needed.
pub fn write(port: u16) -> std::io::Result<()> {
    let path = discovery_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string(&DiscoveryFile { port })?;
    std::fs::write(path, body)
}

/// Remove the discovery file. Best-effort: a missing file is not an error.
pub fn remove() {
    let path = discovery_path();
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %e, "failed to remove discovery file");
        }
    }
}
