//! Helpers shared by the integration test binaries
//!
//! Each test binary compiles this module on its own and uses only part of it.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// Variables the client reads; scrubbed so the host environment cannot leak in
const CLIENT_ENV: &[&str] = &[
    "BILI2TEXT_CONFIG",
    "BILI2TEXT_BASE_URL",
    "BILI2TEXT_HEARTBEAT_INTERVAL_MS",
    "BILI2TEXT_MAX_RECONNECT_ATTEMPTS",
    "BILI2TEXT_RECONNECT_BASE_DELAY_MS",
    "BILI2TEXT_REQUEST_TIMEOUT_MS",
    "BILI2TEXT_MAX_RETRIES",
    "BILI2TEXT_RETRY_BASE_DELAY_MS",
    "BILI2TEXT_LOG_LEVEL",
    "BILI2TEXT_LOG_FILE",
    "BILI2TEXT_LOG_JSON",
];

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

pub fn valid_config_fixture() -> PathBuf {
    fixture("valid_config.toml")
}

/// Same as the valid fixture but with a `ws://` base URL
pub fn invalid_config_fixture() -> PathBuf {
    fixture("invalid_config.toml")
}

/// The client binary with a clean environment
pub fn client_cmd() -> Command {
    let mut cmd = Command::cargo_bin("bili2text-client").unwrap();
    for var in CLIENT_ENV {
        cmd.env_remove(var);
    }
    cmd
}

/// A `client.toml` inside a private temp directory, removed on drop
pub struct TempConfig {
    _dir: TempDir,
    path: PathBuf,
}

impl TempConfig {
    pub fn new(contents: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, contents).unwrap();
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &str {
        self.path.to_str().unwrap()
    }

    pub fn read(&self) -> String {
        fs::read_to_string(&self.path).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_present() {
        assert!(valid_config_fixture().is_file());
        assert!(invalid_config_fixture().is_file());
    }

    #[test]
    fn test_temp_config_round_trip() {
        let config = TempConfig::new("[server]\n");
        assert_eq!(config.read(), "[server]\n");
    }
}
