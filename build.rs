//! Build script for the Bili2Text client
//!
//! Embeds build-time information into the binary so `bili2text-client version`
//! can report exactly what is running.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = command_stdout("git", &["rev-parse", "--short=8", "HEAD"]);
    let git_branch = command_stdout("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dirty = git_dirty();

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let host = env::var("HOST").unwrap_or_else(|_| "unknown".to_string());
    let rustc_version = command_stdout("rustc", &["--version"]);

    println!("cargo:rustc-env=BILI2TEXT_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=BILI2TEXT_GIT_BRANCH={}", git_branch);
    println!("cargo:rustc-env=BILI2TEXT_GIT_DIRTY={}", git_dirty);
    println!("cargo:rustc-env=BILI2TEXT_BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=BILI2TEXT_TARGET={}", target);
    println!("cargo:rustc-env=BILI2TEXT_PROFILE={}", profile);
    println!("cargo:rustc-env=BILI2TEXT_RUSTC_VERSION={}", rustc_version);
    println!("cargo:rustc-env=BILI2TEXT_HOST={}", host);
}

/// Run a command and return its trimmed stdout, or "unknown" on any failure
fn command_stdout(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// "true" when the working tree has uncommitted changes
fn git_dirty() -> &'static str {
    match Command::new("git").args(["status", "--porcelain"]).output() {
        Ok(output) if output.status.success() => {
            if output.stdout.is_empty() {
                "false"
            } else {
                "true"
            }
        }
        _ => "unknown",
    }
}
