//! Build script that stamps the binary with build metadata.
//!
//! Emits `BUILD_TIMESTAMP`, `BUILD_DATETIME`, and `BUILD_GIT_HASH` so the
//! controller can log exactly which build is running. Uses command-line git
//! instead of git2 to avoid OpenSSL dependency issues.

use std::process::Command;

fn main() {
    let now = chrono::Utc::now();
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", now.timestamp());
    println!("cargo:rustc-env=BUILD_DATETIME={}", now.to_rfc3339());

    // Fall back to "unknown" outside a git checkout (e.g. docker builds from a tarball)
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=BUILD_GIT_HASH={git_hash}");

    println!("cargo:rerun-if-changed=build.rs");
}
