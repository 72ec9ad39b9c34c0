// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=CAMHUB_VERSION");

    // Packagers may pin the version string explicitly
    let version = match std::env::var("CAMHUB_VERSION") {
        Ok(v) => v,
        Err(_) => describe_version(),
    };

    println!("cargo::rustc-env=CAMHUB_GIT_VERSION={}", version);
}

/// "v0.1.0" at a tag becomes "0.1.0-<hash>", "v0.1.0-5-gabcdef1" becomes "0.1.0-dirty-abcdef1"
fn describe_version() -> String {
    let described = git(&["describe", "--tags", "--always", "--match", "v*"])
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    let described = described.strip_prefix('v').unwrap_or(&described);

    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    if parts.len() == 3 {
        let hash = parts[0].strip_prefix('g').unwrap_or(parts[0]);
        return format!("{}-dirty-{}", parts[2], hash);
    }

    match git(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) if hash != described => format!("{}-{}", described, hash),
        _ => described.to_string(),
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
