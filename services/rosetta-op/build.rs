use std::process::Command;

/// Commit the binary is built from, if the source is a git checkout
fn git_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=12", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8(output.stdout).ok()?;
    let commit = commit.trim();
    (!commit.is_empty()).then(|| commit.to_string())
}

fn main() {
    // Reported by /network/options as middleware build metadata
    let built_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    println!("cargo:rustc-env=BUILD_TIME={built_at}");

    // Left unset outside a checkout; the API reports "unknown"
    if let Some(commit) = git_commit() {
        println!("cargo:rustc-env=GIT_COMMIT={commit}");
    }
}
