use std::process::Command;

fn main() {
    let version = version_from_git().unwrap_or_else(|| {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string())
    });
    println!("cargo:rustc-env=PASTEKEEP_VERSION={}", version);

    if std::path::Path::new(".git").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/refs");
    }
    println!("cargo:rerun-if-env-changed=PASTEKEEP_BUILD_COMMIT");
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn version_from_git() -> Option<String> {
    let pkg = std::env::var("CARGO_PKG_VERSION").ok()?;

    // Tagged release builds report the tag itself.
    if let Some(describe) = git(&["describe", "--tags", "--always", "--dirty"]) {
        if describe.starts_with('v') && !describe.contains("-g") {
            return Some(describe);
        }
        return Some(format!("{pkg}-dev+{describe}"));
    }

    // Container builds have no .git but may pass the commit in.
    std::env::var("PASTEKEEP_BUILD_COMMIT")
        .ok()
        .filter(|commit| !commit.is_empty())
        .map(|commit| format!("{pkg}-dev+{commit}"))
}
