use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    let commit = git_output(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=OFFERBOOK_GIT_COMMIT={commit}");

    if let Ok(git_dir) = git_output(&["rev-parse", "--git-dir"]).map(PathBuf::from) {
        let git_dir = if git_dir.is_absolute() {
            git_dir
        } else {
            match std::env::var("CARGO_MANIFEST_DIR") {
                Ok(manifest_dir) => PathBuf::from(manifest_dir).join(git_dir),
                Err(_) => return,
            }
        };
        rerun_on_head_change(&git_dir);
    }
}

fn git_output(args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .output()
        .map_err(|err| err.to_string())?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).to_string());
    }

    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        return Err(format!("empty output from git {}", args.join(" ")));
    }
    Ok(value)
}

fn rerun_on_head_change(git_dir: &Path) {
    let head_path = git_dir.join("HEAD");
    println!("cargo:rerun-if-changed={}", head_path.display());

    if let Ok(head) = fs::read_to_string(&head_path) {
        if let Some(ref_path) = head.trim().strip_prefix("ref: ") {
            println!("cargo:rerun-if-changed={}", git_dir.join(ref_path).display());
        }
    }
}
