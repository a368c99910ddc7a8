use std::path::Path;
use std::process::Command;

const GIT_ENV_OVERRIDES: [&str; 4] = [
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_COMMON_DIR",
];

pub fn git_command() -> Command {
    let mut cmd = Command::new("git");
    for key in GIT_ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd
}

pub fn run_git(repo: &Path, args: &[&str]) {
    let status = git_command()
        .args(["-c", "user.name=Cherrypick Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(repo)
        .status()
        .expect("Failed to invoke git");
    assert!(status.success(), "git command failed: {:?}", args);
}

/// Create a repository at `repo` on branch `main` with `files` committed.
pub fn init_repo(repo: &Path, files: &[(&str, &str)]) {
    std::fs::create_dir_all(repo).expect("Failed to create repo dir");
    run_git(repo, &["init", "-q"]);
    run_git(repo, &["checkout", "-q", "-b", "main"]);
    commit_files(repo, files, "initial");
}

pub fn commit_files(repo: &Path, files: &[(&str, &str)], message: &str) {
    for (path, content) in files {
        let full = repo.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&full, content).expect("Failed to write file");
    }
    run_git(repo, &["add", "-A"]);
    run_git(repo, &["commit", "-q", "-m", message]);
}
