use ac_git::{GitError, WorktreeCoordinator};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use uuid::Uuid;

fn git(path: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn setup_repo(path: &Path) {
    git(path, &["init", "-b", "main"]);
    git(path, &["config", "user.email", "test@test.com"]);
    git(path, &["config", "user.name", "Test"]);
    std::fs::write(path.join("x.txt"), "line 1\n").unwrap();
    git(path, &["add", "."]);
    git(path, &["commit", "-m", "init"]);
}

fn head_of(path: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(path)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[tokio::test]
async fn create_worktree_populates_directory_and_branch() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    setup_repo(&repo);

    let coordinator = WorktreeCoordinator::new(tmp.path().join("worktrees"));
    let agent_id = Uuid::new_v4();
    let (work_dir, branch) = coordinator
        .create_worktree(&repo, agent_id, "agent/test-1")
        .await
        .unwrap();

    assert!(work_dir.join("x.txt").exists());
    assert_eq!(branch, "agent/test-1");

    let output = Command::new("git")
        .args(["branch", "--list", "agent/test-1"])
        .current_dir(&repo)
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("agent/test-1"));
}

#[tokio::test]
async fn create_worktree_reuses_existing_branch() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    setup_repo(&repo);
    git(&repo, &["branch", "agent/reused"]);

    let coordinator = WorktreeCoordinator::new(tmp.path().join("worktrees"));
    let result = coordinator
        .create_worktree(&repo, Uuid::new_v4(), "agent/reused")
        .await;
    assert!(result.is_ok(), "existing branch should be attached: {result:?}");
}

#[tokio::test]
async fn create_worktree_rejects_non_repo() {
    let tmp = TempDir::new().unwrap();
    let not_repo = tmp.path().join("plain");
    std::fs::create_dir_all(&not_repo).unwrap();

    let coordinator = WorktreeCoordinator::new(tmp.path().join("worktrees"));
    let err = coordinator
        .create_worktree(&not_repo, Uuid::new_v4(), "agent/x")
        .await
        .unwrap_err();
    assert!(matches!(err, GitError::NotGitRepository(_)));
}

#[tokio::test]
async fn remove_worktree_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    setup_repo(&repo);

    let coordinator = WorktreeCoordinator::new(tmp.path().join("worktrees"));
    let agent_id = Uuid::new_v4();
    let (work_dir, _) = coordinator
        .create_worktree(&repo, agent_id, "agent/rm")
        .await
        .unwrap();

    coordinator.remove_worktree(&repo, agent_id).await;
    assert!(!work_dir.exists());

    // Second removal of a gone worktree must not error out.
    coordinator.remove_worktree(&repo, agent_id).await;
}

#[tokio::test]
async fn clean_merge_lands_on_target_branch() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    setup_repo(&repo);

    let coordinator = WorktreeCoordinator::new(tmp.path().join("worktrees"));
    let agent_id = Uuid::new_v4();
    let (work_dir, _) = coordinator
        .create_worktree(&repo, agent_id, "agent/clean")
        .await
        .unwrap();

    // Non-conflicting change in the worktree, left uncommitted so the
    // auto-commit step is exercised too.
    std::fs::write(work_dir.join("new.txt"), "added\n").unwrap();

    let result = coordinator.try_local_merge(&work_dir, None).await.unwrap();
    assert!(result.success, "merge should succeed: {result:?}");
    assert_eq!(result.branch, "agent/clean");
    assert_eq!(result.target_branch, "main");
    assert!(result.conflicts.is_empty());
    assert!(repo.join("new.txt").exists(), "merge commit should land on main");
}

#[tokio::test]
async fn conflicting_merge_reports_files_and_restores_head() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    setup_repo(&repo);

    let coordinator = WorktreeCoordinator::new(tmp.path().join("worktrees"));
    let agent_id = Uuid::new_v4();
    let (work_dir, _) = coordinator
        .create_worktree(&repo, agent_id, "agent/conflict")
        .await
        .unwrap();

    // Both sides rewrite line 1 of x.txt.
    std::fs::write(repo.join("x.txt"), "main version\n").unwrap();
    git(&repo, &["commit", "-am", "main change"]);
    std::fs::write(work_dir.join("x.txt"), "agent version\n").unwrap();
    git(&work_dir, &["commit", "-am", "agent change"]);

    let head_before = head_of(&repo);
    let result = coordinator.try_local_merge(&work_dir, None).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.conflicts, vec!["x.txt".to_string()]);
    assert_eq!(result.branch, "agent/conflict");
    assert_eq!(result.target_branch, "main");
    assert_eq!(head_of(&repo), head_before, "source HEAD must be unchanged");
}

#[tokio::test]
async fn merge_without_any_target_candidate_fails() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    // Repo whose only branch is neither main nor master and with no origin.
    git(&repo, &["init", "-b", "trunk"]);
    git(&repo, &["config", "user.email", "test@test.com"]);
    git(&repo, &["config", "user.name", "Test"]);
    std::fs::write(repo.join("x.txt"), "line 1\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-m", "init"]);

    let coordinator = WorktreeCoordinator::new(tmp.path().join("worktrees"));
    let (work_dir, _) = coordinator
        .create_worktree(&repo, Uuid::new_v4(), "agent/orphan")
        .await
        .unwrap();

    let err = coordinator
        .try_local_merge(&work_dir, None)
        .await
        .unwrap_err();
    assert!(matches!(err, GitError::TargetBranchUnknown));
}

#[tokio::test]
async fn merge_honors_caller_target_override() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    setup_repo(&repo);
    git(&repo, &["branch", "develop"]);

    let coordinator = WorktreeCoordinator::new(tmp.path().join("worktrees"));
    let (work_dir, _) = coordinator
        .create_worktree(&repo, Uuid::new_v4(), "agent/override")
        .await
        .unwrap();
    std::fs::write(work_dir.join("extra.txt"), "data\n").unwrap();

    let result = coordinator
        .try_local_merge(&work_dir, Some("develop".to_string()))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.target_branch, "develop");
}

#[tokio::test]
async fn status_and_diff_return_porcelain_output() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    setup_repo(&repo);

    let coordinator = WorktreeCoordinator::new(tmp.path().join("worktrees"));
    let (work_dir, _) = coordinator
        .create_worktree(&repo, Uuid::new_v4(), "agent/status")
        .await
        .unwrap();

    std::fs::write(work_dir.join("x.txt"), "line 1 modified\n").unwrap();

    let status = coordinator.status(&work_dir).await.unwrap();
    assert!(status.contains("x.txt"));

    let diff = coordinator.diff(&work_dir).await.unwrap();
    assert!(diff.contains("line 1 modified"));
}
