// Checkpoint, rollback, publish, and revert against a real bare remote.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use gp_submit::marker::parse_commit_message;
use gp_submit::{
    CheckpointCoordinator, CheckpointError, CommitConfig, CommitHistory, NotRevertableReason,
    PublishCoordinator, PublishError, RevertCoordinator, RevertError,
};
use gp_workflow::{ChangedPaths, PublishRecord, RollbackKind, Workflow};
use gp_workspace::{RemovalPolicy, RemoteSpec, Workspace, WorkspaceManager};
use tempfile::{tempdir, TempDir};

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "git {:?}: {:?}", args, out);
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

struct Fixture {
    root: TempDir,
    remote: PathBuf,
    manager: Arc<WorkspaceManager>,
    checkpoints: CheckpointCoordinator,
    publisher: PublishCoordinator,
    reverter: RevertCoordinator,
}

impl Fixture {
    fn new() -> Self {
        let root = tempdir().unwrap();
        let seed = root.path().join("seed");
        fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&seed, &["config", "user.name", "Test User"]);
        git(&seed, &["config", "user.email", "test@example.com"]);
        fs::write(seed.join("README.md"), "# Test\n").unwrap();
        git(&seed, &["add", "."]);
        git(&seed, &["commit", "--quiet", "-m", "Initial commit"]);
        git(
            root.path(),
            &["clone", "--quiet", "--bare", "seed", "remote.git"],
        );
        let remote = root.path().join("remote.git");

        let manager = Arc::new(WorkspaceManager::new(
            Arc::new(Workspace::new(root.path().join("work/clone"))),
            RemoteSpec::new(remote.to_string_lossy()),
            RemovalPolicy::escalating(3, Duration::ZERO),
        ));
        let commit = CommitConfig::default();
        Self {
            checkpoints: CheckpointCoordinator::new(Arc::clone(&manager), commit.clone()),
            publisher: PublishCoordinator::new(Arc::clone(&manager), commit.clone()),
            reverter: RevertCoordinator::new(Arc::clone(&manager), commit),
            root,
            remote,
            manager,
        }
    }

    fn remote_tip(&self) -> String {
        git(&self.remote, &["rev-parse", "main"])
    }

    fn remote_file(&self, path: &str) -> Option<String> {
        let out = Command::new("git")
            .args(["show", &format!("main:{}", path)])
            .current_dir(&self.remote)
            .output()
            .unwrap();
        out.status
            .success()
            .then(|| String::from_utf8_lossy(&out.stdout).into_owned())
    }

    /// Push a human commit to the remote from an unrelated clone.
    fn push_foreign(&self, path: &str, content: &str) -> String {
        let dir = self.root.path().join(format!("foreign-{}", path.replace('/', "_")));
        git(
            self.root.path(),
            &[
                "clone",
                "--quiet",
                "--branch",
                "main",
                &self.remote.to_string_lossy(),
                &dir.to_string_lossy(),
            ],
        );
        git(&dir, &["config", "user.name", "Human"]);
        git(&dir, &["config", "user.email", "human@example.com"]);
        fs::write(dir.join(path), content).unwrap();
        git(&dir, &["add", "."]);
        git(&dir, &["commit", "--quiet", "-m", "Manual edit"]);
        git(&dir, &["push", "--quiet", "origin", "HEAD:refs/heads/main"]);
        git(&dir, &["rev-parse", "HEAD"])
    }

    /// Reset, apply, and checkpoint `files` for a new workflow.
    fn checkpointed(&self, id: &str, files: &[(&str, &str)]) -> Workflow {
        let guard = self.manager.workspace().lock();
        self.manager.reset(&guard).unwrap();
        let changed = self
            .manager
            .apply_files(&guard, files.iter().copied())
            .unwrap();

        let mut workflow = Workflow::new(Some(id.to_string()), format!("Change for {}", id));
        let checkpoint = self
            .checkpoints
            .checkpoint(&guard, id, &changed, &workflow.annotation())
            .unwrap();
        workflow.changed_paths = changed;
        workflow.checkpoint = Some(checkpoint);
        workflow
    }

    fn publish(&self, workflow: &Workflow) -> Result<PublishRecord, PublishError> {
        let guard = self.manager.workspace().lock();
        self.publisher.publish(&guard, workflow)
    }

    fn ws(&self) -> PathBuf {
        self.manager.workspace().path().to_path_buf()
    }
}

#[test]
fn checkpoint_is_local_and_annotated() {
    let fx = Fixture::new();
    let before = fx.remote_tip();
    let workflow = fx.checkpointed("w1", &[("a.txt", "x")]);
    let checkpoint = workflow.checkpoint.as_ref().unwrap();

    assert_eq!(checkpoint.base_ref, before);
    assert_eq!(fx.remote_tip(), before);
    assert_eq!(checkpoint.files.len(), 1);
    assert_eq!(checkpoint.files[0].content, b"x");
    assert_eq!(checkpoint.files[0].sha256.len(), 64);

    let message = git(&fx.ws(), &["log", "-1", "--format=%B"]);
    let parsed = parse_commit_message(&message);
    assert!(parsed.system_authored);
    assert_eq!(parsed.workflow_id.as_deref(), Some("w1"));
    assert_eq!(parsed.annotation.unwrap().changed_paths, vec!["a.txt"]);
}

#[test]
fn checkpoint_refuses_unrelated_drift() {
    let fx = Fixture::new();
    let guard = fx.manager.workspace().lock();
    fx.manager.reset(&guard).unwrap();
    let changed = fx.manager.apply_files(&guard, [("a.txt", "x")]).unwrap();
    fs::write(guard.path().join("stray.txt"), "?").unwrap();

    let err = fx
        .checkpoints
        .checkpoint(&guard, "w", &changed, &Default::default())
        .unwrap_err();
    match err {
        CheckpointError::UnrelatedDrift { paths } => assert_eq!(paths, vec!["stray.txt"]),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn identical_content_is_nothing_to_checkpoint() {
    let fx = Fixture::new();
    let guard = fx.manager.workspace().lock();
    fx.manager.reset(&guard).unwrap();
    let changed = fx
        .manager
        .apply_files(&guard, [("README.md", "# Test\n")])
        .unwrap();

    let err = fx
        .checkpoints
        .checkpoint(&guard, "w", &changed, &Default::default())
        .unwrap_err();
    assert!(matches!(err, CheckpointError::NothingToCheckpoint));
    assert!(!err.retry_safe());
}

#[test]
fn soft_rollback_keeps_files_unstaged() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w3", &[("b.txt", "y")]);
    let checkpoint = workflow.checkpoint.as_ref().unwrap();

    let guard = fx.manager.workspace().lock();
    let outcome = fx
        .checkpoints
        .rollback(&guard, checkpoint, &workflow.changed_paths, RollbackKind::Soft)
        .unwrap();
    assert!(outcome.workspace_touched);

    let ws = fx.ws();
    assert_eq!(git(&ws, &["rev-parse", "HEAD"]), checkpoint.base_ref);
    assert_eq!(fs::read_to_string(ws.join("b.txt")).unwrap(), "y");
    assert_eq!(git(&ws, &["status", "--porcelain"]), "?? b.txt");
}

#[test]
fn hard_rollback_touches_only_changed_paths() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w4", &[("README.md", "rewritten"), ("new/b.txt", "y")]);
    let checkpoint = workflow.checkpoint.as_ref().unwrap();

    let ws = fx.ws();
    fs::write(ws.join("unrelated.txt"), "in flight").unwrap();

    let guard = fx.manager.workspace().lock();
    let outcome = fx
        .checkpoints
        .rollback(&guard, checkpoint, &workflow.changed_paths, RollbackKind::Hard)
        .unwrap();
    assert_eq!(outcome.restored, vec!["README.md"]);
    assert_eq!(outcome.removed, vec!["new/b.txt"]);

    assert_eq!(fs::read_to_string(ws.join("README.md")).unwrap(), "# Test\n");
    assert!(!ws.join("new").exists());
    assert_eq!(fs::read_to_string(ws.join("unrelated.txt")).unwrap(), "in flight");
    assert_eq!(git(&ws, &["rev-parse", "HEAD"]), checkpoint.base_ref);
}

#[test]
fn rollback_after_reset_is_bookkeeping_only() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w5", &[("a.txt", "x")]);

    let guard = fx.manager.workspace().lock();
    fx.manager.reset(&guard).unwrap();
    fs::write(guard.path().join("later.txt"), "other request").unwrap();

    let outcome = fx
        .checkpoints
        .rollback(
            &guard,
            workflow.checkpoint.as_ref().unwrap(),
            &workflow.changed_paths,
            RollbackKind::Hard,
        )
        .unwrap();
    assert!(!outcome.workspace_touched);
    assert!(guard.path().join("later.txt").exists());
}

#[test]
fn publish_pushes_exactly_one_commit() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w1", &[("a.txt", "x")]);

    let record = fx.publish(&workflow).unwrap();
    assert_eq!(record.remote_ref, fx.remote_tip());
    assert_eq!(
        record.source_checkpoint_ref,
        workflow.checkpoint.as_ref().unwrap().checkpoint_ref
    );
    assert_eq!(record.workflow_id.as_deref(), Some("w1"));
    assert_eq!(fx.remote_file("a.txt").as_deref(), Some("x"));
    assert_eq!(git(&fx.remote, &["rev-list", "--count", "main"]), "2");

    let message = git(&fx.remote, &["log", "-1", "--format=%B", "main"]);
    assert!(parse_commit_message(&message).system_authored);
    assert!(!message.contains("awaiting approval"));
}

#[test]
fn publish_replays_onto_moved_remote() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w6", &[("a.txt", "x")]);
    let foreign = fx.push_foreign("c.txt", "human");

    let record = fx.publish(&workflow).unwrap();
    assert_eq!(
        git(&fx.remote, &["rev-parse", &format!("{}~1", record.remote_ref)]),
        foreign
    );
    assert_eq!(fx.remote_file("a.txt").as_deref(), Some("x"));
    assert_eq!(fx.remote_file("c.txt").as_deref(), Some("human"));
}

#[test]
fn publish_without_net_change_is_refused() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w7", &[("a.txt", "x")]);
    let foreign = fx.push_foreign("a.txt", "x");

    let err = fx.publish(&workflow).unwrap_err();
    assert!(matches!(err, PublishError::NoChangesToPublish));
    assert!(!err.retry_safe());
    assert_eq!(fx.remote_tip(), foreign);
}

#[test]
fn publish_to_missing_remote_fails_at_reset() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w8", &[("a.txt", "x")]);
    fs::remove_dir_all(&fx.remote).unwrap();

    let err = fx.publish(&workflow).unwrap_err();
    assert!(matches!(err, PublishError::Workspace(_)));
    assert!(err.retry_safe());
    assert_eq!(err.stage(), gp_workflow::Stage::Reset);
}

#[test]
fn revert_undoes_last_publish() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w1", &[("a.txt", "x")]);
    let record = fx.publish(&workflow).unwrap();

    let guard = fx.manager.workspace().lock();
    let revert = fx.reverter.revert(&guard, &record).unwrap();
    drop(guard);

    assert_eq!(revert.remote_ref, fx.remote_tip());
    assert_eq!(revert.source_checkpoint_ref, record.remote_ref);
    assert!(fx.remote_file("a.txt").is_none());
    assert_eq!(git(&fx.remote, &["rev-list", "--count", "main"]), "3");

    let message = git(&fx.remote, &["log", "-1", "--format=%B", "main"]);
    let parsed = parse_commit_message(&message);
    assert!(parsed.system_authored);
    assert_eq!(parsed.reverts.as_deref(), Some(record.remote_ref.as_str()));
}

#[test]
fn revert_refuses_when_tip_moved() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w1", &[("a.txt", "x")]);
    let record = fx.publish(&workflow).unwrap();
    let foreign = fx.push_foreign("c.txt", "human");

    let guard = fx.manager.workspace().lock();
    let err = fx.reverter.revert(&guard, &record).unwrap_err();
    match err {
        RevertError::NotRevertable {
            reason: NotRevertableReason::TipMoved { expected, actual },
        } => {
            assert_eq!(expected, record.remote_ref);
            assert_eq!(actual, foreign);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(fx.remote_tip(), foreign);
}

#[test]
fn revert_refuses_commit_without_marker() {
    let fx = Fixture::new();
    let tip = fx.remote_tip();
    let record = PublishRecord {
        remote_ref: tip.clone(),
        pushed_at: chrono::Utc::now(),
        source_checkpoint_ref: tip.clone(),
        workflow_id: None,
    };

    let guard = fx.manager.workspace().lock();
    let err = fx.reverter.revert(&guard, &record).unwrap_err();
    assert!(matches!(
        err,
        RevertError::NotRevertable {
            reason: NotRevertableReason::NotSystemAuthored { .. }
        }
    ));
    assert_eq!(fx.remote_tip(), tip);
}

#[test]
fn changed_paths_round_trip_through_checkpoint() {
    let fx = Fixture::new();
    let workflow = fx.checkpointed("w9", &[("z.txt", "1"), ("a/b.txt", "2")]);
    let expected: ChangedPaths = ["z.txt", "a/b.txt"].into_iter().collect();
    assert_eq!(workflow.changed_paths, expected);
    let paths: Vec<&str> = workflow
        .checkpoint
        .as_ref()
        .unwrap()
        .files
        .iter()
        .map(|f| f.path.as_str())
        .collect();
    assert_eq!(paths, vec!["z.txt", "a/b.txt"]);
}

#[test]
fn history_reads_the_remote_without_touching_a_pending_checkpoint() {
    let fx = Fixture::new();
    let first = fx.checkpointed("w1", &[("a.txt", "x")]);
    let record = fx.publish(&first).unwrap();
    let foreign = fx.push_foreign("c.txt", "human");
    let pending = fx.checkpointed("w2", &[("b.txt", "y")]);

    let history = CommitHistory::new(Arc::clone(&fx.manager));
    let guard = fx.manager.workspace().lock();
    let commits = history.recent(&guard, 10).unwrap();

    assert_eq!(commits.len(), 3);
    assert_eq!(commits[0].hash, foreign);
    assert!(!commits[0].system_authored);
    assert_eq!(commits[0].changed_files, vec!["c.txt"]);
    assert_eq!(commits[1].hash, record.remote_ref);
    assert!(commits[1].system_authored);
    assert_eq!(commits[1].workflow_id.as_deref(), Some("w1"));
    assert_eq!(commits[1].changed_files, vec!["a.txt"]);
    assert_eq!(commits[2].subject, "Initial commit");

    assert_eq!(
        git(guard.path(), &["rev-parse", "HEAD"]),
        pending.checkpoint.as_ref().unwrap().checkpoint_ref
    );
    assert_eq!(history.recent(&guard, 0).unwrap().len(), 1);
}

#[test]
fn history_clones_when_there_is_no_workspace_yet() {
    let fx = Fixture::new();
    let history = CommitHistory::new(Arc::clone(&fx.manager));
    let guard = fx.manager.workspace().lock();

    let commits = history.recent(&guard, 5).unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].hash, fx.remote_tip());
    assert!(guard.path().join(".git").exists());
}
