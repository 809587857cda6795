use rspamd_move::summary::{EXIT_FAILURES, EXIT_INTERRUPTED, EXIT_OK};
use rspamd_move::{
    ActionMap, ClassifyError, Config, Dispatcher, FailureKind, FnClassifier, Rspamc, Verdict,
    enumerate, run,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tempfile::TempDir;

/// Message bodies carry the verdict the fake classifier hands back.
fn echo_classifier(_path: &Path, content: &[u8]) -> Result<Verdict, ClassifyError> {
    let text = String::from_utf8_lossy(content);
    if text.contains("CRASH") {
        return Err(ClassifyError::failed("exited with exit status: 1", text));
    }
    Verdict::parse(&text).ok_or_else(|| ClassifyError::failed("no action", text.to_string()))
}

struct Fixture {
    _root: TempDir,
    inbox: PathBuf,
    dir_a: PathBuf,
    dir_b: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let inbox = root.path().join("inbox");
        let dir_a = root.path().join("a");
        let dir_b = root.path().join("b");
        for d in [&inbox, &dir_a, &dir_b] {
            fs::create_dir(d).unwrap();
        }
        Fixture {
            _root: root,
            inbox,
            dir_a,
            dir_b,
        }
    }

    fn mail(&self, name: &str, action: &str) -> PathBuf {
        let path = self.inbox.join(name);
        fs::write(&path, format!("Subject: {name}\n\nAction: {action}\n")).unwrap();
        path
    }

    fn action_map(&self) -> ActionMap {
        ActionMap::new(
            [
                ("reject".to_string(), self.dir_a.clone()),
                ("greylist".to_string(), self.dir_b.clone()),
            ],
            None,
        )
        .unwrap()
    }
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_three_files_example() {
    let fx = Fixture::new();
    let m1 = fx.mail("1596097522.M1.host:2,S", "reject");
    let m2 = fx.mail("1596097523.M2.host:2,", "greylist");
    let m3 = fx.mail("1596097524.M3.host:2,", "no action");
    let classifier = FnClassifier(echo_classifier);
    let config = Config {
        emails: vec![fx.inbox.clone()],
        action_map: fx.action_map(),
        classifier: &classifier,
        threads: 4,
        dry_run: false,
    };

    let summary = run(&config, &AtomicBool::new(false)).unwrap();

    assert_eq!(listing(&fx.dir_a), ["1596097522.M1.host:2,S"]);
    assert_eq!(listing(&fx.dir_b), ["1596097523.M2.host:2,"]);
    assert!(!m1.exists());
    assert!(!m2.exists());
    assert!(m3.exists());
    assert_eq!(summary.to_string(), "{greylist:1, reject:1, unmapped:1, failed:0}");
    assert_eq!(summary.moved("reject"), 1);
    assert_eq!(summary.moved("greylist"), 1);
    assert_eq!(summary.unmapped(), 1);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.exit_status(), EXIT_OK);
}

#[test]
fn test_pool_size_does_not_change_result() {
    let actions = ["reject", "greylist", "no action", "add header"];
    let mut results = Vec::new();
    for threads in [1, 16] {
        let fx = Fixture::new();
        for i in 0..50 {
            fx.mail(&format!("m{i:02}"), actions[i % actions.len()]);
        }
        fx.mail("crash", "CRASH");
        let classifier = FnClassifier(echo_classifier);
        let map = fx.action_map();
        let dispatcher = Dispatcher {
            classifier: &classifier,
            action_map: &map,
            threads,
            dry_run: false,
        };
        let files = enumerate(&[fx.inbox.clone()], &map).files;
        let summary = dispatcher.run(files, &AtomicBool::new(false));
        let placement = (listing(&fx.inbox), listing(&fx.dir_a), listing(&fx.dir_b));
        results.push((placement, summary));
    }
    let (first, second) = (&results[0], &results[1]);
    assert_eq!(first.0, second.0);
    assert!(first.1.same_counts(&second.1));
    assert_eq!(first.1.moved("reject"), 13);
    assert_eq!(first.1.moved("greylist"), 13);
    assert_eq!(first.1.unmapped(), 24);
    assert_eq!(first.1.failed_kind(FailureKind::ClassifierError), 1);
    assert_eq!(first.1.exit_status(), EXIT_FAILURES);
}

#[test]
fn test_collision_leaves_source() {
    let fx = Fixture::new();
    let m1 = fx.mail("m1", "reject");
    fs::write(fx.dir_a.join("m1"), b"from an earlier run").unwrap();
    let classifier = FnClassifier(echo_classifier);
    let map = fx.action_map();
    let dispatcher = Dispatcher {
        classifier: &classifier,
        action_map: &map,
        threads: 2,
        dry_run: false,
    };

    let summary = dispatcher.run(vec![m1.clone()], &AtomicBool::new(false));

    assert!(m1.exists());
    assert_eq!(fs::read(fx.dir_a.join("m1")).unwrap(), b"from an earlier run");
    assert_eq!(summary.failed_kind(FailureKind::MoveError), 1);
    assert_eq!(summary.exit_status(), EXIT_FAILURES);
}

#[test]
fn test_timeout_leaves_file() {
    let fx = Fixture::new();
    let m1 = fx.mail("m1", "reject");
    let rspamc = Rspamc {
        program: PathBuf::from("sh"),
        args: vec!["-c".into(), "exec sleep 10".into(), "rspamc".into()],
        connect: None,
        timeout: Duration::from_millis(200),
    };
    let map = fx.action_map();
    let dispatcher = Dispatcher {
        classifier: &rspamc,
        action_map: &map,
        threads: 1,
        dry_run: false,
    };

    let summary = dispatcher.run(vec![m1.clone()], &AtomicBool::new(false));

    assert!(m1.exists());
    assert!(listing(&fx.dir_a).is_empty());
    assert_eq!(summary.failed_kind(FailureKind::ClassifierTimeout), 1);
}

#[test]
fn test_rspamc_subprocess_end_to_end() {
    let fx = Fixture::new();
    let m1 = fx.mail("m1", "reject");
    // a stand-in rspamc that reports whatever Action line the message carries
    let rspamc = Rspamc {
        program: PathBuf::from("sh"),
        args: vec!["-c".into(), "grep '^Action:'".into(), "rspamc".into()],
        connect: None,
        timeout: Duration::from_secs(10),
    };
    let map = fx.action_map();
    let dispatcher = Dispatcher {
        classifier: &rspamc,
        action_map: &map,
        threads: 1,
        dry_run: false,
    };

    let summary = dispatcher.run(vec![m1.clone()], &AtomicBool::new(false));

    assert!(!m1.exists());
    assert_eq!(listing(&fx.dir_a), ["m1"]);
    assert_eq!(summary.moved("reject"), 1);
}

#[test]
fn test_dry_run_moves_nothing() {
    let fx = Fixture::new();
    let m1 = fx.mail("m1", "reject");
    let classifier = FnClassifier(echo_classifier);
    let config = Config {
        emails: vec![fx.inbox.clone()],
        action_map: fx.action_map(),
        classifier: &classifier,
        threads: 2,
        dry_run: true,
    };

    let summary = run(&config, &AtomicBool::new(false)).unwrap();

    assert!(m1.exists());
    assert!(listing(&fx.dir_a).is_empty());
    assert_eq!(summary.moved("reject"), 1);
}

#[test]
fn test_others_dir() {
    let fx = Fixture::new();
    let m1 = fx.mail("m1", "no action");
    let others = fx.inbox.parent().unwrap().join("others");
    fs::create_dir(&others).unwrap();
    let classifier = FnClassifier(echo_classifier);
    let config = Config {
        emails: vec![m1.clone()],
        action_map: ActionMap::new([("reject".to_string(), fx.dir_a.clone())], Some(others.clone()))
            .unwrap(),
        classifier: &classifier,
        threads: 1,
        dry_run: false,
    };

    let summary = run(&config, &AtomicBool::new(false)).unwrap();

    assert_eq!(listing(&others), ["m1"]);
    assert_eq!(summary.moved("no action"), 1);
    assert_eq!(summary.unmapped(), 0);
}

#[test]
fn test_cancelled_run_touches_nothing() {
    let fx = Fixture::new();
    let m1 = fx.mail("m1", "reject");
    let m2 = fx.mail("m2", "greylist");
    let classifier = FnClassifier(echo_classifier);
    let map = fx.action_map();
    let dispatcher = Dispatcher {
        classifier: &classifier,
        action_map: &map,
        threads: 4,
        dry_run: false,
    };

    let summary = dispatcher.run(vec![m1.clone(), m2.clone()], &AtomicBool::new(true));

    assert!(m1.exists());
    assert!(m2.exists());
    assert_eq!(summary.not_processed(), 2);
    assert_eq!(summary.processed(), 0);
    assert_eq!(summary.exit_status(), EXIT_INTERRUPTED);
}

#[test]
fn test_vanished_file() {
    let fx = Fixture::new();
    let classifier = FnClassifier(echo_classifier);
    let map = fx.action_map();
    let dispatcher = Dispatcher {
        classifier: &classifier,
        action_map: &map,
        threads: 1,
        dry_run: false,
    };

    let summary = dispatcher.run(vec![fx.inbox.join("gone")], &AtomicBool::new(false));

    assert_eq!(summary.vanished(), 1);
    assert_eq!(summary.exit_status(), EXIT_OK);
}

fn maildir(parent: &Path, name: &str) -> PathBuf {
    let dir = parent.join(name);
    for sub in ["cur", "new", "tmp"] {
        fs::create_dir_all(dir.join(sub)).unwrap();
    }
    dir
}

#[test]
fn test_enumerate_maildir_root() {
    let fx = Fixture::new();
    let md = maildir(&fx.inbox, "Maildir");
    fs::write(md.join("cur/c1:2,S"), b"x").unwrap();
    fs::write(md.join("new/n1"), b"x").unwrap();
    fs::write(md.join("tmp/t1"), b"x").unwrap();
    for meta in ["dovecot-uidlist", "dovecot.index.cache", "maildirfolder", "subscriptions"] {
        fs::write(md.join(meta), b"x").unwrap();
    }
    let sent = maildir(&md, ".Sent");
    fs::write(sent.join("cur/s1"), b"x").unwrap();

    let enumeration = enumerate(&[md.clone()], &fx.action_map());

    assert!(enumeration.errors.is_empty());
    assert_eq!(enumeration.files, [md.join("cur/c1:2,S"), md.join("new/n1")]);
}

#[test]
fn test_enumerate_nested_maildirs() {
    let fx = Fixture::new();
    let junk = maildir(&fx.inbox, "Junk");
    fs::write(junk.join("cur/c1"), b"x").unwrap();
    fs::write(junk.join("new/n1"), b"x").unwrap();
    fs::write(junk.join("tmp/t1"), b"x").unwrap();
    fs::write(junk.join("dovecot-uidlist"), b"x").unwrap();
    let loose = fx.mail("loose", "reject");
    // a destination inside the input tree is not rescanned
    let dest = fx.inbox.join("Spam");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("s1"), b"x").unwrap();
    let map = ActionMap::new([("reject".to_string(), dest)], None).unwrap();

    let enumeration = enumerate(&[fx.inbox.clone()], &map);

    assert!(enumeration.errors.is_empty());
    assert_eq!(
        enumeration.files,
        [junk.join("cur/c1"), junk.join("new/n1"), loose]
    );
}

#[test]
fn test_overlapping_roots_processed_once() {
    let mut results = Vec::new();
    for threads in [1, 16] {
        let fx = Fixture::new();
        let md = maildir(&fx.inbox, "Maildir");
        for i in 0..20 {
            fs::write(md.join(format!("cur/m{i:02}")), b"Action: reject\n").unwrap();
        }
        let roots = [md.clone(), md.join("cur"), md.join("cur/m00"), md.clone()];
        let map = fx.action_map();
        let enumeration = enumerate(&roots, &map);
        assert_eq!(enumeration.files.len(), 20);

        let classifier = FnClassifier(echo_classifier);
        let dispatcher = Dispatcher {
            classifier: &classifier,
            action_map: &map,
            threads,
            dry_run: false,
        };
        let summary = dispatcher.run(enumeration.files, &AtomicBool::new(false));

        assert_eq!(listing(&fx.dir_a).len(), 20);
        assert_eq!(summary.moved("reject"), 20);
        assert_eq!(summary.vanished(), 0);
        assert_eq!(summary.failed(), 0);
        assert_eq!(summary.exit_status(), EXIT_OK);
        results.push(summary);
    }
    assert!(results[0].same_counts(&results[1]));
}

#[test]
fn test_missing_input_is_fatal() {
    let fx = Fixture::new();
    let classifier = FnClassifier(echo_classifier);
    let config = Config {
        emails: vec![fx.inbox.join("nope")],
        action_map: fx.action_map(),
        classifier: &classifier,
        threads: 1,
        dry_run: false,
    };
    assert!(run(&config, &AtomicBool::new(false)).is_err());
}
