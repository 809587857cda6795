use crate::error::ClassifyError;
use crate::sender::sender_info;
use crate::verdict::Verdict;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_CONNECT: &str = "/run/rspamd/worker-controller.sock";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub trait Classifier: Sync {
    fn classify(&self, path: &Path, content: &[u8]) -> Result<Verdict, ClassifyError>;
}

/// Classifier backed by a closure. Handy for tests and dry experiments.
pub struct FnClassifier<F>(pub F);

impl<F> Classifier for FnClassifier<F>
where
    F: Fn(&Path, &[u8]) -> Result<Verdict, ClassifyError> + Sync,
{
    fn classify(&self, path: &Path, content: &[u8]) -> Result<Verdict, ClassifyError> {
        (self.0)(path, content)
    }
}

/// Runs the `rspamc` client once per message.
#[derive(Debug, Clone)]
pub struct Rspamc {
    pub program: PathBuf,
    /// Passed before everything else.
    pub args: Vec<String>,
    /// Controller socket or host for `-h`.
    pub connect: Option<String>,
    pub timeout: Duration,
}

impl Default for Rspamc {
    fn default() -> Self {
        Rspamc {
            program: PathBuf::from("rspamc"),
            args: Vec::new(),
            connect: Some(DEFAULT_CONNECT.to_string()),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Rspamc {
    fn command(&self, content: &[u8]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(connect) = &self.connect {
            cmd.arg("-h").arg(connect);
        }
        if let Some(info) = sender_info(content) {
            cmd.args(info.rspamc_args());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group: a Ctrl-C on the terminal stops dispatching but
        // must not kill the classifications already running.
        cmd.process_group(0);
        cmd
    }
}

fn drain(mut reader: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn wait_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl Classifier for Rspamc {
    fn classify(&self, path: &Path, content: &[u8]) -> Result<Verdict, ClassifyError> {
        let mut cmd = self.command(content);
        debug!("{}: running {:?}", path.display(), cmd);
        let mut child = cmd.spawn().map_err(|e| {
            ClassifyError::failed(format!("cannot run {}: {e}", self.program.display()), "")
        })?;

        // stdin is fed from its own thread so a classifier that talks before
        // it has read everything cannot deadlock us on a full pipe.
        let stdin = child.stdin.take().map(|mut stdin| {
            let content = content.to_vec();
            thread::spawn(move || match stdin.write_all(&content) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            })
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = wait_deadline(&mut child, self.timeout);
        let status = match status {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ClassifyError::Timeout(self.timeout));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ClassifyError::failed(format!("wait: {e}"), ""));
            }
        };

        // The child is gone, so every pipe end is closed and these joins return.
        let write_result = stdin.and_then(|h| h.join().ok()).unwrap_or(Ok(()));
        let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
        let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);
        let output = format!("{stdout}{stderr}");

        if !status.success() {
            return Err(ClassifyError::failed(format!("exited with {status}"), output));
        }
        if let Err(e) = write_result {
            return Err(ClassifyError::failed(format!("writing message: {e}"), output));
        }
        Verdict::parse(&stdout)
            .ok_or_else(|| ClassifyError::failed("no 'Action:' line in output", output))
    }
}

#[cfg(test)]
fn fake_rspamc(script: &str, timeout: Duration) -> Rspamc {
    Rspamc {
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), script.to_string(), "rspamc".to_string()],
        connect: Some("/nonexistent.sock".to_string()),
        timeout,
    }
}

#[test]
fn test_rspamc_verdict() {
    let rspamc = fake_rspamc(
        "cat >/dev/null; echo 'Action: add header'; echo 'Score: 6.00 / 15.00'",
        Duration::from_secs(10),
    );
    let verdict = rspamc.classify(Path::new("m1"), b"Subject: x\r\n\r\nx").unwrap();
    assert_eq!(verdict.action, "add header");
    assert_eq!(verdict.score, Some(6.0));
}

#[test]
fn test_rspamc_receives_content_and_args() {
    // echo the message body and the arguments back as the action label
    let rspamc = fake_rspamc(
        r#"body=$(tail -n 1); echo "Action: $body $*""#,
        Duration::from_secs(10),
    );
    let verdict = rspamc
        .classify(Path::new("m1"), b"Subject: x\n\nhello")
        .unwrap();
    assert_eq!(verdict.action, "hello -h /nonexistent.sock");
}

#[test]
fn test_rspamc_own_process_group() {
    // field 5 of /proc/<pid>/stat is the process group
    let rspamc = fake_rspamc(
        r#"echo "Action: $(cut -d' ' -f5 /proc/$$/stat) $$""#,
        Duration::from_secs(10),
    );
    let verdict = rspamc.classify(Path::new("m1"), b"x").unwrap();
    let (pgid, pid) = verdict.action.split_once(' ').unwrap();
    assert_eq!(pgid, pid);
}

#[test]
fn test_rspamc_nonzero_exit() {
    let rspamc = fake_rspamc("echo 'connection refused' >&2; exit 1", Duration::from_secs(10));
    let err = rspamc.classify(Path::new("m1"), b"x").unwrap_err();
    assert!(matches!(err, ClassifyError::Failed { .. }));
    assert!(err.output().contains("connection refused"));
}

#[test]
fn test_rspamc_unparsable() {
    let rspamc = fake_rspamc("echo 'garbage'", Duration::from_secs(10));
    let err = rspamc.classify(Path::new("m1"), b"x").unwrap_err();
    assert!(matches!(err, ClassifyError::Failed { .. }));
    assert_eq!(err.output(), "garbage\n");
}

#[test]
fn test_rspamc_timeout() {
    let rspamc = fake_rspamc("exec sleep 10", Duration::from_millis(200));
    let start = Instant::now();
    let err = rspamc.classify(Path::new("m1"), b"x").unwrap_err();
    assert!(matches!(err, ClassifyError::Timeout(_)));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_rspamc_missing_program() {
    let rspamc = Rspamc {
        program: PathBuf::from("/nonexistent/rspamc"),
        ..Default::default()
    };
    let err = rspamc.classify(Path::new("m1"), b"x").unwrap_err();
    assert!(matches!(err, ClassifyError::Failed { .. }));
}
