use crate::error::FailureKind;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FATAL: u8 = 1;
pub const EXIT_FAILURES: u8 = 3;
pub const EXIT_INTERRUPTED: u8 = 4;

/// Terminal state of one message file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Moved into `destination` (or would have been, in a dry run).
    Moved {
        action: String,
        destination: PathBuf,
    },
    /// No directory configured for the action; left in place.
    Unmapped { action: String },
    /// Gone between enumeration and open.
    Vanished,
    Failed(FailureKind),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Counts {
    moved: BTreeMap<String, usize>,
    unmapped: usize,
    vanished: usize,
    failed: BTreeMap<FailureKind, usize>,
    not_processed: usize,
}

/// Aggregate over all workers. Owned by the dispatcher, shared by reference.
#[derive(Debug, Default)]
pub struct RunSummary {
    counts: Mutex<Counts>,
    elapsed: Mutex<Duration>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    fn counts(&self) -> std::sync::MutexGuard<'_, Counts> {
        // a worker panicking mid-update can only have bumped one counter
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, outcome: &FileOutcome) {
        let mut counts = self.counts();
        match outcome {
            FileOutcome::Moved { action, .. } => {
                *counts.moved.entry(action.clone()).or_default() += 1;
            }
            FileOutcome::Unmapped { .. } => counts.unmapped += 1,
            FileOutcome::Vanished => counts.vanished += 1,
            FileOutcome::Failed(kind) => *counts.failed.entry(*kind).or_default() += 1,
        }
    }

    pub fn record_not_processed(&self, n: usize) {
        self.counts().not_processed += n;
    }

    pub fn set_elapsed(&self, elapsed: Duration) {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner()) = elapsed;
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn moved(&self, action: &str) -> usize {
        self.counts().moved.get(action).copied().unwrap_or(0)
    }

    pub fn moved_total(&self) -> usize {
        self.counts().moved.values().sum()
    }

    pub fn unmapped(&self) -> usize {
        self.counts().unmapped
    }

    pub fn vanished(&self) -> usize {
        self.counts().vanished
    }

    pub fn failed(&self) -> usize {
        self.counts().failed.values().sum()
    }

    pub fn failed_kind(&self, kind: FailureKind) -> usize {
        self.counts().failed.get(&kind).copied().unwrap_or(0)
    }

    pub fn not_processed(&self) -> usize {
        self.counts().not_processed
    }

    pub fn processed(&self) -> usize {
        let c = self.counts();
        c.moved.values().sum::<usize>() + c.unmapped + c.vanished + c.failed.values().sum::<usize>()
    }

    /// Same counters, ignoring elapsed time.
    pub fn same_counts(&self, other: &RunSummary) -> bool {
        *self.counts() == *other.counts()
    }

    /// 4 if interrupted with work left, else 3 if anything failed, else 0.
    pub fn exit_status(&self) -> u8 {
        let c = self.counts();
        if c.not_processed > 0 {
            EXIT_INTERRUPTED
        } else if !c.failed.is_empty() {
            EXIT_FAILURES
        } else {
            EXIT_OK
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    /// Multi-line report for the end of a run.
    pub fn report(&self) -> String {
        let mut out = format!("{self}\n");
        out.push_str(&format!("  processed: {}\n", self.processed()));
        let c = self.counts();
        for kind in FailureKind::ALL {
            if let Some(n) = c.failed.get(&kind) {
                out.push_str(&format!("  failed ({kind}): {n}\n"));
            }
        }
        out.push_str(&format!("  elapsed: {:.3}s\n", self.elapsed().as_secs_f64()));
        out
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.counts();
        f.write_str("{")?;
        for (action, n) in &c.moved {
            write!(f, "{action}:{n}, ")?;
        }
        write!(
            f,
            "unmapped:{}, failed:{}",
            c.unmapped,
            c.failed.values().sum::<usize>()
        )?;
        if c.vanished > 0 {
            write!(f, ", vanished:{}", c.vanished)?;
        }
        if c.not_processed > 0 {
            write!(f, ", not processed:{}", c.not_processed)?;
        }
        f.write_str("}")
    }
}

#[test]
fn test_display() {
    let summary = RunSummary::new();
    assert_eq!(summary.to_string(), "{unmapped:0, failed:0}");
    for action in ["reject", "greylist"] {
        summary.record(&FileOutcome::Moved {
            action: action.to_string(),
            destination: PathBuf::from("/d"),
        });
    }
    summary.record(&FileOutcome::Unmapped {
        action: "no action".to_string(),
    });
    assert_eq!(
        summary.to_string(),
        "{greylist:1, reject:1, unmapped:1, failed:0}"
    );
    summary.record(&FileOutcome::Vanished);
    summary.record(&FileOutcome::Failed(FailureKind::MoveError));
    summary.record_not_processed(2);
    assert_eq!(
        summary.to_string(),
        "{greylist:1, reject:1, unmapped:1, failed:1, vanished:1, not processed:2}"
    );
    let report = summary.report();
    assert!(report.contains("  processed: 5\n"));
    assert!(report.contains("failed (move error): 1"));
    assert_eq!(summary.processed(), 5);
}

#[test]
fn test_exit_status() {
    let summary = RunSummary::new();
    summary.record(&FileOutcome::Unmapped {
        action: "no action".to_string(),
    });
    summary.record(&FileOutcome::Vanished);
    assert_eq!(summary.exit_status(), EXIT_OK);
    summary.record(&FileOutcome::Failed(FailureKind::ClassifierTimeout));
    assert_eq!(summary.exit_status(), EXIT_FAILURES);
    summary.record_not_processed(1);
    assert_eq!(summary.exit_status(), EXIT_INTERRUPTED);
}

#[test]
fn test_concurrent_record() {
    let summary = RunSummary::new();
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..1000 {
                    summary.record(&FileOutcome::Moved {
                        action: "reject".to_string(),
                        destination: PathBuf::from("/d"),
                    });
                    summary.record(&FileOutcome::Failed(FailureKind::ClassifierError));
                }
            });
        }
    });
    assert_eq!(summary.moved("reject"), 8000);
    assert_eq!(summary.failed_kind(FailureKind::ClassifierError), 8000);
}
