use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier failed: {reason}")]
    Failed { reason: String, output: String },
}

impl ClassifyError {
    pub fn failed(reason: impl Into<String>, output: impl Into<String>) -> Self {
        ClassifyError::Failed {
            reason: reason.into(),
            output: output.into(),
        }
    }

    /// Raw classifier output, if any was captured.
    pub fn output(&self) -> &str {
        match self {
            ClassifyError::Timeout(_) => "",
            ClassifyError::Failed { output, .. } => output,
        }
    }
}

#[derive(Error, Debug)]
pub enum MoveError {
    #[error("destination {} does not exist or is not a directory", .0.display())]
    MissingDestination(PathBuf),

    #[error("destination {} already exists", .0.display())]
    Collision(PathBuf),

    #[error("source {} has no file name", .0.display())]
    NoFileName(PathBuf),

    #[error("copy to {} incomplete: {copied} of {expected} bytes", .path.display())]
    Verify {
        path: PathBuf,
        copied: u64,
        expected: u64,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("cannot read message: {0}")]
    Read(#[source] io::Error),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Move(#[from] MoveError),
}

impl ProcessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProcessError::Read(_) => FailureKind::EnumerationError,
            ProcessError::Classify(ClassifyError::Timeout(_)) => FailureKind::ClassifierTimeout,
            ProcessError::Classify(ClassifyError::Failed { .. }) => FailureKind::ClassifierError,
            ProcessError::Move(_) => FailureKind::MoveError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureKind {
    ClassifierTimeout,
    ClassifierError,
    MoveError,
    EnumerationError,
}

impl FailureKind {
    pub const ALL: [FailureKind; 4] = [
        FailureKind::ClassifierTimeout,
        FailureKind::ClassifierError,
        FailureKind::MoveError,
        FailureKind::EnumerationError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ClassifierTimeout => "classifier timeout",
            FailureKind::ClassifierError => "classifier error",
            FailureKind::MoveError => "move error",
            FailureKind::EnumerationError => "enumeration error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal problems detected before any file is processed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("action '{0}' given more than once with --action-to-dir")]
    DuplicateAction(String),

    #[error("directory {} does not exist or is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("input {} does not exist", .0.display())]
    MissingInput(PathBuf),

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

#[test]
fn test_failure_kinds() {
    let e = ProcessError::from(ClassifyError::Timeout(Duration::from_secs(1)));
    assert_eq!(e.kind(), FailureKind::ClassifierTimeout);
    let e = ProcessError::from(ClassifyError::failed("exit status 1", "boom"));
    assert_eq!(e.kind(), FailureKind::ClassifierError);
    let e = ProcessError::from(MoveError::Collision(PathBuf::from("/x/y")));
    assert_eq!(e.kind(), FailureKind::MoveError);
    let e = ProcessError::Read(io::Error::from(io::ErrorKind::PermissionDenied));
    assert_eq!(e.kind(), FailureKind::EnumerationError);
}
