pub mod classifier;
pub mod cli;
pub mod dispatch;
pub mod error;
pub mod mover;
pub mod router;
pub mod sender;
pub mod signal;
pub mod summary;
pub mod verdict;

pub use classifier::{Classifier, FnClassifier, Rspamc};
pub use dispatch::{Dispatcher, Enumeration, enumerate};
pub use error::{ClassifyError, ConfigError, FailureKind, MoveError, ProcessError};
pub use router::{ActionMap, Destination};
pub use summary::{FileOutcome, RunSummary};
pub use verdict::Verdict;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

/// Everything a run needs, checked by [`Config::validate`] before any file is touched.
pub struct Config<'a> {
    pub emails: Vec<PathBuf>,
    pub action_map: ActionMap,
    pub classifier: &'a dyn Classifier,
    pub threads: usize,
    pub dry_run: bool,
}

impl Config<'_> {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::NotPositive("--threads"));
        }
        if let Some(missing) = self.emails.iter().find(|p| !p.exists()) {
            return Err(ConfigError::MissingInput(missing.clone()));
        }
        self.action_map.validate()
    }
}

pub fn run(config: &Config, cancel: &AtomicBool) -> Result<RunSummary, ConfigError> {
    config.validate()?;
    debug!("action map: {:?}", config.action_map);
    info!("scanning {:?}", config.emails);
    let enumeration = enumerate(&config.emails, &config.action_map);
    info!("{} files to classify", enumeration.files.len());
    let dispatcher = Dispatcher {
        classifier: config.classifier,
        action_map: &config.action_map,
        threads: config.threads,
        dry_run: config.dry_run,
    };
    Ok(dispatcher.run_enumeration(enumeration, cancel))
}
