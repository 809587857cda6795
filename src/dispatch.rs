use crate::classifier::Classifier;
use crate::error::{FailureKind, ProcessError};
use crate::mover::move_file;
use crate::router::{ActionMap, Destination};
use crate::summary::{FileOutcome, RunSummary};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const DEFAULT_THREADS: usize = 16;

/// Result of walking the inputs: message files plus paths that could not be read.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub files: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, io::Error)>,
}

fn sorted_entries(dir: &Path, out: &mut Enumeration) -> Option<Vec<PathBuf>> {
    match fs::read_dir(dir).and_then(|rd| rd.collect::<io::Result<Vec<_>>>()) {
        Ok(entries) => {
            let mut paths: Vec<PathBuf> = entries.into_iter().map(|e| e.path()).collect();
            paths.sort();
            Some(paths)
        }
        Err(e) => {
            out.errors.push((dir.to_path_buf(), e));
            None
        }
    }
}

fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.as_encoded_bytes().starts_with(b"."))
}

fn is_maildir(dir: &Path) -> bool {
    dir.join("cur").is_dir() || dir.join("new").is_dir()
}

/// Messages of one maildir live in `cur` and `new` only. Index files,
/// `maildirfolder` and `.Subfolder`s next to them are not ours to touch.
fn walk_maildir(dir: &Path, action_map: &ActionMap, out: &mut Enumeration) {
    for sub in ["cur", "new"] {
        let sub = dir.join(sub);
        if !sub.is_dir() {
            continue;
        }
        if action_map.contains_dir(&sub) {
            debug!("skipping destination {}", sub.display());
            continue;
        }
        for path in sorted_entries(&sub, out).unwrap_or_default() {
            if path.is_file() && !is_dotfile(&path) {
                out.files.push(path);
            }
        }
    }
}

fn walk(dir: &Path, action_map: &ActionMap, out: &mut Enumeration) {
    if is_maildir(dir) {
        walk_maildir(dir, action_map, out);
        return;
    }
    let Some(paths) = sorted_entries(dir, out) else {
        return;
    };
    for path in paths {
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "tmp") {
                debug!("skipping maildir tmp {}", path.display());
            } else if action_map.contains_dir(&path) {
                debug!("skipping destination {}", path.display());
            } else {
                walk(&path, action_map, out);
            }
        } else if path.is_file() && !is_dotfile(&path) {
            out.files.push(path);
        }
    }
}

/// Collect message files below `roots`, each at most once.
///
/// A file root is taken as is. A maildir yields the files in its `cur` and
/// `new`; any other directory is walked for loose files and nested
/// maildirs. Directories are listed before anything is moved, so a
/// destination inside an input directory cannot make us loop; destinations
/// and `tmp` folders are skipped all the same. Overlapping roots such as
/// `Maildir` and `Maildir/cur` name the same files twice; the duplicates
/// are dropped by canonical path.
pub fn enumerate(roots: &[PathBuf], action_map: &ActionMap) -> Enumeration {
    let mut out = Enumeration::default();
    for root in roots {
        if root.is_dir() {
            walk(root, action_map, &mut out);
        } else {
            out.files.push(root.clone());
        }
    }
    let mut seen = BTreeSet::new();
    out.files.retain(|path| {
        let key = path.canonicalize().unwrap_or_else(|_| path.clone());
        let new = seen.insert(key);
        if !new {
            debug!("skipping duplicate {}", path.display());
        }
        new
    });
    out
}

pub struct Dispatcher<'a> {
    pub classifier: &'a dyn Classifier,
    pub action_map: &'a ActionMap,
    pub threads: usize,
    pub dry_run: bool,
}

impl Dispatcher<'_> {
    fn process(&self, path: &Path) -> Result<FileOutcome, ProcessError> {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("file vanished, ignoring: {}", path.display());
                return Ok(FileOutcome::Vanished);
            }
            Err(e) => return Err(ProcessError::Read(e)),
        };
        let verdict = self.classifier.classify(path, &content)?;
        let filename = path.file_name().unwrap_or(path.as_os_str()).to_string_lossy();
        let dry_run_msg = if self.dry_run { " (dry run)" } else { "" };
        match self.action_map.route(&verdict.action) {
            Destination::Unmapped => {
                info!("{filename} -> {} -> not moved", verdict.action);
                Ok(FileOutcome::Unmapped {
                    action: verdict.action,
                })
            }
            Destination::Directory(dir) => {
                info!(
                    "{filename} -> {} -> {}{dry_run_msg}",
                    verdict.action,
                    dir.display()
                );
                let destination = if self.dry_run {
                    dir.join(path.file_name().unwrap_or_default())
                } else {
                    move_file(path, dir)?
                };
                Ok(FileOutcome::Moved {
                    action: verdict.action,
                    destination,
                })
            }
        }
    }

    fn process_logged(&self, path: &Path) -> FileOutcome {
        match self.process(path) {
            Ok(outcome) => outcome,
            Err(e) => {
                let kind = e.kind();
                error!("{}: {kind}: {e}", path.display());
                if let ProcessError::Classify(c) = &e
                    && !c.output().is_empty()
                {
                    debug!("{}: classifier output:\n{}", path.display(), c.output());
                }
                FileOutcome::Failed(kind)
            }
        }
    }

    /// Process every file once on a fixed pool of workers.
    ///
    /// Setting `cancel` stops workers from taking new files; whatever is
    /// still queued is counted as not processed and left alone.
    pub fn run(&self, files: Vec<PathBuf>, cancel: &AtomicBool) -> RunSummary {
        let start = Instant::now();
        let summary = RunSummary::new();
        let total = files.len();
        let queue = Mutex::new(VecDeque::from(files));
        let done = AtomicUsize::new(0);
        let workers = self.threads.clamp(1, total.max(1));

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    loop {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                        let Some(path) = next else {
                            break;
                        };
                        let outcome = self.process_logged(&path);
                        summary.record(&outcome);
                        let i = done.fetch_add(1, Ordering::Relaxed) + 1;
                        info!("done {i} of {total}");
                    }
                });
            }
        });

        let left = queue.into_inner().unwrap_or_else(|e| e.into_inner()).len();
        if left > 0 {
            warn!("interrupted, {left} files not processed");
            summary.record_not_processed(left);
        }
        summary.set_elapsed(start.elapsed());
        summary
    }

    /// Enumeration failures count as failed files of their own.
    pub fn run_enumeration(&self, enumeration: Enumeration, cancel: &AtomicBool) -> RunSummary {
        for (path, e) in &enumeration.errors {
            error!("{}: {}: {e}", path.display(), FailureKind::EnumerationError);
        }
        let summary = self.run(enumeration.files, cancel);
        for _ in &enumeration.errors {
            summary.record(&FileOutcome::Failed(FailureKind::EnumerationError));
        }
        summary
    }
}
