use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    Directory(&'a Path),
    Unmapped,
}

/// Action label to destination directory, fixed for the run.
#[derive(Debug, Default, Clone)]
pub struct ActionMap {
    dirs: HashMap<String, PathBuf>,
    others: Option<PathBuf>,
}

impl ActionMap {
    pub fn new<I>(pairs: I, others: Option<PathBuf>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        let mut dirs = HashMap::new();
        for (action, dir) in pairs {
            if dirs.contains_key(&action) {
                return Err(ConfigError::DuplicateAction(action));
            }
            dirs.insert(action, dir);
        }
        Ok(ActionMap { dirs, others })
    }

    /// Exact, case sensitive match on the label as rspamc printed it.
    pub fn route(&self, action: &str) -> Destination<'_> {
        match self.dirs.get(action).or(self.others.as_ref()) {
            Some(dir) => Destination::Directory(dir),
            None => Destination::Unmapped,
        }
    }

    fn all_dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.dirs.values().chain(self.others.iter())
    }

    /// Destinations must already exist, we never create them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.all_dirs().find(|dir| !dir.is_dir()) {
            Some(dir) => Err(ConfigError::NotADirectory(dir.clone())),
            None => Ok(()),
        }
    }

    pub fn contains_dir(&self, path: &Path) -> bool {
        let canonical = path.canonicalize().ok();
        self.all_dirs().any(|dir| {
            dir == path || (canonical.is_some() && dir.canonicalize().ok() == canonical)
        })
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.others.is_none()
    }
}

#[cfg(test)]
fn pairs(p: &[(&str, &str)]) -> Vec<(String, PathBuf)> {
    p.iter()
        .map(|(a, d)| (a.to_string(), PathBuf::from(d)))
        .collect()
}

#[test]
fn test_route() {
    let map = ActionMap::new(pairs(&[("reject", "/a"), ("add header", "/b")]), None).unwrap();
    assert_eq!(map.route("reject"), Destination::Directory(Path::new("/a")));
    assert_eq!(map.route("add header"), Destination::Directory(Path::new("/b")));
    assert_eq!(map.route("Reject"), Destination::Unmapped);
    assert_eq!(map.route("add  header"), Destination::Unmapped);
    assert_eq!(map.route("no action"), Destination::Unmapped);
}

#[test]
fn test_route_others() {
    let map = ActionMap::new(pairs(&[("reject", "/a")]), Some(PathBuf::from("/o"))).unwrap();
    assert_eq!(map.route("reject"), Destination::Directory(Path::new("/a")));
    assert_eq!(map.route("greylist"), Destination::Directory(Path::new("/o")));
}

#[test]
fn test_duplicate_action() {
    let r = ActionMap::new(pairs(&[("reject", "/a"), ("reject", "/b")]), None);
    assert!(matches!(r, Err(ConfigError::DuplicateAction(a)) if a == "reject"));
}

#[test]
fn test_validate() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().to_path_buf();
    let map = ActionMap::new([("reject".to_string(), good.clone())], None).unwrap();
    map.validate().unwrap();
    assert!(map.contains_dir(&good));
    assert!(!map.contains_dir(Path::new("/")));

    let missing = good.join("missing");
    let map = ActionMap::new([("reject".to_string(), good)], Some(missing.clone())).unwrap();
    assert!(matches!(map.validate(), Err(ConfigError::NotADirectory(d)) if d == missing));
}
