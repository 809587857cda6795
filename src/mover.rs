use crate::error::MoveError;
use nix::libc;
use std::fs::{self, File, FileTimes, Metadata, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::debug;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> MoveError + '_ {
    move |source| MoveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Errors from `link(2)` that mean "try copying instead".
fn needs_copy(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EXDEV) | Some(libc::EPERM) | Some(libc::ENOTSUP) | Some(libc::EMLINK)
    )
}

/// Move `source` into `dest_dir`, keeping its file name. Never overwrites.
///
/// On one filesystem this is link + unlink, so a name clash is detected by
/// the kernel instead of raced. Across filesystems the content is copied into
/// a freshly created file, synced and size checked before the source goes.
/// On error the source is left where it was.
pub fn move_file(source: &Path, dest_dir: &Path) -> Result<PathBuf, MoveError> {
    if !dest_dir.is_dir() {
        return Err(MoveError::MissingDestination(dest_dir.to_path_buf()));
    }
    let name = source
        .file_name()
        .ok_or_else(|| MoveError::NoFileName(source.to_path_buf()))?;
    let target = dest_dir.join(name);

    match fs::hard_link(source, &target) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(source) {
                let _ = fs::remove_file(&target);
                return Err(io_err(source)(e));
            }
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(MoveError::Collision(target));
        }
        Err(e) if needs_copy(&e) => {
            debug!("{}: link failed ({e}), copying", source.display());
            copy_then_remove(source, &target)?;
        }
        Err(e) if e.kind() == ErrorKind::NotFound && source.exists() => {
            return Err(MoveError::MissingDestination(dest_dir.to_path_buf()));
        }
        Err(e) => return Err(io_err(source)(e)),
    }
    Ok(target)
}

fn copy_then_remove(source: &Path, target: &Path) -> Result<(), MoveError> {
    let mut input = File::open(source).map_err(io_err(source))?;
    let meta = input.metadata().map_err(io_err(source))?;
    let expected = meta.len();
    let mut output = match OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(MoveError::Collision(target.to_path_buf()));
        }
        Err(e) => return Err(io_err(target)(e)),
    };

    let result = io::copy(&mut input, &mut output)
        .and_then(|copied| output.sync_all().map(|_| copied))
        .map_err(io_err(target))
        .and_then(|copied| {
            if copied == expected {
                Ok(())
            } else {
                Err(MoveError::Verify {
                    path: target.to_path_buf(),
                    copied,
                    expected,
                })
            }
        })
        .and_then(|_| copy_metadata(&output, &meta).map_err(io_err(target)))
        .and_then(|_| fs::remove_file(source).map_err(io_err(source)));
    if result.is_err() {
        drop(output);
        let _ = fs::remove_file(target);
    }
    result
}

/// Maildir readers take the received date from the mtime, so it has to survive.
fn copy_metadata(output: &File, meta: &Metadata) -> io::Result<()> {
    output.set_permissions(meta.permissions())?;
    output.set_times(
        FileTimes::new()
            .set_accessed(meta.accessed()?)
            .set_modified(meta.modified()?),
    )
}

#[test]
fn test_move_keeps_name() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let name = "1596097522.M1P2.host,S=1234:2,S";
    let path = src.path().join(name);
    fs::write(&path, b"message").unwrap();

    let target = move_file(&path, dst.path()).unwrap();
    assert_eq!(target, dst.path().join(name));
    assert_eq!(fs::read(&target).unwrap(), b"message");
    assert!(!path.exists());
}

#[test]
fn test_move_collision() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let path = src.path().join("m1");
    fs::write(&path, b"new").unwrap();
    fs::write(dst.path().join("m1"), b"old").unwrap();

    let err = move_file(&path, dst.path()).unwrap_err();
    assert!(matches!(err, MoveError::Collision(_)));
    assert_eq!(fs::read(&path).unwrap(), b"new");
    assert_eq!(fs::read(dst.path().join("m1")).unwrap(), b"old");
}

#[test]
fn test_move_missing_destination() {
    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("m1");
    fs::write(&path, b"x").unwrap();

    let err = move_file(&path, &src.path().join("nope")).unwrap_err();
    assert!(matches!(err, MoveError::MissingDestination(_)));
    assert!(path.exists());
}

#[test]
fn test_copy_then_remove() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let path = src.path().join("m1");
    fs::write(&path, b"copied content").unwrap();
    let target = dst.path().join("m1");

    copy_then_remove(&path, &target).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"copied content");
    assert!(!path.exists());

    fs::write(&path, b"again").unwrap();
    let err = copy_then_remove(&path, &target).unwrap_err();
    assert!(matches!(err, MoveError::Collision(_)));
    assert!(path.exists());
}

#[test]
fn test_copy_keeps_mtime_and_mode() {
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, SystemTime};

    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let path = src.path().join("1596097522.M1P2.host:2,S");
    fs::write(&path, b"old mail").unwrap();
    let received = SystemTime::UNIX_EPOCH + Duration::from_secs(1596097522);
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_times(FileTimes::new().set_accessed(received).set_modified(received))
        .unwrap();
    file.set_permissions(fs::Permissions::from_mode(0o640)).unwrap();
    drop(file);
    let target = dst.path().join("1596097522.M1P2.host:2,S");

    copy_then_remove(&path, &target).unwrap();

    let meta = fs::metadata(&target).unwrap();
    assert_eq!(meta.modified().unwrap(), received);
    assert_eq!(meta.permissions().mode() & 0o777, 0o640);
    assert!(!path.exists());
}
