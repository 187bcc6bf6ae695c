//! Directory tree hashing and copying
//!
//! Both walks visit entries sorted by file name and skip any entry whose
//! name appears in the ignore list, so the hash of a tree always describes
//! exactly what a copy of it would contain.

use crate::error::{SlipwayError, SlipwayResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

fn walker<'a>(root: &Path, ignore: &'a [String]) -> impl Iterator<Item = walkdir::Result<DirEntry>> + 'a {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| {
            e.depth() == 0
                || e.file_name()
                    .to_str()
                    .map(|name| !ignore.iter().any(|i| i == name))
                    .unwrap_or(true)
        })
}

fn walk_error(root: &Path, e: walkdir::Error) -> SlipwayError {
    let context = format!("walking {}", root.display());
    match e.into_io_error() {
        Some(io) => SlipwayError::io(context, io),
        None => SlipwayError::Internal(format!("{context}: filesystem loop")),
    }
}

/// SHA256 of a single file's contents
pub fn hash_file(path: &Path) -> SlipwayResult<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| SlipwayError::io(format!("opening {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| SlipwayError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

/// Deterministic hash of a directory's contents.
///
/// Covers relative paths, file contents, the executable bit and symlink
/// targets. Timestamps and ownership are not part of the hash.
pub fn hash_tree(root: &Path, ignore: &[String]) -> SlipwayResult<String> {
    let mut hasher = Sha256::new();

    for entry in walker(root, ignore) {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.depth() == 0 {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();

        let file_type = entry.file_type();
        let record = if file_type.is_symlink() {
            let target = fs::read_link(entry.path())
                .map_err(|e| SlipwayError::io(format!("reading link {}", entry.path().display()), e))?;
            format!("L:{}:{}\n", rel, target.display())
        } else if file_type.is_dir() {
            format!("D:{}\n", rel)
        } else {
            let meta = entry
                .metadata()
                .map_err(|e| walk_error(root, e))?;
            let exec = if is_executable(&meta) { "x" } else { "-" };
            format!("F:{}:{}:{}\n", rel, exec, hash_file(entry.path())?)
        };
        hasher.update(record.as_bytes());
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Copy a directory tree onto `dest`, returning the number of bytes copied.
///
/// Existing entries under `dest` are replaced, which is how later layers
/// shadow earlier ones when an image is materialised. An entry of a
/// different type is removed first, so a directory can replace a file and
/// a file can replace a directory.
pub fn copy_tree(src: &Path, dest: &Path, ignore: &[String]) -> SlipwayResult<u64> {
    fs::create_dir_all(dest)
        .map_err(|e| SlipwayError::io(format!("creating {}", dest.display()), e))?;

    let mut bytes = 0u64;
    for entry in walker(src, ignore) {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        if entry.depth() == 0 {
            continue;
        }
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if fs::symlink_metadata(&target).is_ok_and(|meta| !meta.is_dir()) {
                remove_existing(&target)?;
            }
            fs::create_dir_all(&target)
                .map_err(|e| SlipwayError::io(format!("creating {}", target.display()), e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            remove_existing(&target)?;
            bytes += fs::copy(entry.path(), &target).map_err(|e| {
                SlipwayError::io(
                    format!("copying {} to {}", entry.path().display(), target.display()),
                    e,
                )
            })?;
        }
    }
    Ok(bytes)
}

/// Copy a single file into `dest_dir`, keeping its file name
pub fn copy_file_into(src: &Path, dest_dir: &Path) -> SlipwayResult<u64> {
    let name = src.file_name().ok_or_else(|| SlipwayError::PathInvalid {
        path: src.to_path_buf(),
        reason: "no file name".to_string(),
    })?;
    fs::create_dir_all(dest_dir)
        .map_err(|e| SlipwayError::io(format!("creating {}", dest_dir.display()), e))?;
    let target = dest_dir.join(name);
    fs::copy(src, &target).map_err(|e| {
        SlipwayError::io(format!("copying {} to {}", src.display(), target.display()), e)
    })
}

/// Total size of the regular files under `root`
pub fn tree_size(root: &Path) -> SlipwayResult<u64> {
    let mut total = 0;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(|e| walk_error(root, e))?.len();
        }
    }
    Ok(total)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> SlipwayResult<()> {
    let link = fs::read_link(src)
        .map_err(|e| SlipwayError::io(format!("reading link {}", src.display()), e))?;
    remove_existing(target)?;
    std::os::unix::fs::symlink(&link, target)
        .map_err(|e| SlipwayError::io(format!("creating link {}", target.display()), e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, target: &Path) -> SlipwayResult<()> {
    fs::copy(src, target)
        .map(|_| ())
        .map_err(|e| SlipwayError::io(format!("copying {}", src.display()), e))
}

fn remove_existing(target: &Path) -> SlipwayResult<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(target),
        Ok(_) => fs::remove_file(target),
        Err(_) => return Ok(()),
    }
    .map_err(|e| SlipwayError::io(format!("replacing {}", target.display()), e))
}

/// Map an absolute in-image path onto a host directory.
///
/// Rejects relative paths and any `..` component so a layer can never
/// write outside its own delta.
pub fn image_path(root: &Path, image_path: &str) -> SlipwayResult<PathBuf> {
    let path = Path::new(image_path);
    if !path.is_absolute() {
        return Err(SlipwayError::PathInvalid {
            path: path.to_path_buf(),
            reason: "image paths must be absolute".to_string(),
        });
    }

    let mut mapped = root.to_path_buf();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => mapped.push(part),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(SlipwayError::PathInvalid {
                    path: path.to_path_buf(),
                    reason: "image paths may not contain '..'".to_string(),
                })
            }
        }
    }
    Ok(mapped)
}

/// Run blocking filesystem work off the async executor
pub async fn run_blocking<T, F>(f: F) -> SlipwayResult<T>
where
    F: FnOnce() -> SlipwayResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SlipwayError::Internal(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.py"), "app = None\n").unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg").join("mod.py"), "x = 1\n").unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), "ref").unwrap();
        dir
    }

    fn ignore() -> Vec<String> {
        vec![".git".to_string()]
    }

    #[test]
    fn hash_is_stable() {
        let dir = fixture();
        let a = hash_tree(dir.path(), &ignore()).unwrap();
        let b = hash_tree(dir.path(), &ignore()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_tracks_content() {
        let dir = fixture();
        let before = hash_tree(dir.path(), &ignore()).unwrap();
        fs::write(dir.path().join("pkg").join("mod.py"), "x = 2\n").unwrap();
        let after = hash_tree(dir.path(), &ignore()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn ignored_entries_do_not_affect_hash() {
        let dir = fixture();
        let before = hash_tree(dir.path(), &ignore()).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), "other").unwrap();
        let after = hash_tree(dir.path(), &ignore()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn copy_skips_ignored() {
        let src = fixture();
        let dest = TempDir::new().unwrap();
        let bytes = copy_tree(src.path(), dest.path(), &ignore()).unwrap();

        assert!(bytes > 0);
        assert!(dest.path().join("app.py").is_file());
        assert!(dest.path().join("pkg").join("mod.py").is_file());
        assert!(!dest.path().join(".git").exists());
        assert_eq!(
            hash_tree(src.path(), &ignore()).unwrap(),
            hash_tree(dest.path(), &[]).unwrap()
        );
    }

    #[test]
    fn copy_overwrites_existing() {
        let src = fixture();
        let dest = TempDir::new().unwrap();
        fs::write(dest.path().join("app.py"), "old").unwrap();
        copy_tree(src.path(), dest.path(), &ignore()).unwrap();
        assert_eq!(fs::read_to_string(dest.path().join("app.py")).unwrap(), "app = None\n");
    }

    #[test]
    fn copy_replaces_entries_of_another_type() {
        let lower = TempDir::new().unwrap();
        fs::write(lower.path().join("pkg"), "was a file").unwrap();
        fs::create_dir_all(lower.path().join("app.py")).unwrap();
        fs::write(lower.path().join("app.py").join("old.py"), "").unwrap();

        let upper = fixture();
        copy_tree(upper.path(), lower.path(), &ignore()).unwrap();

        assert!(lower.path().join("pkg").join("mod.py").is_file());
        assert_eq!(
            fs::read_to_string(lower.path().join("app.py")).unwrap(),
            "app = None\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn directory_replaces_symlink() {
        let elsewhere = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), dest.path().join("pkg")).unwrap();

        copy_tree(fixture().path(), dest.path(), &ignore()).unwrap();

        assert!(!fs::symlink_metadata(dest.path().join("pkg")).unwrap().is_symlink());
        assert!(dest.path().join("pkg").join("mod.py").is_file());
        assert!(!elsewhere.path().join("mod.py").exists());
    }

    #[test]
    fn image_path_maps_absolute() {
        let root = Path::new("/store/diff");
        assert_eq!(image_path(root, "/app").unwrap(), PathBuf::from("/store/diff/app"));
        assert_eq!(
            image_path(root, "/srv/./web").unwrap(),
            PathBuf::from("/store/diff/srv/web")
        );
    }

    #[test]
    fn image_path_rejects_escape() {
        let root = Path::new("/store/diff");
        assert!(image_path(root, "app").is_err());
        assert!(image_path(root, "/app/../../etc").is_err());
    }
}
