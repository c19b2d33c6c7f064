use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path contains unsupported component")]
    UnsupportedComponent,
    #[error("{path} is outside the local mirror {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("local path is not valid UTF-8: {0}")]
    NonUtf8(PathBuf),
}

/// Where a FileStation path (`/photo/2024/a.jpg`) lives under the local mirror.
pub fn local_path_for(local_root: &Path, remote_path: &str) -> Result<PathBuf, PathError> {
    if remote_path.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = local_root.to_path_buf();
    for component in Path::new(remote_path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir => continue,
            Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    Ok(out)
}

/// SFTP destination for a mirrored file: its path relative to `local_root`,
/// re-rooted under `remote_root` with `/` separators.
pub fn remote_path_for(
    local_root: &Path,
    remote_root: &str,
    local_path: &Path,
) -> Result<String, PathError> {
    let relative = local_path
        .strip_prefix(local_root)
        .map_err(|_| PathError::OutsideRoot {
            path: local_path.to_path_buf(),
            root: local_root.to_path_buf(),
        })?;

    let mut out = remote_root.trim_end_matches('/').to_string();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return Err(PathError::UnsupportedComponent);
        };
        let part = part
            .to_str()
            .ok_or_else(|| PathError::NonUtf8(local_path.to_path_buf()))?;
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}
