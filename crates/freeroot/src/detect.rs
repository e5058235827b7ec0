//! Host binary lookup for `tar` and `proot`.

use std::path::{Path, PathBuf};

/// Fallback locations for `tar` when PATH is minimal.
pub const TAR_FALLBACKS: &[&str] = &["/usr/bin/tar", "/bin/tar", "/usr/local/bin/tar"];

/// Resolve a binary name to an absolute path.
///
/// Search order:
/// 1. An absolute path is returned if it is an executable file
/// 2. PATH, via `which`
/// 3. `fallbacks`, first executable wins
pub fn resolve_binary(name: &str, fallbacks: &[&str]) -> Option<PathBuf> {
    let path = Path::new(name);

    if path.is_absolute() {
        return is_executable(path).then(|| path.to_path_buf());
    }

    if let Ok(path) = which::which(name) {
        return Some(path);
    }

    fallbacks
        .iter()
        .map(Path::new)
        .find(|p| is_executable(p))
        .map(Path::to_path_buf)
}

/// Regular file with any execute bit set.
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Resolve a binary from an environment variable.
///
/// A file is returned directly. A directory is searched for `bin/<bin_name>`
/// and then `<bin_name>`.
pub fn resolve_from_env(env_var: &str, bin_name: &str) -> Option<PathBuf> {
    let value = std::env::var_os(env_var)?;
    resolve_in(Path::new(&value), bin_name)
}

fn resolve_in(path: &Path, bin_name: &str) -> Option<PathBuf> {
    if is_executable(path) {
        return Some(path.to_path_buf());
    }

    if path.is_dir() {
        return [path.join("bin").join(bin_name), path.join(bin_name)]
            .into_iter()
            .find(|p| is_executable(p));
    }

    None
}

/// Host `tar` used for extraction.
pub fn resolve_tar() -> Option<PathBuf> {
    resolve_binary("tar", TAR_FALLBACKS)
}
