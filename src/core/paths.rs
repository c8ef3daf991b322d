//! Shared path manipulation utilities.

use std::env;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Make a path absolute relative to CWD and resolve `..`/`.` syntactically.
///
/// Symlinks are never followed: the path usually names a directory on a
/// remote host and may not exist locally.
pub fn absolutize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("env reference pattern compiles")
    })
}

/// Expand `$NAME` and `${NAME}` using `lookup`. Unknown names are left as written.
pub fn expand_env_vars_with<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    env_reference()
        .replace_all(raw, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Home directory, or `/tmp` with a warning when `HOME` is unset.
pub fn home_dir_or_tmp(purpose: &str) -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[TCF-CONFIG] WARNING: HOME not set, falling back to /tmp for {purpose}");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}
