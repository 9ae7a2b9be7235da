//! Logical path resolution.
//!
//! Clients address resources with logical paths such as
//! `local/users/h/hugo/photos`. Every identity owns exactly one home subtree
//! (`local/users/<first letter>/<pid>`) and may only mutate resources inside
//! it. Logical paths are translated to physical paths by joining them onto
//! the service data root; physical paths never leave the service.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::{Identity, HOME_NAMESPACE};

/// Path resolution errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// Identity has an empty principal id
    #[error("Principal id must not be empty")]
    EmptyPrincipal,

    /// Principal id cannot be used as a path segment
    #[error("Invalid principal id: {0:?}")]
    InvalidPrincipal(String),

    /// Physical path is not below the data root
    #[error("Path is outside the data root: {0}")]
    OutsideDataRoot(String),

    /// Physical path is not valid UTF-8
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8(String),
}

/// How strictly a path must sit under a home to count as confined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Confinement {
    /// Plain string prefix match on cleaned paths.
    ///
    /// `local/users/b/bob2` counts as under `local/users/b/bob`.
    #[default]
    Prefix,
    /// The home must be followed by a separator or the end of the path.
    Strict,
}

impl std::str::FromStr for Confinement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prefix" => Ok(Confinement::Prefix),
            "strict" => Ok(Confinement::Strict),
            other => Err(format!("unknown confinement mode {:?}", other)),
        }
    }
}

impl std::fmt::Display for Confinement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confinement::Prefix => write!(f, "prefix"),
            Confinement::Strict => write!(f, "strict"),
        }
    }
}

/// How a path relates to the identity looking at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Inside the caller's home
    Own,
    /// A namespace ancestor shared by every home
    Common,
    /// Inside some other identity's home
    Foreign,
    /// Not part of the home hierarchy
    Outside,
}

/// Cleans a logical path.
///
/// Removes empty and `.` segments, resolves `..` lexically (never above the
/// root) and drops leading and trailing separators. The root cleans to `""`.
pub fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Returns the logical home path of `identity`.
pub fn home(identity: &Identity) -> Result<String, PathError> {
    let pid = identity.pid.as_str();

    let first = pid.chars().next().ok_or(PathError::EmptyPrincipal)?;
    if pid.contains('/') || pid == "." || pid == ".." {
        return Err(PathError::InvalidPrincipal(pid.to_string()));
    }

    Ok(format!("{}/{}/{}", HOME_NAMESPACE, first, pid))
}

/// Returns true if the cleaned `path` lies under the home of `identity`.
pub fn is_under_home(
    path: &str,
    identity: &Identity,
    confinement: Confinement,
) -> Result<bool, PathError> {
    let path = clean(path);
    let home = home(identity)?;

    Ok(match confinement {
        Confinement::Prefix => path.starts_with(&home),
        Confinement::Strict => match path.strip_prefix(&home) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        },
    })
}

/// Returns true for `""`, `local`, `local/users` and `local/users/<letter>`.
fn is_common(path: &str) -> bool {
    if path.is_empty()
        || (HOME_NAMESPACE.starts_with(path) && is_segment_prefix(HOME_NAMESPACE, path))
    {
        return true;
    }
    match path.strip_prefix(HOME_NAMESPACE) {
        Some(rest) => match rest.strip_prefix('/') {
            Some(letter) => !letter.is_empty() && !letter.contains('/'),
            None => rest.is_empty(),
        },
        None => false,
    }
}

/// Returns true if `prefix` ends on a segment boundary of `path`.
fn is_segment_prefix(path: &str, prefix: &str) -> bool {
    path.len() == prefix.len() || path.as_bytes().get(prefix.len()) == Some(&b'/')
}

/// Translates between logical and physical paths and applies confinement.
#[derive(Debug, Clone)]
pub struct PathResolver {
    data_root: PathBuf,
    confinement: Confinement,
}

impl PathResolver {
    /// Creates a resolver rooted at `data_root`.
    pub fn new(data_root: impl Into<PathBuf>, confinement: Confinement) -> Self {
        Self {
            data_root: data_root.into(),
            confinement,
        }
    }

    /// Returns the data root.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Returns the confinement mode.
    pub fn confinement(&self) -> Confinement {
        self.confinement
    }

    /// Joins the cleaned logical path onto the data root.
    pub fn to_physical(&self, logical: &str) -> PathBuf {
        let logical = clean(logical);
        if logical.is_empty() {
            self.data_root.clone()
        } else {
            self.data_root.join(logical)
        }
    }

    /// Strips the data root from a physical path.
    pub fn to_logical(&self, physical: &Path) -> Result<String, PathError> {
        let rest = physical
            .strip_prefix(&self.data_root)
            .map_err(|_| PathError::OutsideDataRoot(physical.display().to_string()))?;

        let mut segments = Vec::new();
        for component in rest.components() {
            match component {
                Component::Normal(s) => segments.push(
                    s.to_str()
                        .ok_or_else(|| PathError::NonUtf8(physical.display().to_string()))?,
                ),
                Component::ParentDir => segments.push(".."),
                _ => {}
            }
        }

        Ok(clean(&segments.join("/")))
    }

    /// Returns true if `path` is confined under the home of `identity`.
    pub fn is_under_home(&self, path: &str, identity: &Identity) -> Result<bool, PathError> {
        is_under_home(path, identity, self.confinement)
    }

    /// Classifies `path` for read access by `identity`.
    pub fn visibility(&self, path: &str, identity: &Identity) -> Result<Visibility, PathError> {
        let path = clean(path);

        if is_common(&path) {
            return Ok(Visibility::Common);
        }
        if self.is_under_home(&path, identity)? {
            return Ok(Visibility::Own);
        }

        let in_namespace = path
            .strip_prefix(HOME_NAMESPACE)
            .and_then(|rest| rest.strip_prefix('/'))
            .map_or(false, |rest| rest.contains('/'));

        Ok(if in_namespace {
            Visibility::Foreign
        } else {
            Visibility::Outside
        })
    }
}
