/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::config::{CaseSensitivity, Config, Flavor};
use crate::error::{FsError, FsResult};

/// Path syntax shared by every path of one filesystem instance: flavor,
/// separator, case rule and forbidden set. Paths keep an `Arc` to it so they
/// stay renderable and comparable after the filesystem is closed.
#[derive(Debug)]
pub(crate) struct PathStyle {
    pub(crate) fs_id: u64,
    pub(crate) flavor: Flavor,
    pub(crate) separator: char,
    pub(crate) case: CaseSensitivity,
    pub(crate) forbidden: Vec<char>,
    /// Root display for the single-root flavors; `None` for Windows where
    /// the root comes from the drive prefix of each path.
    pub(crate) single_root: Option<String>,
}

impl PathStyle {
    pub(crate) fn from_config(fs_id: u64, config: &Config) -> Self {
        let single_root = match config.flavor {
            Flavor::Windows => None,
            Flavor::Posix | Flavor::Custom => Some(config.roots[0].clone()),
        };
        PathStyle {
            fs_id,
            flavor: config.flavor,
            separator: config.default_name_separator,
            case: config.case_sensitivity,
            forbidden: config.forbidden_characters.clone(),
            single_root,
        }
    }

    /// Case-folds a name for comparison and hashing.
    pub(crate) fn fold(&self, name: &str) -> String {
        match self.case {
            CaseSensitivity::Sensitive => name.to_owned(),
            CaseSensitivity::InsensitiveAscii => name.to_ascii_lowercase(),
            CaseSensitivity::InsensitiveUnicode => name.to_lowercase(),
        }
    }

    pub(crate) fn names_equal(&self, left: &str, right: &str) -> bool {
        match self.case {
            CaseSensitivity::Sensitive => left == right,
            CaseSensitivity::InsensitiveAscii => left.eq_ignore_ascii_case(right),
            CaseSensitivity::InsensitiveUnicode => left.to_lowercase() == right.to_lowercase(),
        }
    }

    fn is_separator(&self, ch: char) -> bool {
        // Windows accepts '/' as an input alias for '\'.
        ch == self.separator || (self.flavor == Flavor::Windows && ch == '/')
    }

    fn check_component(&self, component: &str, input: &str) -> FsResult<()> {
        if component == "." || component == ".." {
            return Ok(());
        }
        if component.chars().any(|ch| self.forbidden.contains(&ch)) {
            return Err(FsError::InvalidPath(input.to_owned()));
        }
        Ok(())
    }
}

/// Canonical root key used to address a root's entry tree. Drive letters
/// compare case-insensitively regardless of the component case rule.
pub(crate) fn root_key(flavor: Flavor, display: &str) -> String {
    match flavor {
        Flavor::Windows => display.to_ascii_lowercase(),
        Flavor::Posix | Flavor::Custom => display.to_owned(),
    }
}

/// A parsed path, bound to the filesystem that produced it.
///
/// Absolute paths carry a root in its original casing; components keep the
/// casing they were written with. Equality, ordering and hashing fold per
/// the filesystem's case rule.
#[derive(Debug, Clone)]
pub struct FsPath {
    pub(crate) style: Arc<PathStyle>,
    pub(crate) root: Option<String>,
    pub(crate) components: Vec<String>,
}

impl FsPath {
    /// Parses `input` under `style`. Empty input yields an empty relative
    /// path; separators collapse; components are validated against the
    /// forbidden set.
    pub(crate) fn parse(style: &Arc<PathStyle>, input: &str) -> FsResult<FsPath> {
        let (root, rest) = match style.flavor {
            Flavor::Windows => split_drive_root(style, input)?,
            Flavor::Posix | Flavor::Custom => {
                if let Some(stripped) = input.strip_prefix(style.separator) {
                    (
                        Some(style.single_root.clone().unwrap_or_else(|| {
                            style.separator.to_string()
                        })),
                        stripped,
                    )
                } else {
                    (None, input)
                }
            }
        };
        let mut components = Vec::new();
        for component in rest.split(|ch| style.is_separator(ch)) {
            if component.is_empty() {
                continue;
            }
            style.check_component(component, input)?;
            components.push(component.to_owned());
        }
        Ok(FsPath {
            style: Arc::clone(style),
            root,
            components,
        })
    }

    /// Builds a path from pieces as if they were joined by the separator,
    /// then parses the result.
    pub(crate) fn parse_join(style: &Arc<PathStyle>, first: &str, rest: &[&str]) -> FsResult<FsPath> {
        let mut joined = first.to_owned();
        for piece in rest {
            if !piece.is_empty() {
                joined.push(style.separator);
                joined.push_str(piece);
            }
        }
        FsPath::parse(style, &joined)
    }

    pub fn is_absolute(&self) -> bool {
        self.root.is_some()
    }

    /// Root display string in its original casing, when absolute.
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Parent path: drops the final component. Roots and empty relative
    /// paths have no parent.
    pub fn parent(&self) -> Option<FsPath> {
        if self.components.is_empty() {
            return None;
        }
        let mut components = self.components.clone();
        components.pop();
        Some(FsPath {
            style: Arc::clone(&self.style),
            root: self.root.clone(),
            components,
        })
    }

    /// Appends one name, parsed under the same style.
    pub fn join(&self, name: &str) -> FsResult<FsPath> {
        let tail = FsPath::parse(&self.style, name)?;
        if tail.is_absolute() {
            return Ok(tail);
        }
        let mut components = self.components.clone();
        components.extend(tail.components);
        Ok(FsPath {
            style: Arc::clone(&self.style),
            root: self.root.clone(),
            components,
        })
    }

    /// Removes `.` components and collapses `..` with the preceding
    /// component. Leading `..` survives in relative paths and is dropped
    /// from absolute ones. Idempotent.
    pub fn normalize(&self) -> FsPath {
        let mut normalized: Vec<String> = Vec::with_capacity(self.components.len());
        for component in &self.components {
            match component.as_str() {
                "." => {}
                ".." => match normalized.last().map(String::as_str) {
                    Some("..") | None => {
                        if self.root.is_none() {
                            normalized.push("..".to_owned());
                        }
                    }
                    Some(_) => {
                        normalized.pop();
                    }
                },
                _ => normalized.push(component.clone()),
            }
        }
        FsPath {
            style: Arc::clone(&self.style),
            root: self.root.clone(),
            components: normalized,
        }
    }

    /// Whether `other` is a prefix of this path: same filesystem, same kind,
    /// same root, and a case-folded component prefix.
    pub fn starts_with(&self, other: &FsPath) -> bool {
        if self.style.fs_id != other.style.fs_id {
            return false;
        }
        if self.root_key() != other.root_key() {
            return false;
        }
        if other.components.len() > self.components.len() {
            return false;
        }
        self.components
            .iter()
            .zip(&other.components)
            .all(|(mine, theirs)| self.style.names_equal(mine, theirs))
    }

    pub(crate) fn root_key(&self) -> Option<String> {
        self.root
            .as_deref()
            .map(|display| root_key(self.style.flavor, display))
    }

    pub(crate) fn ensure_same_fs(&self, fs_id: u64) -> FsResult<()> {
        if self.style.fs_id != fs_id {
            return Err(FsError::InvalidOperation(format!(
                "path '{}' belongs to a different filesystem",
                self
            )));
        }
        Ok(())
    }

    fn folded_components(&self) -> Vec<String> {
        self.components
            .iter()
            .map(|component| self.style.fold(component))
            .collect()
    }
}

/// Splits a Windows drive-root prefix off `input`. `"C:"`, `"C:\"` and
/// `"C:/"` all begin the same root; the drive letter keeps its input casing
/// for display.
fn split_drive_root<'a>(style: &PathStyle, input: &'a str) -> FsResult<(Option<String>, &'a str)> {
    let bytes = input.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let after = &input[2..];
        if after.is_empty() {
            return Ok((Some(format!("{}:\\", &input[..1])), after));
        }
        let next = after.chars().next().unwrap();
        if style.is_separator(next) {
            return Ok((Some(format!("{}:\\", &input[..1])), &after[next.len_utf8()..]));
        }
        // A colon anywhere else is a forbidden component character.
        return Err(FsError::InvalidPath(input.to_owned()));
    }
    Ok((None, input))
}

impl Display for FsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self.components.join(&self.style.separator.to_string());
        match &self.root {
            Some(root) => write!(f, "{}{}", root, joined),
            None => write!(f, "{}", joined),
        }
    }
}

impl PartialEq for FsPath {
    fn eq(&self, other: &Self) -> bool {
        self.style.fs_id == other.style.fs_id
            && self.root_key() == other.root_key()
            && self.components.len() == other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(mine, theirs)| self.style.names_equal(mine, theirs))
    }
}

impl Eq for FsPath {}

impl Hash for FsPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.style.fs_id.hash(state);
        self.root_key().hash(state);
        for component in &self.components {
            self.style.fold(component).hash(state);
        }
    }
}

impl PartialOrd for FsPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FsPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.style
            .fs_id
            .cmp(&other.style.fs_id)
            .then_with(|| self.root_key().cmp(&other.root_key()))
            .then_with(|| self.folded_components().cmp(&other.folded_components()))
    }
}
