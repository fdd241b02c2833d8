/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use serde::{Deserialize, Serialize};

use crate::attr::ViewKind;
use crate::error::{FsError, FsResult};

/// Family of path syntax and semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flavor {
    Posix,
    Windows,
    Custom,
}

/// How component names compare and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseSensitivity {
    Sensitive,
    InsensitiveAscii,
    InsensitiveUnicode,
}

/// Fully-resolved filesystem configuration.
///
/// Deserializable from TOML; the keys follow the external configuration-map
/// contract (`default-name-separator`, `case-sensitivity`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub flavor: Flavor,
    pub case_sensitivity: CaseSensitivity,
    pub default_name_separator: char,
    /// Root display strings: `["/"]` for POSIX, `["C:\", "D:\", ...]` for Windows.
    pub roots: Vec<String>,
    /// Code points rejected inside path components.
    pub forbidden_characters: Vec<char>,
    /// Optional attribute views attached to every entry beside `basic`.
    pub additional_views: Vec<ViewKind>,
    pub users: Vec<String>,
    pub groups: Vec<String>,
    pub default_user: String,
    pub default_group: String,
    /// Permission mask applied to newly created files. Directories get the
    /// execute bits OR-ed in for all three classes.
    pub umask: u32,
    /// Absolute path resolving relative paths.
    pub default_directory: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::posix()
    }
}

pub(crate) const WINDOWS_FORBIDDEN: &[char] = &['\\', '/', ':', '?', '"', '<', '>', '|'];

impl Config {
    pub fn posix() -> Self {
        Config {
            flavor: Flavor::Posix,
            case_sensitivity: CaseSensitivity::Sensitive,
            default_name_separator: '/',
            roots: vec!["/".to_owned()],
            forbidden_characters: vec!['\0'],
            additional_views: vec![ViewKind::Posix],
            users: vec!["user".to_owned()],
            groups: vec!["group".to_owned()],
            default_user: "user".to_owned(),
            default_group: "group".to_owned(),
            umask: 0o644,
            default_directory: "/".to_owned(),
        }
    }

    pub fn windows() -> Self {
        Config {
            flavor: Flavor::Windows,
            case_sensitivity: CaseSensitivity::InsensitiveAscii,
            default_name_separator: '\\',
            roots: vec!["C:\\".to_owned()],
            forbidden_characters: WINDOWS_FORBIDDEN.to_vec(),
            additional_views: vec![ViewKind::Dos, ViewKind::Acl, ViewKind::User],
            users: vec!["user".to_owned()],
            groups: vec!["group".to_owned()],
            default_user: "user".to_owned(),
            default_group: "group".to_owned(),
            umask: 0o644,
            default_directory: "C:\\".to_owned(),
        }
    }

    pub fn custom(separator: char) -> Self {
        let root = separator.to_string();
        Config {
            flavor: Flavor::Custom,
            default_name_separator: separator,
            roots: vec![root.clone()],
            default_directory: root,
            ..Config::posix()
        }
    }

    pub fn from_toml_str(raw: &str) -> FsResult<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|err| FsError::InvalidConfiguration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration against the constraints every filesystem
    /// build enforces. Called by the registry before any state is created.
    pub fn validate(&self) -> FsResult<()> {
        self.validate_separator()?;
        self.validate_roots()?;
        self.validate_principals()?;
        if self.umask & !0o777 != 0 {
            return Err(FsError::InvalidConfiguration(format!(
                "'umask' {:o} has bits outside the 9-bit permission mask",
                self.umask
            )));
        }
        Ok(())
    }

    fn validate_separator(&self) -> FsResult<()> {
        let separator = self.default_name_separator;
        // Non-ASCII separators are rejected wholesale: this covers surrogates,
        // combining marks and symbol glyphs such as U+2603.
        if !separator.is_ascii()
            || separator.is_ascii_alphanumeric()
            || separator.is_ascii_whitespace()
            || separator.is_ascii_control()
        {
            return Err(FsError::InvalidConfiguration(format!(
                "'default-name-separator' {:?} is not a usable separator",
                separator
            )));
        }
        Ok(())
    }

    fn validate_roots(&self) -> FsResult<()> {
        match self.flavor {
            Flavor::Posix | Flavor::Custom => {
                if self.roots.len() != 1 {
                    return Err(FsError::InvalidConfiguration(format!(
                        "'roots' must name exactly one root, got {}",
                        self.roots.len()
                    )));
                }
            }
            Flavor::Windows => {
                if self.roots.is_empty() {
                    return Err(FsError::InvalidConfiguration(
                        "'roots' must name at least one drive root".to_owned(),
                    ));
                }
                for root in &self.roots {
                    if !is_drive_root(root) {
                        return Err(FsError::InvalidConfiguration(format!(
                            "'roots' entry '{}' is not a drive root",
                            root
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_principals(&self) -> FsResult<()> {
        if !self.users.contains(&self.default_user) {
            return Err(FsError::InvalidConfiguration(format!(
                "'default-user' '{}' is not listed in 'users'",
                self.default_user
            )));
        }
        if !self.groups.contains(&self.default_group) {
            return Err(FsError::InvalidConfiguration(format!(
                "'default-group' '{}' is not listed in 'groups'",
                self.default_group
            )));
        }
        Ok(())
    }
}

/// `"C:\"` or `"C:/"` with any ASCII drive letter.
pub(crate) fn is_drive_root(root: &str) -> bool {
    let mut chars = root.chars();
    matches!(
        (chars.next(), chars.next(), chars.next(), chars.next()),
        (Some(letter), Some(':'), Some('\\' | '/'), None) if letter.is_ascii_alphabetic()
    )
}
