//! Release specifier parsing
//!
//! A release is either an exact-pinned requirement (`name[extras]==1.2.3`)
//! or a path to an already-built wheel file, optionally suffixed with
//! `[extras]`. Anything else (version ranges, environment markers, URL
//! requirements) is rejected before any engine call is made: grocker
//! builds reproducible images, it does not resolve versions.

use crate::error::{GrockerError, GrockerResult};
use std::fmt;
use std::path::{Path, PathBuf};

/// A fully pinned application release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Canonical project name (PEP 503 normalized)
    pub name: String,
    /// Exact version, optional local segment included
    pub version: String,
    /// Sorted, deduplicated extras
    pub extras: Vec<String>,
    /// Set when the release came from a local wheel file
    pub wheel_path: Option<PathBuf>,
}

impl Release {
    /// Parse a release specifier.
    pub fn parse(specifier: &str) -> GrockerResult<Self> {
        let specifier = specifier.trim();
        let (body, extras) = split_extras_suffix(specifier);

        if body.ends_with(".whl") || body.contains('/') {
            return Self::from_wheel_path(specifier, body, extras);
        }

        Self::from_requirement(specifier, body, extras)
    }

    fn from_requirement(specifier: &str, body: &str, trailing_extras: Vec<String>) -> GrockerResult<Self> {
        let invalid = |reason: &str| GrockerError::InvalidRelease {
            specifier: specifier.to_string(),
            reason: reason.to_string(),
        };

        // `name[extras]==version`: the extras bracket sits before the
        // operator, so a suffix parse only triggers on the wheel-path form.
        if !trailing_extras.is_empty() {
            return Err(invalid("extras suffix is only valid after a wheel path"));
        }
        if body.contains(';') {
            return Err(invalid("environment markers are not supported"));
        }
        if body.contains('@') {
            return Err(invalid("URL requirements are not supported"));
        }
        if body.contains(',') {
            return Err(invalid("only a single exact version pin is supported"));
        }

        let (name_part, version) = body
            .split_once("==")
            .ok_or_else(|| invalid("only exact `==` version pins are supported"))?;
        let version = version.trim();
        if version.is_empty() || version.contains(['=', '<', '>', '~', '!', '*']) {
            return Err(invalid("only exact `==` version pins are supported"));
        }

        let (name, extras) = split_name_extras(name_part.trim())
            .ok_or_else(|| invalid("malformed project name or extras"))?;
        if name.is_empty() {
            return Err(invalid("missing project name"));
        }

        Ok(Self {
            name: canonical_name(&name),
            version: version.to_string(),
            extras,
            wheel_path: None,
        })
    }

    fn from_wheel_path(specifier: &str, body: &str, extras: Vec<String>) -> GrockerResult<Self> {
        let path = Path::new(body);
        if path.extension().and_then(|e| e.to_str()) != Some("whl") {
            return Err(GrockerError::InvalidRelease {
                specifier: specifier.to_string(),
                reason: "local release artifacts must be .whl files".to_string(),
            });
        }
        if !path.is_file() {
            return Err(GrockerError::ReleaseFileNotFound(path.to_path_buf()));
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        // Wheel file names are `{distribution}-{version}(-{build})?-{python}-{abi}-{platform}`
        let mut segments = stem.split('-');
        let (name, version) = match (segments.next(), segments.next()) {
            (Some(name), Some(version)) if !name.is_empty() && !version.is_empty() => (name, version),
            _ => {
                return Err(GrockerError::InvalidRelease {
                    specifier: specifier.to_string(),
                    reason: "wheel file name does not follow the distribution-version convention"
                        .to_string(),
                })
            }
        };

        Ok(Self {
            name: canonical_name(name),
            version: version.to_string(),
            extras,
            wheel_path: Some(path.to_path_buf()),
        })
    }

    /// The `name[extras]` part of an install string
    pub fn name_with_extras(&self) -> String {
        if self.extras.is_empty() {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, self.extras.join(","))
        }
    }

    /// Render back to an installable requirement (`name[extras]==version`)
    pub fn as_requirement(&self) -> String {
        format!("{}=={}", self.name_with_extras(), self.version)
    }

    /// The extras suffix alone (`[e1,e2]`), empty when there are no extras
    pub fn extras_suffix(&self) -> String {
        if self.extras.is_empty() {
            String::new()
        } else {
            format!("[{}]", self.extras.join(","))
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_requirement())
    }
}

/// Split a trailing `[extras]` suffix off a specifier, if present.
///
/// Only a suffix at the very end counts; `name[x]==1.0` keeps its bracket
/// inside the body and is handled by the requirement parser.
fn split_extras_suffix(specifier: &str) -> (&str, Vec<String>) {
    if let Some(body) = specifier.strip_suffix(']') {
        if let Some(open) = body.rfind('[') {
            let (head, extras) = body.split_at(open);
            if !head.contains("==") {
                return (head, parse_extras(&extras[1..]));
            }
        }
    }
    (specifier, Vec::new())
}

/// Split `name[e1,e2]` into name and extras
fn split_name_extras(s: &str) -> Option<(String, Vec<String>)> {
    match s.split_once('[') {
        None => Some((s.to_string(), Vec::new())),
        Some((name, rest)) => {
            let extras = rest.strip_suffix(']')?;
            Some((name.to_string(), parse_extras(extras)))
        }
    }
}

fn parse_extras(extras: &str) -> Vec<String> {
    let mut extras: Vec<String> = extras
        .split(',')
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    extras.sort();
    extras.dedup();
    extras
}

/// PEP 503 name normalization: lowercase, runs of `-_.` collapse to `-`
fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.chars() {
        if c == '-' || c == '_' || c == '.' {
            if !last_dash {
                out.push('-');
                last_dash = true;
            }
        } else {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        }
    }
    out
}
