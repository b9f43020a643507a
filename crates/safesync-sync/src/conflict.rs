//! Conflict naming for keep-both resolution
//!
//! When both sides changed, the local copy is renamed and pushed as a new
//! remote file:
//! `name (conflicted copy YYYY-MM-DD HH-MM-SS).ext`
//!
//! When a locally changed file was removed remotely, it is pushed again as:
//! `name (recreated copy YYYY-MM-DD HH-MM-SS).ext`

use chrono::{DateTime, Utc};

/// Which kind of copy a new name is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    Conflicted,
    Recreated,
}

impl CopyKind {
    fn label(self) -> &'static str {
        match self {
            Self::Conflicted => "conflicted copy",
            Self::Recreated => "recreated copy",
        }
    }
}

/// Generates names for conflict copies
pub struct ConflictNamer;

impl ConflictNamer {
    /// Copy name for `original_name` stamped with `now`
    ///
    /// Given "work.psafe3", produces something like:
    /// "work (conflicted copy 2026-10-19 14-03-59).psafe3"
    pub fn generate(original_name: &str, kind: CopyKind, now: DateTime<Utc>) -> String {
        let timestamp = now.format("%Y-%m-%d %H-%M-%S");
        let label = kind.label();

        match split_extension(original_name) {
            Some((stem, ext)) => format!("{stem} ({label} {timestamp}){ext}"),
            None => format!("{original_name} ({label} {timestamp})"),
        }
    }

    /// Like [`generate`](Self::generate) but avoids names for which
    /// `exists` returns true by appending a counter
    pub fn generate_unique<F>(
        original_name: &str,
        kind: CopyKind,
        now: DateTime<Utc>,
        mut exists: F,
    ) -> String
    where
        F: FnMut(&str) -> bool,
    {
        let candidate = Self::generate(original_name, kind, now);
        if !exists(&candidate) {
            return candidate;
        }

        let mut i = 2;
        loop {
            let numbered = match split_extension(&candidate) {
                Some((stem, ext)) => format!("{stem} {i}{ext}"),
                None => format!("{candidate} {i}"),
            };
            if !exists(&numbered) {
                return numbered;
            }
            i += 1;
        }
    }
}

/// Split at the last dot, keeping hidden files (".profile") whole
fn split_extension(name: &str) -> Option<(&str, &str)> {
    match name.rfind('.') {
        Some(0) | None => None,
        Some(pos) => Some((&name[..pos], &name[pos..])),
    }
}
