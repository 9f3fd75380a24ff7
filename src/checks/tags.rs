//! Check and tag naming rules, and the tag filter selecting active checks.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::{AppError, Result};

/// Longest legal check or tag name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Inner spaces allowed, never leading or trailing.
        Regex::new(r"^[A-Za-z0-9._:/-](?:[A-Za-z0-9 ._:/-]*[A-Za-z0-9._:/-])?$")
            .unwrap_or_else(|_| unreachable!("static pattern compiles"))
    })
}

/// Validate a check or tag name.
///
/// # Errors
///
/// Returns `AppError::Config` when `name` is empty, longer than
/// [`MAX_NAME_LEN`], or uses characters outside `[A-Za-z0-9._:/-]` (plus
/// inner spaces).
pub fn legal_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Config(format!("{what} name must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(AppError::Config(format!(
            "{what} name is longer than {MAX_NAME_LEN} bytes: {:?}",
            truncate(name)
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(AppError::Config(format!(
            "{what} name {name:?} may only use letters, digits, inner spaces and ._:/-"
        )));
    }
    Ok(())
}

fn truncate(name: &str) -> String {
    name.chars().take(32).collect::<String>() + "…"
}

/// Inclusion/exclusion policy selecting which checks participate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl TagFilter {
    /// Build a filter from include and exclude lists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a tag is illegal or appears in both
    /// lists.
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        let include: BTreeSet<String> = include.into_iter().map(Into::into).collect();
        let exclude: BTreeSet<String> = exclude.into_iter().map(Into::into).collect();

        for tag in include.iter().chain(exclude.iter()) {
            legal_name("tag", tag)?;
        }
        if let Some(both) = include.intersection(&exclude).next() {
            return Err(AppError::Config(format!(
                "tag {both:?} is both included and excluded"
            )));
        }
        Ok(Self { include, exclude })
    }

    /// Whether a check carrying `tags` is filtered out.
    ///
    /// Any excluded tag excludes the check. When an include list is set, a
    /// check must carry at least one of its tags.
    #[must_use]
    pub fn excludes(&self, tags: &BTreeSet<String>) -> bool {
        if tags.iter().any(|t| self.exclude.contains(t)) {
            return true;
        }
        !self.include.is_empty() && !tags.iter().any(|t| self.include.contains(t))
    }

    /// Union of both lists, as sent in the campaign descriptor.
    #[must_use]
    pub fn all_tags(&self) -> BTreeSet<String> {
        self.include.union(&self.exclude).cloned().collect()
    }
}
