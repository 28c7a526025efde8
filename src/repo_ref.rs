//! Repository references.
//!
//! Users name repositories in several ways (`owner/name`, a browser URL, an
//! SSH clone URL). [`RepoRef::parse`] normalizes all of them and derives the
//! stable repository id used as the primary key everywhere else.

use std::fmt;

use crate::error::AnalysisError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parses `owner/name`, `https://github.com/owner/name[.git][/...]`,
    /// `github.com/owner/name`, or `git@github.com:owner/name.git`.
    pub fn parse(input: &str) -> Result<Self, AnalysisError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "repository reference is empty".to_string(),
            ));
        }

        let rest = if let Some(ssh) = trimmed.strip_prefix("git@github.com:") {
            ssh
        } else {
            let without_scheme = trimmed
                .strip_prefix("https://")
                .or_else(|| trimmed.strip_prefix("http://"))
                .unwrap_or(trimmed);
            let without_www = without_scheme
                .strip_prefix("www.")
                .unwrap_or(without_scheme);
            match without_www.strip_prefix("github.com/") {
                Some(path) => path,
                None if without_www.contains("://") || without_www.contains(':') => {
                    return Err(AnalysisError::InvalidInput(format!(
                        "unsupported repository host in '{}'",
                        trimmed
                    )))
                }
                None if without_scheme != trimmed => {
                    return Err(AnalysisError::InvalidInput(format!(
                        "unsupported repository host in '{}'",
                        trimmed
                    )))
                }
                None => without_www,
            }
        };

        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let owner = segments.next().unwrap_or_default();
        let name = segments.next().unwrap_or_default();
        let name = name.strip_suffix(".git").unwrap_or(name);

        if !is_valid_segment(owner) || !is_valid_segment(name) {
            return Err(AnalysisError::InvalidInput(format!(
                "expected owner/name, got '{}'",
                trimmed
            )));
        }

        Ok(Self::new(owner, name))
    }

    /// Stable key: lowercased `owner/name`.
    pub fn id(&self) -> String {
        format!(
            "{}/{}",
            self.owner.to_ascii_lowercase(),
            self.name.to_ascii_lowercase()
        )
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
