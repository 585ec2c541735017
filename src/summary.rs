//! Reduce raw GitHub payloads to the metadata we store
//!
//! Both functions are pure: they take already-decoded API responses and
//! never touch the network or the database.

use std::collections::{BTreeSet, HashMap};

use crate::github::{Commit, ContributorStats};

/// Only the newest commits on the first page count towards top committers
pub const COMMIT_WINDOW: usize = 50;

/// How many committers to keep
pub const TOP_COMMITTERS: usize = 3;

/// Latest commit message and most frequent authors of a commit page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub latest_message: String,
    pub top_committers: BTreeSet<String>,
}

impl CommitSummary {
    /// Committers in the form stored in the database: sorted, space separated
    pub fn committers_joined(&self) -> String {
        self.top_committers
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Summarize a page of commits (newest first).
///
/// Logins are ranked by how often they appear in the first
/// [`COMMIT_WINDOW`] commits. Equal counts keep page order, so the author
/// seen first wins a tie for the last slot.
pub fn summarize_commits(commits: &[Commit]) -> CommitSummary {
    let latest_message = commits
        .first()
        .and_then(Commit::message)
        .unwrap_or_default()
        .to_string();

    let mut logins: Vec<&str> = commits
        .iter()
        .take(COMMIT_WINDOW)
        .filter_map(Commit::author_login)
        .filter(|login| !login.is_empty())
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &login in &logins {
        *counts.entry(login).or_default() += 1;
    }

    // Stable sort: ties stay in encounter order
    logins.sort_by(|a, b| counts[b].cmp(&counts[a]));

    let mut top_committers = BTreeSet::new();
    for login in logins {
        if top_committers.len() >= TOP_COMMITTERS {
            break;
        }
        top_committers.insert(login.to_string());
    }

    CommitSummary {
        latest_message,
        top_committers,
    }
}

/// Net lines added across every contributor and every reported week
pub fn summarize_line_delta(contributors: &[ContributorStats]) -> i64 {
    contributors
        .iter()
        .flat_map(|c| c.weeks.iter().flatten())
        .map(|week| week.additions() - week.deletions())
        .sum()
}
