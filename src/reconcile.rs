//! Add or refresh a tracked repository
//!
//! One call runs the whole flow for a single identifier: validate, check
//! whether it is already tracked, fetch both GitHub endpoints, then write
//! the summarized record. Nothing is written unless every fetch succeeded.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{is_constraint_violation, Database, NewRecord};
use crate::github::{GitHubClient, GitHubError};
use crate::identifier::{IdentifierError, RepoIdentifier};
use crate::summary::{summarize_commits, summarize_line_delta};

/// Whether the caller expects the repository to be new or already tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Add,
    Update,
}

/// Why a query was rejected
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Invalid(#[from] IdentifierError),

    #[error("Repository already tracked, cannot add.")]
    AlreadyTracked,

    #[error("Repository not being tracked, cannot update.")]
    NotTracked,

    #[error(transparent)]
    Remote(#[from] GitHubError),

    /// Not caused by the caller's input; reported as a server error
    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl QueryError {
    pub fn is_storage(&self) -> bool {
        matches!(self, QueryError::Storage(_))
    }
}

/// JSON body returned to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub error: String,
}

impl QueryOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: String::new(),
        }
    }

    pub fn failed(error: &QueryError) -> Self {
        Self {
            success: false,
            error: error.to_string(),
        }
    }
}

impl From<&Result<(), QueryError>> for QueryOutcome {
    fn from(result: &Result<(), QueryError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}

// SQLite calls are short and synchronous; the guard never crosses an await
fn lock(db: &Mutex<Database>) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fetch both endpoints and summarize them into a storable record
async fn fetch_record(client: &GitHubClient, repo: &RepoIdentifier) -> Result<NewRecord, GitHubError> {
    let commits = client.fetch_commit_page(repo).await?;
    let contributors = client.fetch_contributor_stats(repo).await?;

    let summary = summarize_commits(&commits);
    Ok(NewRecord {
        url: repo.as_str().to_string(),
        line_count: summarize_line_delta(&contributors),
        top_committers: summary.committers_joined(),
        last_commit: summary.latest_message,
    })
}

/// Query GitHub for `raw_url` and add or update its record.
///
/// The database lock is only taken for the existence check and the final
/// write, never while waiting on GitHub. Two concurrent adds of the same
/// repository both pass the check; the second insert then hits the UNIQUE
/// constraint and is reported as already tracked.
pub async fn query_github(
    db: &Mutex<Database>,
    client: &GitHubClient,
    raw_url: &str,
    mode: QueryMode,
) -> Result<(), QueryError> {
    let repo = RepoIdentifier::parse(raw_url)?;

    let tracked = lock(db).count_by_url(repo.as_str())? > 0;
    match (mode, tracked) {
        (QueryMode::Add, true) => return Err(QueryError::AlreadyTracked),
        (QueryMode::Update, false) => return Err(QueryError::NotTracked),
        _ => {}
    }

    let record = match fetch_record(client, &repo).await {
        Ok(record) => record,
        Err(e) => {
            match &e {
                GitHubError::RemoteUnavailable { status } => {
                    warn!(repo = %repo, status = status.as_u16(), "GitHub rejected request")
                }
                other => warn!(repo = %repo, error = %other, "GitHub query failed"),
            }
            return Err(e.into());
        }
    };

    let mut db = lock(db);
    match mode {
        QueryMode::Add => {
            db.insert_record(&record).map_err(|e| {
                if is_constraint_violation(&e) {
                    QueryError::AlreadyTracked
                } else {
                    QueryError::Storage(e)
                }
            })?;
        }
        QueryMode::Update => {
            if db.update_by_url(repo.as_str(), &record)? == 0 {
                return Err(QueryError::NotTracked);
            }
        }
    }

    info!(
        repo = %repo,
        ?mode,
        line_count = record.line_count,
        top_committers = %record.top_committers,
        "repository metadata stored"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::GitHubConfig;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const COMMITS: &str = r#"[
        {"author": {"login": "Myself"}, "commit": {"message": "New setup.py."}},
        {"author": {"login": "You"}, "commit": {"message": "Old setup.py."}}
    ]"#;

    fn test_db() -> Mutex<Database> {
        Mutex::new(Database::open_in_memory().unwrap())
    }

    fn test_client(server: &MockServer) -> GitHubClient {
        GitHubClient::new(GitHubConfig {
            api_base: server.uri(),
            poll_interval: Duration::ZERO,
            ..GitHubConfig::default()
        })
        .unwrap()
    }

    async fn mount(server: &MockServer, repo: &str, commits: &str, contributors: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{repo}/commits")))
            .respond_with(ResponseTemplate::new(200).set_body_string(commits.to_string()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/repos/{repo}/stats/contributors")))
            .respond_with(ResponseTemplate::new(200).set_body_string(contributors.to_string()))
            .mount(server)
            .await;
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    #[tokio::test]
    async fn test_invalid_identifier_touches_nothing() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let db = test_db();

        for (raw, expected) in [
            ("1/2/3", "Invalid GitHub URL, must have only one slash."),
            ("1", "Invalid GitHub URL, must have only one slash."),
            ("1/2#", "Invalid GitHub URL, invalid character(s) found."),
        ] {
            for mode in [QueryMode::Add, QueryMode::Update] {
                let err = query_github(&db, &client, raw, mode).await.unwrap_err();
                assert!(matches!(err, QueryError::Invalid(_)));
                assert_eq!(err.to_string(), expected);
            }
        }

        assert_eq!(request_count(&server).await, 0);
        assert!(lock(&db).list_records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_then_update() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let db = test_db();
        mount(&server, "1/2", COMMITS, r#"[{"weeks": [{"a": 1}]}]"#).await;

        let result = query_github(&db, &client, "1/2", QueryMode::Add).await;
        assert_eq!(QueryOutcome::from(&result), QueryOutcome::ok());

        let records = lock(&db).list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "1/2");
        assert_eq!(records[0].line_count, 1);
        assert_eq!(records[0].top_committers, "Myself You");
        assert_eq!(records[0].last_commit, "New setup.py.");

        // Fresh data for the update
        server.reset().await;
        mount(
            &server,
            "1/2",
            r#"[{"author": {"login": "Them"}, "commit": {"message": "Line one.\nLine two."}}]"#,
            r#"[{"weeks": [{"a": 10, "d": 4}]}, {"weeks": [{"a": 3}]}]"#,
        )
        .await;

        query_github(&db, &client, "1/2", QueryMode::Update).await.unwrap();

        let records = lock(&db).list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "1/2");
        assert_eq!(records[0].line_count, 9);
        assert_eq!(records[0].top_committers, "Them");
        assert_eq!(records[0].last_commit, "Line one.\nLine two.");
    }

    #[tokio::test]
    async fn test_add_rejects_tracked_case_insensitive() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let db = test_db();
        mount(&server, "Owner/Repo", COMMITS, r#"[{"weeks": [{"a": 1}]}]"#).await;

        query_github(&db, &client, "Owner/Repo", QueryMode::Add).await.unwrap();
        let before = request_count(&server).await;

        let err = query_github(&db, &client, "owner/repo", QueryMode::Add).await.unwrap_err();
        assert!(matches!(err, QueryError::AlreadyTracked));
        assert_eq!(
            QueryOutcome::failed(&err),
            QueryOutcome {
                success: false,
                error: "Repository already tracked, cannot add.".to_string(),
            }
        );
        // Rejected before any GitHub request
        assert_eq!(request_count(&server).await, before);
    }

    #[tokio::test]
    async fn test_update_rejects_untracked() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let db = test_db();

        let err = query_github(&db, &client, "user/project", QueryMode::Update)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotTracked));
        assert_eq!(err.to_string(), "Repository not being tracked, cannot update.");
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_update_matches_case_insensitively() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let db = test_db();
        mount(&server, "owner/repo", COMMITS, r#"[{"weeks": [{"a": 5}]}]"#).await;
        mount(&server, "Owner/Repo", COMMITS, r#"[{"weeks": [{"a": 7}]}]"#).await;

        query_github(&db, &client, "owner/repo", QueryMode::Add).await.unwrap();
        query_github(&db, &client, "Owner/Repo", QueryMode::Update).await.unwrap();

        let records = lock(&db).list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "Owner/Repo");
        assert_eq!(records[0].line_count, 7);
    }

    #[tokio::test]
    async fn test_remote_failure_writes_nothing() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let db = test_db();

        Mock::given(method("GET"))
            .and(path("/repos/user/project/commits"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = query_github(&db, &client, "user/project", QueryMode::Add)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid GitHub URL specified.");
        // Stats are never requested once commits fail
        assert_eq!(request_count(&server).await, 1);
        assert!(lock(&db).list_records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_still_generating_leaves_record_untouched() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let db = test_db();
        mount(&server, "user/project", COMMITS, r#"[{"weeks": [{"a": 1}]}]"#).await;

        query_github(&db, &client, "user/project", QueryMode::Add).await.unwrap();

        server.reset().await;
        let before = request_count(&server).await;
        Mock::given(method("GET"))
            .and(path("/repos/user/project/commits"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"author": {"login": "Other"}, "commit": {"message": "x"}}]"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/user/project/stats/contributors"))
            .respond_with(ResponseTemplate::new(202).set_body_string("{}"))
            .mount(&server)
            .await;

        let err = query_github(&db, &client, "user/project", QueryMode::Update)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Remote(GitHubError::StillGenerating)));
        assert_eq!(err.to_string(), "GitHub still generating data, try again later.");
        // One commits request plus three polls
        assert_eq!(request_count(&server).await - before, 4);

        let records = lock(&db).list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].top_committers, "Myself You");
        assert_eq!(records[0].line_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_adds_store_one_record() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let db = test_db();

        // Both adds pass the existence check before either writes
        Mock::given(method("GET"))
            .and(path("/repos/a/b/commits"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(COMMITS)
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b/stats/contributors"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"weeks": [{"a": 1}]}]"#))
            .mount(&server)
            .await;

        let (first, second) = tokio::join!(
            query_github(&db, &client, "a/b", QueryMode::Add),
            query_github(&db, &client, "a/b", QueryMode::Add),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(err, QueryError::AlreadyTracked));
        assert_eq!(err.to_string(), "Repository already tracked, cannot add.");

        assert_eq!(lock(&db).list_records().unwrap().len(), 1);
    }

    /// Clears the database while serving the stats response
    struct DeleteAllThenRespond {
        db: Arc<Mutex<Database>>,
    }

    impl Respond for DeleteAllThenRespond {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            lock(&self.db).delete_all().unwrap();
            ResponseTemplate::new(200).set_body_string(r#"[{"weeks": [{"a": 3}]}]"#)
        }
    }

    #[tokio::test]
    async fn test_update_of_record_removed_mid_fetch() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let db = Arc::new(test_db());
        lock(&db)
            .insert_record(&NewRecord {
                url: "user/project".to_string(),
                line_count: 1,
                top_committers: "Myself".to_string(),
                last_commit: "Initial.".to_string(),
            })
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/repos/user/project/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_string(COMMITS))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/user/project/stats/contributors"))
            .respond_with(DeleteAllThenRespond { db: Arc::clone(&db) })
            .mount(&server)
            .await;

        let err = query_github(&db, &client, "user/project", QueryMode::Update)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotTracked));
        assert_eq!(err.to_string(), "Repository not being tracked, cannot update.");
        // Both endpoints were fetched; the write found nothing to update
        assert_eq!(request_count(&server).await, 2);
        assert!(lock(&db).list_records().unwrap().is_empty());
    }
}
