//! HTTP server: query API, health check and HTML pages

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::db::{Database, RepositoryRecord};
use crate::formatting::{commit_message_html, commit_subject, escape_html, format_line_count, truncate_str};
use crate::github::GitHubClient;
use crate::reconcile::{query_github, QueryMode, QueryOutcome};

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub github: GitHubClient,
}

impl AppState {
    pub fn new(db: Database, github: GitHubClient) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            github,
        }
    }
}

/// Form body for the query endpoints
#[derive(Deserialize)]
struct QueryForm {
    repo_url: Option<String>,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/details/:owner/:project", get(details_handler))
        .route("/api/health", get(health_handler))
        .route("/api/health/", get(health_handler))
        .route("/api/query_github", post(add_handler))
        .route("/api/query_github/", post(add_handler))
        .route("/api/query_github/update", post(update_handler))
        .route("/api/query_github/update/", post(update_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server, stopping on Ctrl+C
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "github-status listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
            }
            info!("shutting down");
        })
        .await?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain;charset=UTF-8")], "Running")
}

async fn add_handler(State(state): State<AppState>, form: Option<Form<QueryForm>>) -> Response {
    run_query(state, form, QueryMode::Add).await
}

async fn update_handler(State(state): State<AppState>, form: Option<Form<QueryForm>>) -> Response {
    run_query(state, form, QueryMode::Update).await
}

async fn run_query(state: AppState, form: Option<Form<QueryForm>>, mode: QueryMode) -> Response {
    let repo_url = match form.and_then(|Form(f)| f.repo_url).filter(|u| !u.is_empty()) {
        Some(url) => url,
        None => return StatusCode::BAD_REQUEST.into_response(),
    };

    let result = query_github(&state.db, &state.github, &repo_url, mode).await;
    match &result {
        Err(e) if e.is_storage() => {
            error!(repo = %repo_url, error = %e, "query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(QueryOutcome::from(&result))).into_response()
        }
        _ => Json(QueryOutcome::from(&result)).into_response(),
    }
}

/// List every tracked repository
async fn index_handler(State(state): State<AppState>) -> Response {
    // Blocking SQLite read on the worker thread, lock released before returning
    let records = state
        .db
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .list_records();

    match records {
        Ok(records) => Html(render_index(&records)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to list repositories");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Show one repository's metadata
async fn details_handler(
    State(state): State<AppState>,
    Path((owner, project)): Path<(String, String)>,
) -> Response {
    let url = format!("{}/{}", owner, project);
    let record = state
        .db
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get_by_url(&url);

    match record {
        Ok(Some(record)) => Html(render_details(&record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Html(page("Not Found", "<p>Repository not being tracked.</p>")),
        )
            .into_response(),
        Err(e) => {
            error!(repo = %url, error = %e, "failed to load repository");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - GitHub Status</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
<div class="container">
<header><h1><a href="/">GitHub Status</a> <span>{title}</span></h1></header>
{body}
</div>
</body>
</html>
"#,
        title = escape_html(title),
    )
}

fn render_index(records: &[RepositoryRecord]) -> String {
    let mut body = String::from(QUERY_FORMS);

    if records.is_empty() {
        body.push_str("<p class=\"muted\">No repositories tracked yet.</p>");
        return page("Repositories", &body);
    }

    body.push_str(
        "<table>\n<thead><tr><th>Repository</th><th>Lines</th><th>Top committers</th><th>Last commit</th></tr></thead>\n<tbody>\n",
    );
    for record in records {
        let url = escape_html(&record.url);
        body.push_str(&format!(
            "<tr><td><a href=\"/details/{url}\">{url}</a></td><td class=\"num\">{}</td><td>{}</td><td>{}</td></tr>\n",
            format_line_count(record.line_count),
            escape_html(&record.top_committers),
            escape_html(&truncate_str(commit_subject(&record.last_commit), 72)),
        ));
    }
    body.push_str("</tbody>\n</table>");

    page("Repositories", &body)
}

fn render_details(record: &RepositoryRecord) -> String {
    let committers: String = record
        .committers()
        .map(|login| format!("<li>{}</li>", escape_html(login)))
        .collect();

    let body = format!(
        r#"<dl>
<dt>Repository</dt><dd><a href="https://github.com/{url}">{url}</a></dd>
<dt>Line count</dt><dd class="num">{line_count}</dd>
<dt>Top committers</dt><dd><ul>{committers}</ul></dd>
<dt>Last commit</dt><dd class="commit">{last_commit}</dd>
</dl>"#,
        url = escape_html(&record.url),
        line_count = format_line_count(record.line_count),
        last_commit = commit_message_html(&record.last_commit),
    );

    page(&record.url, &body)
}

const QUERY_FORMS: &str = r#"<section class="forms">
<form method="post" action="/api/query_github">
    <input name="repo_url" placeholder="owner/project" required>
    <button type="submit">Add</button>
</form>
<form method="post" action="/api/query_github/update">
    <input name="repo_url" placeholder="owner/project" required>
    <button type="submit">Update</button>
</form>
</section>
"#;

const PAGE_STYLE: &str = r#"
:root { --bg: #fafafa; --surface: #ffffff; --border: #e5e5e5; --text: #171717; --text-muted: #737373; --primary: #2563eb; }
* { box-sizing: border-box; margin: 0; padding: 0; }
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background: var(--bg); color: var(--text); line-height: 1.5; }
.container { max-width: 1100px; margin: 0 auto; padding: 24px; }
header { margin-bottom: 24px; padding-bottom: 16px; border-bottom: 1px solid var(--border); }
h1 { font-size: 20px; font-weight: 600; }
h1 span, .muted { color: var(--text-muted); font-weight: 400; }
a { color: var(--primary); text-decoration: none; }
.forms { display: flex; gap: 16px; margin-bottom: 24px; }
input { padding: 6px 10px; border: 1px solid var(--border); border-radius: 4px; }
button { padding: 6px 12px; border: 0; border-radius: 4px; background: var(--primary); color: #fff; cursor: pointer; }
table { width: 100%; border-collapse: collapse; background: var(--surface); }
th, td { text-align: left; padding: 8px 12px; border-bottom: 1px solid var(--border); }
.num { font-variant-numeric: tabular-nums; }
dl { display: grid; grid-template-columns: 160px 1fr; gap: 8px 16px; }
dt { color: var(--text-muted); }
ul { list-style: none; }
.commit { font-family: ui-monospace, monospace; white-space: normal; }
"#;
