//! Axum + Askama review dashboard: browse bid history, record outcomes and
//! ratings, and manage prompt versions.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use askama::Template;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::info;

use bidflow_core::{OutcomeUpdate, ProjectInfo, RatingKind, UploadSource};
use bidflow_ledger::{Ledger, UploadedBid, DEFAULT_DB_PATH};
use bidflow_prompts::PromptLibrary;

pub const CRATE_NAME: &str = "bidflow-web";

pub struct AppState {
    pub ledger: Mutex<Ledger>,
    pub library: PromptLibrary,
}

impl AppState {
    pub fn new(ledger: Ledger, library: PromptLibrary) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            library,
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().expect("ledger lock poisoned")
    }
}

// ----- View rows -----

#[derive(Debug, Clone)]
struct BidRow {
    id: i64,
    title: String,
    project_type: String,
    outcome: String,
    rating: i64,
    created: String,
    was_won: bool,
    was_engaged: bool,
    is_uploaded: bool,
}

#[derive(Debug, Clone)]
struct VersionRow {
    version_key: String,
    name: String,
    is_active: bool,
    is_approved: bool,
    total_bids: i64,
    won_bids: i64,
    success_rate_pct: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    total_bids: i64,
    won: i64,
    engaged: i64,
    viewed: i64,
    pending: i64,
    win_rate_pct: String,
    engagement_rate_pct: String,
    mean_rating: String,
    active_version: String,
    recent: Vec<BidRow>,
}

#[derive(Template)]
#[template(path = "bids.html")]
struct BidsTemplate {
    outcome_filter: String,
    bids: Vec<BidRow>,
}

#[derive(Template)]
#[template(path = "bid_detail.html")]
struct BidDetailTemplate {
    id: i64,
    title: String,
    url: String,
    project_type: String,
    outcome: String,
    rating: i64,
    prompt_version: String,
    model_used: String,
    tone: String,
    created: String,
    was_viewed: bool,
    was_engaged: bool,
    was_won: bool,
    was_high_rank: bool,
    is_uploaded: bool,
    upload_source: String,
    bid_text: String,
    final_bid_text: String,
    outcome_notes: String,
}

#[derive(Template)]
#[template(path = "prompts.html")]
struct PromptsTemplate {
    versions: Vec<VersionRow>,
}

fn bid_row(bid: &bidflow_core::BidRecord) -> BidRow {
    BidRow {
        id: bid.id,
        title: bid.project.title.clone(),
        project_type: bid
            .project
            .project_type
            .clone()
            .unwrap_or_else(|| "other".to_string()),
        outcome: bid.outcome.clone(),
        rating: bid.rating,
        created: bid.created_at.format("%Y-%m-%d %H:%M").to_string(),
        was_won: bid.was_won,
        was_engaged: bid.was_engaged,
        is_uploaded: bid.is_uploaded,
    }
}

fn version_row(version: &bidflow_core::PromptVersion) -> VersionRow {
    VersionRow {
        version_key: version.version_key.clone(),
        name: version.name.clone(),
        is_active: version.is_active,
        is_approved: version.is_approved,
        total_bids: version.total_bids,
        won_bids: version.won_bids,
        success_rate_pct: format!("{:.1}%", version.success_rate * 100.0),
    }
}

// ----- Router -----

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/bids", get(bids_handler))
        .route("/bids/{id}", get(bid_detail_handler))
        .route("/prompts", get(prompts_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/bids/upload", post(upload_handler))
        .route("/api/bids/{id}/rate", post(rate_handler))
        .route("/api/bids/{id}/outcome", post(outcome_handler))
        .route("/api/bids/{id}/final", post(final_text_handler))
        .route("/api/prompts/{key}/activate", post(activate_handler))
        .route("/api/prompts/{key}/approve", post(approve_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("BIDFLOW_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let db_path =
        std::env::var("BIDFLOW_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let prompts_dir = PathBuf::from(
        std::env::var("BIDFLOW_PROMPTS_DIR").unwrap_or_else(|_| "prompts".to_string()),
    );

    let ledger = Ledger::open(&db_path)?;
    let state = AppState::new(ledger, PromptLibrary::new(prompts_dir));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, db_path, "serving dashboard");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

// ----- Page handlers -----

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let ledger = state.ledger();
    let stats = match ledger.learning_stats() {
        Ok(stats) => stats,
        Err(err) => return server_error(err.into()),
    };
    let active_version = match ledger.active_prompt_version() {
        Ok(version) => version.unwrap_or_else(|| "none".to_string()),
        Err(err) => return server_error(err.into()),
    };
    let recent = match ledger.recent(10) {
        Ok(bids) => bids.iter().map(bid_row).collect(),
        Err(err) => return server_error(err.into()),
    };
    render_html(IndexTemplate {
        total_bids: stats.total_bids,
        won: stats.won,
        engaged: stats.engaged,
        viewed: stats.viewed,
        pending: stats.pending,
        // win_rate and engagement_rate are already percentages.
        win_rate_pct: format!("{:.1}%", stats.win_rate),
        engagement_rate_pct: format!("{:.1}%", stats.engagement_rate),
        mean_rating: format!("{:+.1}", stats.mean_rating),
        active_version,
        recent,
    })
}

#[derive(Debug, Deserialize, Default)]
struct BidsQuery {
    outcome: Option<String>,
    limit: Option<usize>,
}

async fn bids_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BidsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50);
    let outcome_filter = query.outcome.unwrap_or_default();
    let ledger = state.ledger();
    let result = if outcome_filter.is_empty() || outcome_filter == "all" {
        ledger.recent(limit)
    } else {
        ledger.by_outcome(&outcome_filter, limit)
    };
    match result {
        Ok(bids) => render_html(BidsTemplate {
            outcome_filter,
            bids: bids.iter().map(bid_row).collect(),
        }),
        Err(err) => server_error(err.into()),
    }
}

async fn bid_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Response {
    let bid = match state.ledger().get(id) {
        Ok(Some(bid)) => bid,
        Ok(None) => return not_found(),
        Err(err) => return server_error(err.into()),
    };
    render_html(BidDetailTemplate {
        id: bid.id,
        title: bid.project.title.clone(),
        url: bid.project.url.clone().unwrap_or_default(),
        project_type: bid
            .project
            .project_type
            .clone()
            .unwrap_or_else(|| "other".to_string()),
        outcome: bid.outcome.clone(),
        rating: bid.rating,
        prompt_version: bid.prompt_version.clone(),
        model_used: bid.model_used.clone().unwrap_or_default(),
        tone: bid.tone.clone().unwrap_or_default(),
        created: bid.created_at.format("%Y-%m-%d %H:%M").to_string(),
        was_viewed: bid.was_viewed,
        was_engaged: bid.was_engaged,
        was_won: bid.was_won,
        was_high_rank: bid.was_high_rank,
        is_uploaded: bid.is_uploaded,
        upload_source: bid.upload_source.clone().unwrap_or_default(),
        bid_text: bid.bid_text.clone(),
        final_bid_text: bid.final_bid_text.clone().unwrap_or_default(),
        outcome_notes: bid.outcome_notes.clone().unwrap_or_default(),
    })
}

async fn prompts_handler(State(state): State<Arc<AppState>>) -> Response {
    let versions = {
        let mut guard = state.ledger.lock().expect("ledger lock poisoned");
        if let Err(err) = state.library.sync_to_ledger(&mut guard) {
            return server_error(err);
        }
        match guard.prompt_versions() {
            Ok(versions) => versions,
            Err(err) => return server_error(err.into()),
        }
    };
    render_html(PromptsTemplate {
        versions: versions.iter().map(version_row).collect(),
    })
}

// ----- JSON API handlers -----

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.ledger().learning_stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct RateRequest {
    rating: String,
}

async fn rate_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Json(request): Json<RateRequest>,
) -> Response {
    let Some(kind) = RatingKind::parse(&request.rating) else {
        return json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            &format!("unknown rating '{}'", request.rating),
        );
    };
    match state.ledger().rate(id, kind) {
        Ok(Some(rating)) => Json(serde_json::json!({"ok": true, "rating": rating})).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "bid not found"),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn outcome_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Json(update): Json<OutcomeUpdate>,
) -> Response {
    match state.ledger().update_outcome(id, &update) {
        Ok(true) => Json(serde_json::json!({"ok": true})).into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "bid not found"),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct FinalTextRequest {
    final_text: String,
    notes: Option<String>,
}

async fn final_text_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Json(request): Json<FinalTextRequest>,
) -> Response {
    match state
        .ledger()
        .save_final_text(id, &request.final_text, request.notes.as_deref())
    {
        Ok(true) => Json(serde_json::json!({"ok": true})).into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "bid not found"),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    title: String,
    bid_text: String,
    source: String,
    project_type: Option<String>,
    description: Option<String>,
    url: Option<String>,
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UploadRequest>,
) -> Response {
    let Some(source) = UploadSource::parse(&request.source) else {
        return json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            &format!("unknown upload source '{}'", request.source),
        );
    };
    let upload = UploadedBid {
        project: ProjectInfo {
            title: request.title,
            description: request.description,
            url: request.url,
            project_type: request.project_type,
            ..ProjectInfo::default()
        },
        bid_text: request.bid_text,
        source,
    };
    match state.ledger().save_uploaded(&upload) {
        Ok(bid_id) => Json(serde_json::json!({"ok": true, "bid_id": bid_id})).into_response(),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn activate_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(key): AxumPath<String>,
) -> Response {
    let mut guard = state.ledger.lock().expect("ledger lock poisoned");
    match state.library.set_active(&mut guard, &key) {
        Ok(true) => Json(serde_json::json!({"ok": true, "active": key})).into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "prompt version not found"),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn approve_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(key): AxumPath<String>,
) -> Response {
    match state.ledger().approve_prompt_version(&key) {
        Ok(true) => Json(serde_json::json!({"ok": true})).into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "prompt version not found"),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

// ----- Response helpers -----

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html("Bid not found".to_string())).into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"ok": false, "error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use bidflow_core::NewBid;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path().join("prompts"));
        // Leak the tempdir so the prompt directory outlives the state.
        std::mem::forget(dir);
        AppState::new(Ledger::in_memory().expect("ledger"), library)
    }

    fn seed_bid(state: &AppState) -> i64 {
        let bid = NewBid {
            project: ProjectInfo {
                title: "Scraping gig".to_string(),
                project_type: Some("scraping".to_string()),
                ..ProjectInfo::default()
            },
            bid_text: "Generated proposal".to_string(),
            milestone_plan: None,
            prompt_version: "v1".to_string(),
            model_used: None,
            tone: None,
        };
        state.ledger().create(&bid).expect("create")
    }

    async fn body_text(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn index_and_bid_pages_render() {
        let state = test_state();
        let id = seed_bid(&state);
        let won_id = seed_bid(&state);
        state
            .ledger()
            .update_outcome(
                won_id,
                &OutcomeUpdate {
                    outcome: "won".to_string(),
                    was_won: true,
                    ..OutcomeUpdate::default()
                },
            )
            .expect("outcome");
        let app = app(state);

        let index = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(index.status(), StatusCode::OK);
        let text = body_text(index).await;
        assert!(text.contains("Bid Assistant"));
        // One of two bids won: the page shows 50.0%, not a re-scaled figure.
        assert!(text.contains("50.0%"));
        assert!(!text.contains("5000.0%"));

        let detail = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/bids/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(detail.status(), StatusCode::OK);
        assert!(body_text(detail).await.contains("Scraping gig"));

        let missing = app
            .oneshot(Request::builder().uri("/bids/999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rate_endpoint_applies_rating() {
        let state = test_state();
        let id = seed_bid(&state);
        let app = app(state);

        let ok = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/bids/{id}/rate"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"rating": "good"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert!(body_text(ok).await.contains("\"rating\":5"));

        let unknown = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/bids/{id}/rate"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"rating": "excellent"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let missing = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/bids/999/rate")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"rating": "good"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn outcome_and_final_text_endpoints() {
        let state = test_state();
        let id = seed_bid(&state);
        let app = app(state);

        let outcome = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/bids/{id}/outcome"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"outcome": "won", "was_viewed": true, "was_engaged": true, "was_won": true, "was_high_rank": false, "notes": null}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status(), StatusCode::OK);

        let final_text = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/bids/{id}/final"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"final_text": "Edited proposal"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(final_text.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upload_and_stats_endpoints() {
        let app = app(test_state());

        let upload = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/bids/upload")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"title": "Won elsewhere", "bid_text": "text", "source": "other_freelancer", "project_type": "web_app"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(upload.status(), StatusCode::OK);

        let bad_source = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/bids/upload")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title": "x", "bid_text": "y", "source": "stolen"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad_source.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let stats = app
            .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(stats.status(), StatusCode::OK);
        assert_eq!(
            stats.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "application/json"
        );
        let text = body_text(stats).await;
        assert!(text.contains("\"total_bids\""));
    }
}
