//! Axum REST API handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, MethodRouter},
    Json, Router,
};
use chrono::{DateTime, Utc};
use dealblock_lifecycle::amount::parse_token_amount;
use dealblock_lifecycle::validation::{MilestoneDraft, MilestoneEdit, ProjectDraft, TaskDraft};
use dealblock_lifecycle::{Action, Address, ContractErrorCode, ErrorClass, ValidationError};
use futures::future::join_all;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::actions::{ActionService, Outcome};
use crate::config::Config;
use crate::contract::{load_project, Chain};
use crate::errors::GatewayError;
use crate::poller::{Poller, Snapshot};
use crate::views::{DashboardView, ProjectView, ViewSettings};

pub struct AppState {
    pub config: Config,
    pub chain: Arc<dyn Chain>,
    pub actions: ActionService,
    pub poller: Arc<Poller>,
}

impl AppState {
    fn settings(&self) -> ViewSettings<'_> {
        ViewSettings {
            now: Utc::now(),
            release_policy: self.config.release_policy,
            tokens: &self.config.tokens,
            token_decimals: self.config.token_decimals,
        }
    }

    fn amount(&self, raw: &str) -> Result<u128, ValidationError> {
        parse_token_amount(raw, self.config.token_decimals)
    }

    /// A token given as an address or as a configured symbol.
    fn token(&self, raw: &str) -> Result<Address, ValidationError> {
        if raw.trim_start().starts_with("0x") {
            Address::parse(raw)
        } else {
            self.config.tokens.resolve(raw)
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dashboard", get(dashboard))
        .route("/projects", post(create_project))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/stream", get(stream_project))
        .route("/projects/:id/milestones", post(add_milestone))
        .route("/projects/:id/milestones/:index/fund", transition(Action::Fund))
        .route(
            "/projects/:id/milestones/:index/review",
            transition(Action::MarkForReview),
        )
        .route(
            "/projects/:id/milestones/:index/approve",
            transition(Action::Approve),
        )
        .route(
            "/projects/:id/milestones/:index/complete",
            transition(Action::Complete),
        )
        .route(
            "/projects/:id/milestones/:index/release",
            transition(Action::Release),
        )
        .route(
            "/projects/:id/milestones/:index/cancel",
            transition(Action::Cancel),
        )
        .route("/projects/:id/milestones/:index/tasks", post(add_tasks))
        .route(
            "/projects/:id/milestones/:index/deadline",
            post(extend_deadline),
        )
        .route("/projects/:id/milestones/:index/edit", post(edit_milestone))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ViewerQuery {
    pub viewer: Option<String>,
}

impl ViewerQuery {
    fn address(&self) -> Result<Option<Address>, ValidationError> {
        match self.viewer.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Address::parse(raw).map(Some),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    /// Comma-separated project ids.
    pub ids: Option<String>,
    pub viewer: Option<String>,
}

/// Milestone fields as typed into a form. `amount` is in whole tokens.
#[derive(Debug, Deserialize)]
pub struct MilestoneRequest {
    pub amount: String,
    pub ending_at: DateTime<Utc>,
    pub tasks: Vec<TaskDraft>,
    #[serde(default)]
    pub approvers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub payee: String,
    /// Symbol such as `USDC`, or a token address.
    pub token: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub milestone: MilestoneRequest,
}

#[derive(Debug, Deserialize)]
pub struct TasksRequest {
    pub tasks: Vec<TaskDraft>,
}

#[derive(Debug, Deserialize)]
pub struct DeadlineRequest {
    pub ending_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EditRequest {
    pub amount: Option<String>,
    pub starting_at: Option<DateTime<Utc>>,
    pub ending_at: Option<DateTime<Utc>>,
    pub tasks: Option<Vec<TaskDraft>>,
    pub approvers: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub dealblock: Address,
    pub account: Option<Address>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub tx_hashes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_index: Option<u64>,
    pub project: ProjectView,
}

#[derive(Serialize)]
struct SnapshotEvent {
    version: u64,
    fetched_at: Option<DateTime<Utc>>,
    error: Option<String>,
    project: Option<ProjectView>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub class: ErrorClass,
    pub code: Option<ContractErrorCode>,
}

// ─────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError(GatewayError);

impl<E> From<E> for ApiError
where
    E: Into<GatewayError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            GatewayError::ProjectNotFound(_) | GatewayError::MilestoneNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            GatewayError::NoAccount => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ConfirmationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            err => match err.class() {
                ErrorClass::Validation => StatusCode::BAD_REQUEST,
                ErrorClass::Authorization => StatusCode::FORBIDDEN,
                ErrorClass::Precondition => StatusCode::CONFLICT,
                ErrorClass::Transport => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.user_message(),
            class: self.0.class(),
            code: self.0.contract_code(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        dealblock: state.chain.dealblock_address(),
        account: state.chain.account(),
    })
}

/// `GET /dashboard?ids=1,2&viewer=0x…`
///
/// Ids that do not exist on-chain are reported under `missing`.
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<DashboardView> {
    let viewer = ViewerQuery {
        viewer: query.viewer,
    }
    .address()?;
    let ids = parse_ids(query.ids.as_deref().unwrap_or_default())?;

    let loaded = join_all(
        ids.iter()
            .map(|id| load_project(state.chain.as_ref(), *id)),
    )
    .await;

    let mut projects = Vec::with_capacity(ids.len());
    let mut missing = Vec::new();
    for result in loaded {
        match result {
            Ok(project) => projects.push(project),
            Err(GatewayError::ProjectNotFound(id)) => missing.push(id),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Json(DashboardView::build(
        &projects,
        missing,
        viewer,
        &state.settings(),
    )))
}

/// `GET /projects/:id?viewer=0x…`
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Query(query): Query<ViewerQuery>,
) -> ApiResult<ProjectView> {
    let viewer = query.address()?;
    let project = load_project(state.chain.as_ref(), id).await?;
    Ok(Json(ProjectView::build(&project, viewer, &state.settings())))
}

/// `GET /projects/:id/stream?viewer=0x…`
///
/// Server-sent `snapshot` events, one per poll. The watcher stays alive for
/// as long as the client is connected.
pub async fn stream_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Query(query): Query<ViewerQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let viewer = query.address()?;
    let handle = state.poller.watch(id);
    let mut rx = handle.subscribe();

    let stream = async_stream::stream! {
        let _handle = handle;
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.version > 0 {
                yield Ok::<_, Infallible>(snapshot_event(&state, &snapshot, viewer));
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn snapshot_event(state: &AppState, snapshot: &Snapshot, viewer: Option<Address>) -> Event {
    let settings = state.settings();
    let payload = SnapshotEvent {
        version: snapshot.version,
        fetched_at: snapshot.fetched_at,
        error: snapshot.error.clone(),
        project: snapshot
            .project
            .as_ref()
            .map(|p| ProjectView::build(p, viewer, &settings)),
    };
    let (name, data) = match serde_json::to_string(&payload) {
        Ok(data) => ("snapshot", data),
        Err(e) => {
            warn!("Failed to encode snapshot {}: {e}", snapshot.version);
            ("error", e.to_string())
        }
    };
    Event::default()
        .event(name)
        .id(snapshot.version.to_string())
        .data(data)
}

// ─────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────

fn transition(action: Action) -> MethodRouter<Arc<AppState>> {
    post(
        move |State(state): State<Arc<AppState>>, Path((id, index)): Path<(u64, u64)>| {
            run_transition(state, id, index, action)
        },
    )
}

/// `POST /projects/:id/milestones/:index/{fund,review,approve,complete,release,cancel}`
async fn run_transition(
    state: Arc<AppState>,
    id: u64,
    index: u64,
    action: Action,
) -> ApiResult<ActionResponse> {
    let outcome = state.actions.transition(id, index, action).await?;
    respond(&state, outcome)
}

fn respond(state: &AppState, outcome: Outcome) -> ApiResult<ActionResponse> {
    let viewer = state.chain.account();
    Ok(Json(ActionResponse {
        project: ProjectView::build(&outcome.project, viewer, &state.settings()),
        tx_hashes: outcome.tx_hashes,
        milestone_index: outcome.milestone_index,
    }))
}

fn milestone_draft(state: &AppState, req: MilestoneRequest) -> Result<MilestoneDraft, ApiError> {
    Ok(MilestoneDraft {
        amount: state.amount(&req.amount)?,
        ending_at: req.ending_at,
        tasks: req.tasks,
        approvers: req.approvers,
    })
}

/// `POST /projects`
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<ActionResponse> {
    let draft = ProjectDraft {
        payee: req.payee,
        token: state.token(&req.token)?,
        title: req.title,
        description: req.description,
        milestone: milestone_draft(&state, req.milestone)?,
    };
    let outcome = state.actions.initialize_project(&draft).await?;
    respond(&state, outcome)
}

/// `POST /projects/:id/milestones`
pub async fn add_milestone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(req): Json<MilestoneRequest>,
) -> ApiResult<ActionResponse> {
    let draft = milestone_draft(&state, req)?;
    let outcome = state.actions.add_milestone(id, &draft).await?;
    respond(&state, outcome)
}

/// `POST /projects/:id/milestones/:index/tasks`
pub async fn add_tasks(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(u64, u64)>,
    Json(req): Json<TasksRequest>,
) -> ApiResult<ActionResponse> {
    let outcome = state.actions.add_tasks(id, index, &req.tasks).await?;
    respond(&state, outcome)
}

/// `POST /projects/:id/milestones/:index/deadline`
pub async fn extend_deadline(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(u64, u64)>,
    Json(req): Json<DeadlineRequest>,
) -> ApiResult<ActionResponse> {
    let outcome = state
        .actions
        .extend_deadline(id, index, req.ending_at)
        .await?;
    respond(&state, outcome)
}

/// `POST /projects/:id/milestones/:index/edit`
pub async fn edit_milestone(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(u64, u64)>,
    Json(req): Json<EditRequest>,
) -> ApiResult<ActionResponse> {
    let edit = MilestoneEdit {
        amount: req.amount.as_deref().map(|a| state.amount(a)).transpose()?,
        starting_at: req.starting_at,
        ending_at: req.ending_at,
        tasks: req.tasks,
        approvers: req.approvers,
    };
    let outcome = state.actions.edit(id, index, &edit).await?;
    respond(&state, outcome)
}

/// Parse `1,2, 3`; blank entries are skipped and duplicates dropped.
fn parse_ids(raw: &str) -> Result<Vec<u64>, ValidationError> {
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = part
            .parse()
            .map_err(|_| ValidationError::InvalidId(part.to_string()))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
