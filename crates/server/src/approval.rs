//! Approval routes.
//!
//! HTML Endpoints:
//! - `GET  /approve?token=..&action=..`      : decision page behind an emailed link
//! - `POST /approve`                          : form submit from that page
//!
//! JSON API Endpoints (`*` needs the admin key in `x-api-key` or `Authorization: Bearer`):
//! - `POST /api/v1/requests`                * : submit a request and route it to level 1
//! - `GET  /api/v1/approval?token=..`         : where the request behind a link stands
//! - `POST /api/v1/approval`                  : approve or reject through a link token
//! - `GET  /api/v1/approval-levels`         * : the configured ladder
//! - `PUT  /api/v1/approval-levels`         * : add or replace one level

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Html,
    routing::get,
    Form, Json, Router,
};
use ladder_core::domain::approval::ApprovalAction;
use ladder_core::domain::level::ApprovalLevelConfig;
use ladder_core::domain::request::{ArtifactRef, NewApprovalRequest, RequestId};
use ladder_core::errors::{ActionReply, InterfaceError};
use ladder_core::policy::save_level_config;
use ladder_core::ports::LevelConfigStore;
use ladder_core::routing::{ActionResponse, ApprovalStatusView, Submission};
use ladder_core::{AuditContext, RoutingEngine};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::{error, info};
use uuid::Uuid;

use crate::admin::{AdminCaller, ADMIN_ACTOR};

const CORRELATION_HEADER: &str = "x-correlation-id";
const LINK_ACTOR: &str = "approval-link";
const UNKNOWN_FORM_ACTION: &str = "Choose approve or reject, then submit the form again.";

#[derive(Clone)]
pub struct ApprovalState {
    pub engine: RoutingEngine,
    pub levels: Arc<dyn LevelConfigStore>,
    pub max_levels: u32,
    pub templates: Arc<Tera>,
    pub admin_api_key: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequestBody {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub submitted_by: String,
    pub total_amount: Decimal,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub approved_destination: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
    #[serde(default)]
    pub action: Option<String>,
}

/// Shared by the JSON endpoint and the HTML form.
#[derive(Debug, Deserialize)]
pub struct ActionBody {
    pub token: String,
    pub action: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn init_templates() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_template(
        "approve.html",
        include_str!("../../../templates/approval/approve.html"),
    )?;
    tera.add_raw_template("result.html", include_str!("../../../templates/approval/result.html"))?;
    Ok(tera)
}

pub fn router(state: ApprovalState) -> Router {
    Router::new()
        .route("/approve", get(approval_page).post(submit_decision_form))
        .route("/api/v1/requests", axum::routing::post(submit_request))
        .route("/api/v1/approval", get(approval_status).post(act_on_link))
        .route("/api/v1/approval-levels", get(list_levels).put(save_level))
        .with_state(state)
}

pub(crate) fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn interface_error(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    let message = match &error {
        InterfaceError::BadRequest { message, .. } => message.clone(),
        _ => error.user_message().to_string(),
    };
    if status.is_server_error() {
        error!(
            event_name = "approval.api.unavailable",
            correlation_id = %error.correlation_id(),
            error = %error,
            "approval api request failed"
        );
    }
    (status, Json(ApiError { error: message, correlation_id: error.correlation_id().to_string() }))
}

fn reply_status(reply: ActionReply) -> StatusCode {
    match reply {
        ActionReply::SuccessAdvance | ActionReply::SuccessFinal => StatusCode::OK,
        ActionReply::AlreadyProcessed => StatusCode::CONFLICT,
        ActionReply::InvalidLink => StatusCode::BAD_REQUEST,
        ActionReply::ExpiredLink => StatusCode::GONE,
        ActionReply::GenericError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse_action(body: ActionBody, cid: &str) -> ApiResult<(String, ApprovalAction)> {
    match ApprovalAction::parse(&body.action, body.comment) {
        Some(action) => Ok((body.token, action)),
        None => Err(interface_error(InterfaceError::BadRequest {
            message: format!("unknown action `{}` (expected approve|reject)", body.action),
            correlation_id: cid.to_string(),
        })),
    }
}

// ---------------------------------------------------------------------------
// JSON API Handlers
// ---------------------------------------------------------------------------

async fn submit_request(
    _admin: AdminCaller,
    State(state): State<ApprovalState>,
    headers: HeaderMap,
    Json(body): Json<SubmitRequestBody>,
) -> ApiResult<(StatusCode, Json<Submission>)> {
    let cid = correlation_id(&headers);
    let audit = AuditContext::new(cid.clone(), body.submitted_by.trim());
    let submission = NewApprovalRequest {
        id: body.id.map(RequestId).unwrap_or_else(RequestId::generate),
        title: body.title,
        submitted_by: body.submitted_by,
        total_amount: body.total_amount,
        artifacts: body.artifacts,
        approved_destination: body.approved_destination,
    };

    let submitted = state
        .engine
        .submit(submission, &audit)
        .await
        .map_err(|error| interface_error(error.into_interface(cid.clone())))?;

    info!(
        event_name = "approval.api.submitted",
        correlation_id = %cid,
        request_id = %submitted.request.id,
        max_level = submitted.approval.max_level,
        "request submitted"
    );
    Ok((StatusCode::CREATED, Json(submitted)))
}

async fn approval_status(
    State(state): State<ApprovalState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Json<ApprovalStatusView>> {
    let cid = correlation_id(&headers);
    state
        .engine
        .approval_status(&query.token)
        .await
        .map(Json)
        .map_err(|error| interface_error(error.into_interface(cid)))
}

async fn act_on_link(
    State(state): State<ApprovalState>,
    headers: HeaderMap,
    Json(body): Json<ActionBody>,
) -> ApiResult<(StatusCode, Json<ActionResponse>)> {
    let cid = correlation_id(&headers);
    let (token, action) = parse_action(body, &cid)?;
    let response =
        state.engine.respond_to_token(&token, action, &AuditContext::new(cid, LINK_ACTOR)).await;
    Ok((reply_status(response.reply), Json(response)))
}

async fn list_levels(
    _admin: AdminCaller,
    State(state): State<ApprovalState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ApprovalLevelConfig>>> {
    let cid = correlation_id(&headers);
    state.levels.all_levels().await.map(Json).map_err(|error| {
        interface_error(InterfaceError::ServiceUnavailable {
            message: error.to_string(),
            correlation_id: cid,
        })
    })
}

async fn save_level(
    _admin: AdminCaller,
    State(state): State<ApprovalState>,
    headers: HeaderMap,
    Json(config): Json<ApprovalLevelConfig>,
) -> ApiResult<Json<Vec<ApprovalLevelConfig>>> {
    let cid = correlation_id(&headers);
    let audit = AuditContext::new(cid.clone(), ADMIN_ACTOR);
    let sink = state.engine.audit_sink();
    save_level_config(state.levels.as_ref(), config, state.max_levels, sink.as_ref(), &audit)
        .await
        .map(Json)
        .map_err(|error| interface_error(error.into_interface(cid)))
}

// ---------------------------------------------------------------------------
// HTML Handlers
// ---------------------------------------------------------------------------

fn render(templates: &Tera, name: &str, context: &Context) -> (StatusCode, Html<String>) {
    match templates.render(name, context) {
        Ok(html) => (StatusCode::OK, Html(html)),
        Err(error) => {
            error!(error = %error, template = name, "approval template render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Html("<p>Something went wrong.</p>".to_string()))
        }
    }
}

async fn approval_page(
    State(state): State<ApprovalState>,
    Query(query): Query<TokenQuery>,
) -> (StatusCode, Html<String>) {
    let mut context = Context::new();
    context.insert("token", &query.token);
    context.insert("action", query.action.as_deref().unwrap_or("approve"));

    let status = match state.engine.approval_status(&query.token).await {
        Ok(view) => {
            context.insert("view", &Some(view));
            context.insert("message", "");
            StatusCode::OK
        }
        Err(error) => {
            let reply = ActionReply::from_error(&error);
            context.insert("view", &Option::<ApprovalStatusView>::None);
            context.insert("message", reply.user_message());
            reply_status(reply)
        }
    };

    let (render_status, html) = render(&state.templates, "approve.html", &context);
    (if render_status.is_success() { status } else { render_status }, html)
}

async fn submit_decision_form(
    State(state): State<ApprovalState>,
    headers: HeaderMap,
    Form(body): Form<ActionBody>,
) -> (StatusCode, Html<String>) {
    let cid = correlation_id(&headers);
    let Some(action) = ApprovalAction::parse(&body.action, body.comment) else {
        let mut context = Context::new();
        context.insert("success", &false);
        context.insert("message", UNKNOWN_FORM_ACTION);
        let (render_status, html) = render(&state.templates, "result.html", &context);
        let status =
            if render_status.is_success() { StatusCode::BAD_REQUEST } else { render_status };
        return (status, html);
    };
    let response = state
        .engine
        .respond_to_token(&body.token, action, &AuditContext::new(cid, LINK_ACTOR))
        .await;

    let context = match Context::from_serialize(&response) {
        Ok(context) => context,
        Err(error) => {
            error!(error = %error, "approval result context failed");
            Context::new()
        }
    };
    let (render_status, html) = render(&state.templates, "result.html", &context);
    let status = reply_status(response.reply);
    (if render_status.is_success() { status } else { render_status }, html)
}
