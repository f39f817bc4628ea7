use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tower_cookies::{Cookie, Cookies};

use super::{created, ensure_matching_id, fetch_one, AppState};
use crate::error::{ApiError, ApiJson};
use crate::session::{Session, SESSION_COOKIE};
use crate::storage::Document;
use crate::user_models::{LoginRequest, NewUser, UserResponse, USERS};
use crate::user_storage::public_projection;

fn session_cookie(token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie
}

pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Document>>, ApiError> {
    let users = state
        .store
        .select_all(USERS, None, Some(&public_projection()))
        .await?;
    Ok(Json(users))
}

/// `POST /users` stores a record with a caller-chosen id.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if payload.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        return Err(ApiError::bad_request("expected id, none found"));
    }
    let user = state.users.create_user(payload).await?;
    Ok(created(&user.id))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    let user = fetch_one(&state, USERS, &id, Some(&public_projection()), "user").await?;
    Ok(Json(user))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<Document>,
) -> Result<Json<Document>, ApiError> {
    ensure_matching_id(&id, &body)?;
    state.users.update_user(&id, body).await?;

    let user = fetch_one(&state, USERS, &id, Some(&public_projection()), "user").await?;
    Ok(Json(user))
}

/// `POST /register`: like `POST /users` but the id is generated when absent.
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let user = state.users.create_user(payload).await?;
    Ok((StatusCode::CREATED, Json(UserResponse { id: user.id })))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.verify_login(&payload).await?;

    if let Some(previous) = cookies.get(SESSION_COOKIE) {
        state.sessions.close(previous.value()).await;
    }
    let token = state.sessions.open(&user.id, &user.username).await;
    cookies.add(session_cookie(token));

    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(UserResponse { id: user.id }))
}

pub async fn logout(State(state): State<Arc<AppState>>, cookies: Cookies) -> Json<Value> {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        if let Some(session) = state.sessions.close(cookie.value()).await {
            tracing::info!(user_id = %session.user_id, "user logged out");
        }
        cookies.remove(session_cookie(String::new()));
    }
    Json(json!({ "logged_out": true }))
}

pub async fn whoami(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> Result<Json<Session>, ApiError> {
    let not_logged_in = || ApiError::Unauthorized("not logged in".to_string());
    let token = cookies.get(SESSION_COOKIE).ok_or_else(not_logged_in)?;
    let session = state
        .sessions
        .get(token.value())
        .await
        .ok_or_else(not_logged_in)?;
    Ok(Json(session))
}
