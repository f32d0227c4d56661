//! User mutation endpoints.
//!
//! Mutation order matters: the live engine registries are updated first
//! (`UserSync`), the fingerprint mirror second (`ConfigManager`). A crash in
//! between leaves the mirror behind the engine, which the next push repairs
//! through the restart decision.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use xnode_engine::{build_user_for_inbound, CipherType, InboundProfile, UserData, UserSync};

use crate::metrics;
use crate::response::{ok, wrap, OpOutcome};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/add-user", post(handle_add_user))
        .route("/add-users", post(handle_add_users))
        .route("/remove-user", post(handle_remove_user))
        .route("/remove-users", post(handle_remove_users))
        .route("/get-inbound-users", post(handle_get_inbound_users))
        .route("/get-inbound-users-count", post(handle_get_inbound_users_count))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserInboundData {
    pub tag: String,
    pub username: String,
    #[serde(rename = "type")]
    pub protocol: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub flow: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub cipher_type: String,
    #[serde(default)]
    pub iv_check: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserHashData {
    #[serde(default)]
    pub vless_uuid: String,
    #[serde(default)]
    pub prev_vless_uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserRequest {
    pub data: Vec<AddUserInboundData>,
    #[serde(default)]
    pub hash_data: AddUserHashData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUserData {
    pub user_id: String,
    #[serde(default)]
    pub hash_uuid: String,
    #[serde(default)]
    pub vless_uuid: String,
    #[serde(default)]
    pub trojan_password: String,
    #[serde(default)]
    pub ss_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkInboundData {
    pub tag: String,
    #[serde(rename = "type")]
    pub protocol: String,
    #[serde(default)]
    pub flow: String,
    #[serde(default)]
    pub cipher_type: String,
    #[serde(default)]
    pub iv_check: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUserEntry {
    pub user_data: BulkUserData,
    pub inbound_data: Vec<BulkInboundData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUsersRequest {
    #[serde(default)]
    pub affected_inbound_tags: Vec<String>,
    pub users: Vec<BulkUserEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveUserHashData {
    #[serde(default)]
    pub vless_uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveUserRequest {
    pub username: String,
    #[serde(default)]
    pub hash_data: RemoveUserHashData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRemoveUserEntry {
    pub user_id: String,
    #[serde(default)]
    pub hash_uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveUsersRequest {
    pub users: Vec<BulkRemoveUserEntry>,
}

#[derive(Debug, Deserialize)]
pub struct InboundTagRequest {
    pub tag: String,
}

#[derive(Debug, Serialize)]
pub struct InboundUsersResponse {
    pub users: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InboundUsersCountResponse {
    pub count: usize,
}

fn bad_request(err: impl std::fmt::Display) -> Response {
    wrap(
        StatusCode::BAD_REQUEST,
        OpOutcome::failure(format!("invalid request body: {err}")),
    )
}

fn engine_unavailable() -> Response {
    wrap(
        StatusCode::SERVICE_UNAVAILABLE,
        OpOutcome::failure("engine not available"),
    )
}

fn inbound_profile(tag: &str, protocol: &str, flow: &str, cipher: &str, iv_check: bool) -> InboundProfile {
    InboundProfile {
        protocol: protocol.to_owned(),
        tag: tag.to_owned(),
        flow: flow.to_owned(),
        cipher: Some(CipherType::parse(cipher)),
        iv_check,
    }
}

async fn handle_add_user(
    State(state): State<AppState>,
    payload: Result<Json<AddUserRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            error!(error = %e, "failed to parse add-user request");
            return bad_request(e);
        }
    };

    if req.data.is_empty() {
        return wrap(
            StatusCode::BAD_REQUEST,
            OpOutcome::failure("no inbound data provided"),
        );
    }

    let Some(instance) = state.engine.instance() else {
        return engine_unavailable();
    };
    let sync = UserSync::new(instance);

    let username = req.data[0].username.clone();
    let all_tags = state.config.tracked_tags();

    // The add doubles as an update: sweep any previous identity out of the
    // engine and the mirror before re-adding.
    sync.remove_user_from_all_inbounds(&all_tags, &username);

    let hash_to_remove = if req.hash_data.prev_vless_uuid.is_empty() {
        &req.hash_data.vless_uuid
    } else {
        &req.hash_data.prev_vless_uuid
    };
    if !hash_to_remove.is_empty() {
        for tag in &all_tags {
            state.config.remove_user_from_inbound(tag, hash_to_remove);
        }
    }

    for data in &req.data {
        let user_data = UserData {
            user_id: data.username.clone(),
            vless_uuid: data.uuid.clone(),
            trojan_password: if data.protocol == "trojan" {
                data.password.clone()
            } else {
                String::new()
            },
            ss_password: if data.protocol == "shadowsocks" {
                data.password.clone()
            } else {
                String::new()
            },
            ..Default::default()
        };

        let profile = inbound_profile(&data.tag, &data.protocol, &data.flow, &data.cipher_type, data.iv_check);
        let Some(user) = build_user_for_inbound(&profile, &user_data) else {
            error!(protocol = %data.protocol, inbound = %data.tag, "unsupported protocol, user skipped");
            continue;
        };

        if let Err(e) = sync.add_user(&data.tag, user) {
            error!(inbound = %data.tag, user = %data.username, error = %e, "failed to add user to inbound");
            return wrap(
                StatusCode::INTERNAL_SERVER_ERROR,
                OpOutcome::failure(format!("failed to add user: {e}")),
            );
        }
    }

    if !req.hash_data.vless_uuid.is_empty() {
        for data in &req.data {
            state.config.add_user_to_inbound(&data.tag, &req.hash_data.vless_uuid);
        }
    }

    metrics::record_user_op("add");
    info!(user = %username, inbounds = req.data.len(), "user added");
    ok(OpOutcome::success())
}

async fn handle_add_users(
    State(state): State<AppState>,
    payload: Result<Json<AddUsersRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            error!(error = %e, "failed to parse add-users request");
            return bad_request(e);
        }
    };

    if req.users.is_empty() {
        return ok(OpOutcome::success());
    }

    let Some(instance) = state.engine.instance() else {
        return engine_unavailable();
    };
    let sync = UserSync::new(instance);

    let all_tags = if req.affected_inbound_tags.is_empty() {
        state.config.tracked_tags()
    } else {
        req.affected_inbound_tags.clone()
    };

    for entry in &req.users {
        let username = &entry.user_data.user_id;
        let hash_uuid = &entry.user_data.hash_uuid;

        sync.remove_user_from_all_inbounds(&all_tags, username);
        if !hash_uuid.is_empty() {
            for tag in &all_tags {
                state.config.remove_user_from_inbound(tag, hash_uuid);
            }
        }

        for data in &entry.inbound_data {
            let user_data = UserData {
                user_id: username.clone(),
                hash_uuid: entry.user_data.hash_uuid.clone(),
                vless_uuid: entry.user_data.vless_uuid.clone(),
                trojan_password: entry.user_data.trojan_password.clone(),
                ss_password: entry.user_data.ss_password.clone(),
            };

            let profile =
                inbound_profile(&data.tag, &data.protocol, &data.flow, &data.cipher_type, data.iv_check);
            let Some(user) = build_user_for_inbound(&profile, &user_data) else {
                error!(protocol = %data.protocol, inbound = %data.tag, "unsupported protocol, user skipped");
                continue;
            };

            if let Err(e) = sync.add_user(&data.tag, user) {
                error!(inbound = %data.tag, user = %username, error = %e, "failed to add user during bulk add");
                return wrap(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    OpOutcome::failure(format!("failed to add user: {e}")),
                );
            }

            if !hash_uuid.is_empty() {
                state.config.add_user_to_inbound(&data.tag, hash_uuid);
            }
        }
    }

    metrics::record_user_op("add");
    info!(count = req.users.len(), "bulk users added");
    ok(OpOutcome::success())
}

async fn handle_remove_user(
    State(state): State<AppState>,
    payload: Result<Json<RemoveUserRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            error!(error = %e, "failed to parse remove-user request");
            return bad_request(e);
        }
    };

    let Some(instance) = state.engine.instance() else {
        return engine_unavailable();
    };
    let sync = UserSync::new(instance);

    let all_tags = state.config.tracked_tags();
    sync.remove_user_from_all_inbounds(&all_tags, &req.username);

    if !req.hash_data.vless_uuid.is_empty() {
        for tag in &all_tags {
            state.config.remove_user_from_inbound(tag, &req.hash_data.vless_uuid);
        }
    }

    metrics::record_user_op("remove");
    info!(user = %req.username, "user removed");
    ok(OpOutcome::success())
}

async fn handle_remove_users(
    State(state): State<AppState>,
    payload: Result<Json<RemoveUsersRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            error!(error = %e, "failed to parse remove-users request");
            return bad_request(e);
        }
    };

    if req.users.is_empty() {
        return ok(OpOutcome::success());
    }

    let Some(instance) = state.engine.instance() else {
        return engine_unavailable();
    };
    let sync = UserSync::new(instance);

    let all_tags = state.config.tracked_tags();
    for entry in &req.users {
        sync.remove_user_from_all_inbounds(&all_tags, &entry.user_id);
        if !entry.hash_uuid.is_empty() {
            for tag in &all_tags {
                state.config.remove_user_from_inbound(tag, &entry.hash_uuid);
            }
        }
    }

    metrics::record_user_op("remove");
    info!(count = req.users.len(), "bulk users removed");
    ok(OpOutcome::success())
}

async fn handle_get_inbound_users(
    State(state): State<AppState>,
    payload: Result<Json<InboundTagRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            error!(error = %e, "failed to parse get-inbound-users request");
            return bad_request(e);
        }
    };

    let users = match state.engine.instance() {
        Some(instance) => match instance.user_registry(&req.tag) {
            Ok(registry) => registry.users(),
            Err(e) => {
                warn!(inbound = %req.tag, error = %e, "inbound users unavailable");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    ok(InboundUsersResponse { users })
}

async fn handle_get_inbound_users_count(
    State(state): State<AppState>,
    payload: Result<Json<InboundTagRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            error!(error = %e, "failed to parse get-inbound-users-count request");
            return bad_request(e);
        }
    };

    let count = match state.engine.instance() {
        Some(instance) => match instance.user_registry(&req.tag) {
            Ok(registry) => registry.len(),
            Err(_) => 0,
        },
        None => 0,
    };

    ok(InboundUsersCountResponse { count })
}
