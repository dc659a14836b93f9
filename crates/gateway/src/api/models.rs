//! Model listing endpoint.
//!
//! `GET /v1/models?course_name=X` returns the enabled models grouped by
//! provider. Every known provider key appears — empty-but-present, never
//! missing — so clients can rely on a stable key set.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use cg_domain::model::ModelDescriptor;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub course_name: String,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let listing: BTreeMap<String, Vec<ModelDescriptor>> = state
        .dispatcher
        .registry()
        .list_enabled(&query.course_name)
        .into_iter()
        .map(|(kind, models)| (kind.key().to_string(), models))
        .collect();

    Json(listing).into_response()
}
