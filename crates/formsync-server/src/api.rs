use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use formsync::{Connection, FormState};
use serde::Serialize;

use crate::AppState;

// ── API types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    pub forms: usize,
    pub watched_forms: usize,
    pub replicas: Vec<ReplicaEntry>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReplicaEntry {
    pub label: String,
    pub open: bool,
    pub queued: usize,
}

// ── API handlers ────────────────────────────────────────────────────

pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(build_status(&state))
}

pub async fn list_forms(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(build_form_list(&state))
}

pub async fn get_form(
    State(state): State<Arc<AppState>>,
    Path(form): Path<String>,
) -> impl IntoResponse {
    match state.store.get(&form) {
        Some(form) => Json(form).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "form not found"})),
        )
            .into_response(),
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub(crate) fn build_status(state: &AppState) -> StatusResponse {
    StatusResponse {
        forms: state.store.len(),
        watched_forms: state.store.registry().form_count(),
        replicas: state
            .replication
            .channels()
            .iter()
            .map(|channel| ReplicaEntry {
                label: channel.label().to_string(),
                open: channel.is_open(),
                queued: channel.queued(),
            })
            .collect(),
    }
}

pub(crate) fn build_form_list(state: &AppState) -> Vec<FormState> {
    let mut forms = state.store.all();
    forms.sort_by(|a, b| a.form.cmp(&b.form));
    forms
}

#[cfg(test)]
mod tests {
    use super::*;
    use formsync::memory::MemoryConnection;
    use formsync::ConnectionRef;

    fn origin() -> ConnectionRef {
        Arc::new(MemoryConnection::new("test"))
    }

    #[tokio::test]
    async fn status_counts_forms() {
        let state = AppState::new(&Default::default());
        let origin = origin();
        state.store.update(FormState::new("b", 1, 1), &origin);
        state.store.update(FormState::new("a", 2, 1), &origin);

        let status = build_status(&state);
        assert_eq!(status.forms, 2);
        assert_eq!(status.watched_forms, 0);
        assert!(status.replicas.is_empty());
    }

    #[tokio::test]
    async fn form_list_is_sorted_by_name() {
        let state = AppState::new(&Default::default());
        let origin = origin();
        state.store.update(FormState::new("zeta", 1, 1), &origin);
        state.store.update(FormState::new("alpha", 2, 1), &origin);

        let names: Vec<_> = build_form_list(&state)
            .into_iter()
            .map(|f| f.form)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
