use crate::models::Coordinate;
use crate::startup::AppState;
use crate::views::{ViewAction, ViewError, ViewKind, ViewSnapshot, Workspace};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct LocationDto {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NavigateRequest {
    pub view: ViewKind,
    /// Absent when the client denied location access.
    #[validate(nested)]
    pub location: Option<LocationDto>,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceResponse {
    pub workspace_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub mounted: ViewSnapshot,
}

impl WorkspaceResponse {
    fn new(workspace: &Workspace, mounted: ViewSnapshot) -> Self {
        Self {
            workspace_id: workspace.id(),
            created_at: workspace.created_at(),
            mounted,
        }
    }
}

impl From<ViewError> for AppError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::Busy(_) | ViewError::Disposed(_) => AppError::Conflict(err.into()),
            ViewError::InvalidInput(_) | ViewError::WrongView { .. } => {
                AppError::BadRequest(err.into())
            }
        }
    }
}

fn find(state: &AppState, id: Uuid) -> Result<Arc<Workspace>, AppError> {
    state
        .workspaces
        .get(&id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Workspace {} not found", id)))
}

#[tracing::instrument(skip(state))]
pub async fn create_workspace(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<WorkspaceResponse>), AppError> {
    let workspace = state.workspaces.open()?;
    let response = WorkspaceResponse::new(&workspace, workspace.snapshot());
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkspaceResponse>, AppError> {
    let workspace = find(&state, id)?;
    Ok(Json(WorkspaceResponse::new(&workspace, workspace.snapshot())))
}

#[tracing::instrument(skip(state, req), fields(view = %req.view))]
pub async fn navigate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<NavigateRequest>,
) -> Result<Json<WorkspaceResponse>, AppError> {
    req.validate()?;
    let workspace = find(&state, id)?;

    let location = req.location.map(|l| Coordinate { lat: l.lat, lng: l.lng });
    let mounted = workspace.navigate(req.view, location);
    Ok(Json(WorkspaceResponse::new(&workspace, mounted)))
}

#[tracing::instrument(skip(state, action), fields(action = action.name()))]
pub async fn dispatch_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(action): Json<ViewAction>,
) -> Result<Json<WorkspaceResponse>, AppError> {
    let workspace = find(&state, id)?;
    let action_name = action.name();

    let mounted = workspace.dispatch(action).await.map_err(|e| {
        tracing::info!(workspace_id = %id, action = action_name, error = %e, "Action rejected");
        e
    })?;
    Ok(Json(WorkspaceResponse::new(&workspace, mounted)))
}

#[tracing::instrument(skip(state))]
pub async fn close_workspace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.workspaces.close(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(anyhow::anyhow!("Workspace {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_conflict() {
        let err: AppError = ViewError::Busy(ViewKind::Research).into();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn invalid_input_maps_to_bad_request() {
        let err: AppError = ViewError::InvalidInput("query must not be empty".to_string()).into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn out_of_range_location_fails_validation() {
        let req: NavigateRequest = serde_json::from_value(serde_json::json!({
            "view": "referrals",
            "location": {"lat": 95.0, "lng": 0.0}
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let req: NavigateRequest =
            serde_json::from_value(serde_json::json!({"view": "referrals"})).unwrap();
        assert!(req.validate().is_ok());
    }
}
