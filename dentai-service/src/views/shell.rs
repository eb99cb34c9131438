//! Workspace shell: owns the single mounted view and routes actions to it.

use super::chat::{ChatSnapshot, ChatView};
use super::dashboard::{DashboardSnapshot, DashboardView};
use super::imaging::{ImagingSnapshot, ImagingView};
use super::referrals::{ReferralMapView, ReferralSnapshot, ReportedLocation};
use super::research::{ResearchSnapshot, ResearchView};
use super::{ViewError, ViewKind, ViewLifetime};
use crate::models::Coordinate;
use crate::services::metrics;
use crate::services::{ChatSessionFactory, ClinicGateway};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::Instrument;
use uuid::Uuid;

/// A user action addressed to the mounted view.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ViewAction {
    RefreshSummary,
    UploadImage { image: String },
    EditImage { instruction: String },
    Search { query: String },
    FindPlaces { query: String },
    SendMessage { text: String },
}

impl ViewAction {
    pub fn name(&self) -> &'static str {
        match self {
            ViewAction::RefreshSummary => "refresh_summary",
            ViewAction::UploadImage { .. } => "upload_image",
            ViewAction::EditImage { .. } => "edit_image",
            ViewAction::Search { .. } => "search",
            ViewAction::FindPlaces { .. } => "find_places",
            ViewAction::SendMessage { .. } => "send_message",
        }
    }

    /// The view this action belongs to.
    pub fn target(&self) -> ViewKind {
        match self {
            ViewAction::RefreshSummary => ViewKind::Dashboard,
            ViewAction::UploadImage { .. } | ViewAction::EditImage { .. } => ViewKind::Imaging,
            ViewAction::Search { .. } => ViewKind::Research,
            ViewAction::FindPlaces { .. } => ViewKind::Referrals,
            ViewAction::SendMessage { .. } => ViewKind::Assistant,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ViewSnapshot {
    Dashboard(DashboardSnapshot),
    Imaging(ImagingSnapshot),
    Research(ResearchSnapshot),
    Referrals(ReferralSnapshot),
    Assistant(ChatSnapshot),
}

#[derive(Clone)]
pub enum MountedView {
    Dashboard(Arc<DashboardView>),
    Imaging(Arc<ImagingView>),
    Research(Arc<ResearchView>),
    Referrals(Arc<ReferralMapView>),
    Assistant(Arc<ChatView>),
}

impl MountedView {
    pub fn kind(&self) -> ViewKind {
        match self {
            MountedView::Dashboard(_) => ViewKind::Dashboard,
            MountedView::Imaging(_) => ViewKind::Imaging,
            MountedView::Research(_) => ViewKind::Research,
            MountedView::Referrals(_) => ViewKind::Referrals,
            MountedView::Assistant(_) => ViewKind::Assistant,
        }
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        match self {
            MountedView::Dashboard(view) => ViewSnapshot::Dashboard(view.snapshot()),
            MountedView::Imaging(view) => ViewSnapshot::Imaging(view.snapshot()),
            MountedView::Research(view) => ViewSnapshot::Research(view.snapshot()),
            MountedView::Referrals(view) => ViewSnapshot::Referrals(view.snapshot()),
            MountedView::Assistant(view) => ViewSnapshot::Assistant(view.snapshot()),
        }
    }
}

struct Mounted {
    view: MountedView,
    lifetime: ViewLifetime,
}

/// Per-client shell. Exactly one view is mounted at a time; sibling views
/// never share state.
pub struct Workspace {
    id: Uuid,
    created_at: DateTime<Utc>,
    gateway: ClinicGateway,
    chat_factory: Arc<dyn ChatSessionFactory>,
    default_location: Coordinate,
    mounted: Mutex<Mounted>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Open a workspace with the dashboard mounted. Must be called within a
    /// tokio runtime, since mounting starts the dashboard summary request.
    pub fn open(
        gateway: ClinicGateway,
        chat_factory: Arc<dyn ChatSessionFactory>,
        default_location: Coordinate,
    ) -> Self {
        let id = Uuid::new_v4();
        let mounted = Self::mount(
            id,
            &gateway,
            chat_factory.as_ref(),
            default_location,
            ViewKind::Dashboard,
            None,
        );

        Self {
            id,
            created_at: Utc::now(),
            gateway,
            chat_factory,
            default_location,
            mounted: Mutex::new(mounted),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn mounted(&self) -> MutexGuard<'_, Mounted> {
        self.mounted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_view(&self) -> ViewKind {
        self.mounted().view.kind()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.mounted().view.snapshot()
    }

    fn mount(
        workspace_id: Uuid,
        gateway: &ClinicGateway,
        chat_factory: &dyn ChatSessionFactory,
        default_location: Coordinate,
        kind: ViewKind,
        location: Option<Coordinate>,
    ) -> Mounted {
        let lifetime = ViewLifetime::new(kind);
        let span = tracing::info_span!("view", %workspace_id, view = %kind);

        let view = match kind {
            ViewKind::Dashboard => {
                let view = Arc::new(DashboardView::new(gateway.clone(), lifetime.clone()));
                let task = view.clone();
                tokio::spawn(
                    async move {
                        if let Err(e) = task.load_summary().await {
                            tracing::debug!(error = %e, "Dashboard summary abandoned");
                        }
                    }
                    .instrument(span),
                );
                MountedView::Dashboard(view)
            }
            ViewKind::Imaging => {
                MountedView::Imaging(Arc::new(ImagingView::new(gateway.clone(), lifetime.clone())))
            }
            ViewKind::Research => {
                MountedView::Research(Arc::new(ResearchView::new(gateway.clone(), lifetime.clone())))
            }
            ViewKind::Referrals => {
                let view = Arc::new(ReferralMapView::new(
                    gateway.clone(),
                    lifetime.clone(),
                    default_location,
                ));
                let task = view.clone();
                let source = ReportedLocation(location);
                tokio::spawn(
                    async move {
                        if let Err(e) = task.acquire_location(&source).await {
                            tracing::debug!(error = %e, "Location lookup abandoned");
                        }
                    }
                    .instrument(span),
                );
                MountedView::Referrals(view)
            }
            ViewKind::Assistant => {
                MountedView::Assistant(Arc::new(ChatView::mount(chat_factory, lifetime.clone())))
            }
        };

        Mounted { view, lifetime }
    }

    /// Switch to `kind`, disposing the mounted view. Navigating to the view
    /// that is already mounted keeps it as is.
    pub fn navigate(&self, kind: ViewKind, location: Option<Coordinate>) -> ViewSnapshot {
        let mut mounted = self.mounted();
        if mounted.view.kind() != kind {
            let previous = mounted.view.kind();
            mounted.lifetime.dispose();
            *mounted = Self::mount(
                self.id,
                &self.gateway,
                self.chat_factory.as_ref(),
                self.default_location,
                kind,
                location,
            );
            tracing::info!(workspace_id = %self.id, from = %previous, to = %kind, "View switched");
        }
        mounted.view.snapshot()
    }

    /// Run `action` against the mounted view and return its new state.
    pub async fn dispatch(&self, action: ViewAction) -> Result<ViewSnapshot, ViewError> {
        let view = self.mounted().view.clone();
        let kind = view.kind();

        let result = Self::apply(&view, &action).await;
        let outcome = match &result {
            Ok(()) => "ok",
            Err(e) => e.outcome(),
        };
        metrics::record_view_action(kind.as_str(), outcome);

        result.map(|()| view.snapshot())
    }

    async fn apply(view: &MountedView, action: &ViewAction) -> Result<(), ViewError> {
        match (view, action) {
            (MountedView::Dashboard(view), ViewAction::RefreshSummary) => {
                view.load_summary().await.map(drop)
            }
            (MountedView::Imaging(view), ViewAction::UploadImage { image }) => view.upload(image),
            (MountedView::Imaging(view), ViewAction::EditImage { instruction }) => {
                view.edit(instruction).await.map(drop)
            }
            (MountedView::Research(view), ViewAction::Search { query }) => {
                view.search(query).await.map(drop)
            }
            (MountedView::Referrals(view), ViewAction::FindPlaces { query }) => {
                view.find_places(query).await.map(drop)
            }
            (MountedView::Assistant(view), ViewAction::SendMessage { text }) => {
                view.send(text).await.map(drop)
            }
            (view, action) => Err(ViewError::WrongView {
                action: action.name(),
                mounted: view.kind(),
            }),
        }
    }

    /// Dispose the mounted view; in-flight work is abandoned.
    pub fn close(&self) {
        let mounted = self.mounted();
        mounted.lifetime.dispose();
        tracing::info!(workspace_id = %self.id, view = %mounted.view.kind(), "Workspace closed");
    }

    pub fn is_closed(&self) -> bool {
        self.mounted().lifetime.is_disposed()
    }
}
