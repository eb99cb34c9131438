use super::{RequestSlot, RequestState, ViewError, ViewKind, ViewLifetime};
use crate::models::{schedule_listing, Appointment, QuickStat, DAILY_SCHEDULE, QUICK_STATS};
use crate::services::ClinicGateway;
use serde::Serialize;
use std::convert::Infallible;

/// Shown in place of the summary until the request settles.
pub const SUMMARY_LOADING: &str = "Analyzing schedule...";

pub struct DashboardView {
    gateway: ClinicGateway,
    summary: RequestSlot<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub quick_stats: Vec<QuickStat>,
    pub schedule: Vec<Appointment>,
    pub summary: String,
    pub summary_state: RequestState<String>,
}

impl DashboardView {
    pub fn new(gateway: ClinicGateway, lifetime: ViewLifetime) -> Self {
        debug_assert_eq!(lifetime.kind(), ViewKind::Dashboard);
        Self {
            gateway,
            summary: RequestSlot::new(lifetime),
        }
    }

    pub fn huddle_prompt() -> String {
        format!(
            "Review this dental schedule and give me a very brief, motivating 2-sentence summary \
             for the team morning huddle. Mention the most critical case. Schedule: {}",
            schedule_listing(&DAILY_SCHEDULE)
        )
    }

    /// Request the huddle summary. Provider failures surface as the
    /// gateway's fallback sentence, so the slot always settles to success.
    pub async fn load_summary(&self) -> Result<RequestState<String>, ViewError> {
        let prompt = Self::huddle_prompt();
        let request = async {
            Ok::<_, Infallible>(self.gateway.quick_summary_or_fallback(&prompt).await)
        };
        self.summary.run(request, SUMMARY_LOADING).await
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let summary_state = self.summary.snapshot();
        let summary = match &summary_state {
            RequestState::Succeeded { result } => result.clone(),
            RequestState::Failed { message } => message.clone(),
            RequestState::Idle | RequestState::Awaiting => SUMMARY_LOADING.to_string(),
        };

        DashboardSnapshot {
            quick_stats: QUICK_STATS.to_vec(),
            schedule: DAILY_SCHEDULE.to_vec(),
            summary,
            summary_state,
        }
    }
}
