use super::{require_input, RequestSlot, RequestState, ViewError, ViewKind, ViewLifetime};
use crate::models::{Coordinate, GroundedAnswer};
use crate::services::ClinicGateway;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub const LOCATION_DENIED_WARNING: &str = "Location access denied. Results may not be nearby.";
pub const PLACES_FAILED: &str = "Error finding locations.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location access denied")]
    Denied,

    #[error("Location unavailable: {0}")]
    Unavailable(String),
}

/// Where the referral map gets the user's position from.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(&self) -> Result<Coordinate, LocationError>;
}

/// The position a client reported when opening the map; `None` means the
/// client refused to share it.
#[derive(Debug, Clone, Copy)]
pub struct ReportedLocation(pub Option<Coordinate>);

#[async_trait]
impl LocationSource for ReportedLocation {
    async fn current_position(&self) -> Result<Coordinate, LocationError> {
        match self.0 {
            Some(coordinate) if coordinate.is_valid() => Ok(coordinate),
            Some(coordinate) => Err(LocationError::Unavailable(format!(
                "coordinate out of range: {}, {}",
                coordinate.lat, coordinate.lng
            ))),
            None => Err(LocationError::Denied),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LocationState {
    coordinate: Option<Coordinate>,
    warning: Option<String>,
}

pub struct ReferralMapView {
    gateway: ClinicGateway,
    lifetime: ViewLifetime,
    default_location: Coordinate,
    location_requested: AtomicBool,
    location: Mutex<LocationState>,
    places: RequestSlot<GroundedAnswer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralSnapshot {
    pub location: Option<Coordinate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_warning: Option<String>,
    pub places: RequestState<GroundedAnswer>,
}

impl ReferralMapView {
    pub fn new(gateway: ClinicGateway, lifetime: ViewLifetime, default_location: Coordinate) -> Self {
        debug_assert_eq!(lifetime.kind(), ViewKind::Referrals);
        Self {
            gateway,
            places: RequestSlot::new(lifetime.clone()),
            lifetime,
            default_location,
            location_requested: AtomicBool::new(false),
            location: Mutex::new(LocationState::default()),
        }
    }

    fn location(&self) -> MutexGuard<'_, LocationState> {
        self.location.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the user's position once per mount. Any failure falls back to
    /// the configured default coordinate and raises the denial warning.
    pub async fn acquire_location(&self, source: &dyn LocationSource) -> Result<(), ViewError> {
        if self.location_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let resolved = self.lifetime.run(source.current_position()).await?;
        let mut location = self.location();
        self.lifetime.ensure_active()?;

        match resolved {
            Ok(coordinate) => {
                location.coordinate = Some(coordinate);
                location.warning = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to default location");
                location.coordinate = Some(self.default_location);
                location.warning = Some(LOCATION_DENIED_WARNING.to_string());
            }
        }
        Ok(())
    }

    /// Search nearby places, biased towards whatever position is known now.
    pub async fn find_places(&self, query: &str) -> Result<RequestState<GroundedAnswer>, ViewError> {
        require_input("query", query)?;
        let coordinate = self.location().coordinate;

        self.places
            .run(self.gateway.find_places(query, coordinate), PLACES_FAILED)
            .await
    }

    pub fn snapshot(&self) -> ReferralSnapshot {
        let location = self.location().clone();
        ReferralSnapshot {
            location: location.coordinate,
            location_warning: location.warning,
            places: self.places.snapshot(),
        }
    }
}
