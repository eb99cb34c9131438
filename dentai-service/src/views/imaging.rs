use super::{require_input, RequestSlot, RequestState, ViewError, ViewKind, ViewLifetime};
use crate::models::DataUri;
use crate::services::ClinicGateway;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

pub const EDIT_FAILED: &str = "Failed to edit image. Please try again.";

pub struct ImagingView {
    gateway: ClinicGateway,
    selected: Mutex<Option<DataUri>>,
    preview: RequestSlot<Option<DataUri>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagingSnapshot {
    pub selected_image: Option<DataUri>,
    pub generated_image: Option<DataUri>,
    pub edit_state: RequestState<Option<DataUri>>,
}

impl ImagingView {
    pub fn new(gateway: ClinicGateway, lifetime: ViewLifetime) -> Self {
        debug_assert_eq!(lifetime.kind(), ViewKind::Imaging);
        Self {
            gateway,
            selected: Mutex::new(None),
            preview: RequestSlot::new(lifetime),
        }
    }

    fn selected(&self) -> Option<DataUri> {
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Select a new image from a data URI and clear any generated preview.
    pub fn upload(&self, image: &str) -> Result<(), ViewError> {
        let image = DataUri::parse(image).map_err(|e| ViewError::InvalidInput(e.to_string()))?;
        if !image.is_image() {
            return Err(ViewError::InvalidInput(format!(
                "expected an image, got {}",
                image.mime_type()
            )));
        }

        self.preview.reset()?;
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner) = Some(image);
        Ok(())
    }

    pub async fn edit(&self, instruction: &str) -> Result<RequestState<Option<DataUri>>, ViewError> {
        require_input("instruction", instruction)?;
        let image = self
            .selected()
            .ok_or_else(|| ViewError::InvalidInput("upload an image before editing".to_string()))?;

        self.preview
            .run(self.gateway.edit_image(&image, instruction), EDIT_FAILED)
            .await
    }

    pub fn snapshot(&self) -> ImagingSnapshot {
        let edit_state = self.preview.snapshot();
        ImagingSnapshot {
            selected_image: self.selected(),
            generated_image: edit_state.result().cloned().flatten(),
            edit_state,
        }
    }
}
