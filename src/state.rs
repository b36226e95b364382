use crate::services::{progress::ProgressTracker, slide_service::SlideService};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub slides: SlideService,
    pub progress: ProgressTracker,
}

impl AppState {
    pub fn new(slides: SlideService) -> Self {
        Self {
            slides,
            progress: ProgressTracker::new(),
        }
    }
}
