pub mod progress;
pub mod slide_service;
