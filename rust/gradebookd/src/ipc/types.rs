use crate::grades::GradeBook;
use crate::settings::Settings;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Sidecar state: the last loaded grade snapshot and bulletin settings. Nothing derived
/// from the snapshot is kept here.
#[derive(Debug, Default)]
pub struct AppState {
    pub settings: Settings,
    pub book: Option<GradeBook>,
    pub snapshot_hash: Option<String>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            book: None,
            snapshot_hash: None,
        }
    }
}
