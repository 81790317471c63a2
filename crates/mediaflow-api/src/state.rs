use mediaflow_services::UploadIntentIssuer;
use std::sync::Arc;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<UploadIntentIssuer>,
}

impl AppState {
    pub fn new(issuer: Arc<UploadIntentIssuer>) -> Self {
        Self { issuer }
    }
}
