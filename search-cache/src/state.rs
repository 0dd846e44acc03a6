use serde::Serialize;
use strum_macros::Display;

/// Lifecycle of the request behind the current cache key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// What a consumer renders: status, last data and last error message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestState<T> {
    pub status: RequestStatus,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> Default for RequestState<T> {
    fn default() -> Self {
        Self {
            status: RequestStatus::Idle,
            data: None,
            error: None,
        }
    }
}

impl<T> RequestState<T> {
    pub fn is_loading(&self) -> bool {
        self.status == RequestStatus::Loading
    }

    /// Previous data stays visible while the new request is running
    pub(crate) fn start_loading(&mut self) {
        self.status = RequestStatus::Loading;
        self.error = None;
    }

    pub(crate) fn succeed(&mut self, data: T) {
        self.status = RequestStatus::Success;
        self.data = Some(data);
        self.error = None;
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.status = RequestStatus::Error;
        self.data = None;
        self.error = Some(message);
    }
}
