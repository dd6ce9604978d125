use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("route is not tracked: {0}")]
    UntrackedRoute(String),

    #[error("visit_id must not be empty")]
    EmptyVisitId,

    #[error("unknown device type: {0}")]
    InvalidDevice(String),

    #[error("visit store lock poisoned")]
    LockPoisoned,
}
