use serde::{Deserialize, Serialize};

/// Wire-level identity a rank announces to the hub during bootstrap.
///
/// Every field must agree with what the hub was configured with, otherwise the
/// join is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub rank: usize,
    pub local_rank: usize,
    pub world_size: usize,
}

/// Why a rank gave up on the group, carried by every abort notice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortCause {
    /// A collective, a link or a local step failed.
    #[default]
    Failure,
    /// A resource the whole group waits on could not be made available.
    Unavailable,
}
