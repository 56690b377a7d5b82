use thiserror::Error;

/// The error taxonomy for the distributed coordination core.
///
/// `TransitionLost` (a CAS that simply lost a race) is deliberately not a
/// variant here. It is a boolean outcome of the state machine, not an
/// error, and is logged at `info` by the caller instead.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The topology oracle could not be reached.
    #[error("orchestrator unavailable: {0}")]
    OrchestratorUnavailable(String),

    /// The topology oracle has no leader to report.
    #[error("no cluster leader is currently known")]
    NoLeader,

    /// The locally-spawned store did not come up within the poll window.
    #[error("local store did not become reachable within the bootstrap window")]
    BootstrapTimeout,

    /// A store RPC failed or timed out.
    #[error("replicated store unavailable: {0}")]
    StoreUnavailable(String),

    /// All keys requested in a `ReadVolMetadata` call were missing.
    #[error("volume does not exist: {0}")]
    VolumeDoesNotExist(String),

    /// Some, but not all, of a volume's keys were missing on read. This is
    /// an invariant violation and is always treated as fatal by callers.
    #[error("metadata corrupt for volume {0}: expected {1} keys, found {2}")]
    MetadataCorrupt(String, usize, usize),

    /// The external SMB controller reported failure starting or stopping.
    #[error("smb controller failed to {action} volume {volume}")]
    SmbFailure { volume: String, action: &'static str },

    /// A volume name failed the opaque-identifier validation rule in the
    /// data model (non-empty, no NUL, no `/`).
    #[error("invalid volume name {0:?}")]
    InvalidVolumeName(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
