use std::fmt;
use std::str::FromStr;

/// The value stored at `STATE:V` for a volume.
///
/// Stored and compared as strings in the replicated store; this type is the
/// Rust-side typed view so call sites in the watcher and Metadata API never
/// juggle string literals directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeState {
    /// Metadata exists, no host currently serves SMB for this volume.
    Ready,
    /// Exactly one host has won a transition (claims serve/release).
    Intermediate,
    /// Exactly one host is serving SMB; clients may mount.
    Mounted,
    /// A transition failed; operator intervention required.
    Error,
    /// Opaque to the core; reserved for external volume drivers.
    Creating,
    /// Opaque to the core; reserved for external volume drivers.
    Deleting,
}

impl VolumeState {
    pub const fn as_str(self) -> &'static str {
        match self {
            VolumeState::Ready => "Ready",
            VolumeState::Intermediate => "Intermediate",
            VolumeState::Mounted => "Mounted",
            VolumeState::Error => "Error",
            VolumeState::Creating => "Creating",
            VolumeState::Deleting => "Deleting",
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a raw string does not match a known `VolumeState`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized volume state {0:?}")]
pub struct UnknownVolumeState(pub String);

impl FromStr for VolumeState {
    type Err = UnknownVolumeState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ready" => Ok(VolumeState::Ready),
            "Intermediate" => Ok(VolumeState::Intermediate),
            "Mounted" => Ok(VolumeState::Mounted),
            "Error" => Ok(VolumeState::Error),
            "Creating" => Ok(VolumeState::Creating),
            "Deleting" => Ok(VolumeState::Deleting),
            other => Err(UnknownVolumeState(other.to_string())),
        }
    }
}

/// Validates the opaque-identifier rule for volume names: non-empty, no
/// embedded NUL, no embedded forward-slash.
pub fn validate_volume_name(name: &str) -> Result<(), crate::error::CoreError> {
    if name.is_empty() || name.contains('\0') || name.contains('/') {
        return Err(crate::error::CoreError::InvalidVolumeName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_strings() {
        for s in [
            VolumeState::Ready,
            VolumeState::Intermediate,
            VolumeState::Mounted,
            VolumeState::Error,
            VolumeState::Creating,
            VolumeState::Deleting,
        ] {
            assert_eq!(s.as_str().parse::<VolumeState>().unwrap(), s);
        }
    }

    #[test]
    fn rejects_unknown_state() {
        assert!("Frobnicating".parse::<VolumeState>().is_err());
    }

    #[test]
    fn volume_name_validation() {
        assert!(validate_volume_name("my-volume").is_ok());
        assert!(validate_volume_name("").is_err());
        assert!(validate_volume_name("a/b").is_err());
        assert!(validate_volume_name("a\0b").is_err());
    }
}
