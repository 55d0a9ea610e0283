//! Transport capability detection.

use crate::models::TransportMode;
use std::sync::OnceLock;

/// Facilities the streaming transport depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub blob_construction: bool,
    pub file_slice: bool,
    pub streaming_body: bool,
}

impl Capabilities {
    /// Capabilities of the current build target, computed once per process.
    pub fn detect() -> Self {
        static DETECTED: OnceLock<Capabilities> = OnceLock::new();
        *DETECTED.get_or_init(|| Capabilities {
            blob_construction: true,
            file_slice: true,
            // reqwest cannot stream request bodies from wasm32.
            streaming_body: cfg!(not(target_arch = "wasm32")),
        })
    }

    pub fn legacy_only() -> Self {
        Self {
            blob_construction: false,
            file_slice: false,
            streaming_body: false,
        }
    }

    pub fn for_mode(mode: TransportMode) -> Self {
        match mode {
            TransportMode::Auto => Self::detect(),
            TransportMode::Legacy => Self::legacy_only(),
        }
    }

    pub fn supports_streaming_upload(&self) -> bool {
        self.blob_construction && self.file_slice && self.streaming_body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_build_supports_streaming() {
        assert!(Capabilities::detect().supports_streaming_upload());
        assert_eq!(Capabilities::detect(), Capabilities::detect());
    }

    #[test]
    fn test_any_missing_facility_disables_streaming() {
        let full = Capabilities::detect();
        let no_slice = Capabilities {
            file_slice: false,
            ..full
        };
        let no_body = Capabilities {
            streaming_body: false,
            ..full
        };

        assert!(!no_slice.supports_streaming_upload());
        assert!(!no_body.supports_streaming_upload());
        assert!(!Capabilities::legacy_only().supports_streaming_upload());
    }

    #[test]
    fn test_legacy_mode_forces_form_transport() {
        assert!(!Capabilities::for_mode(TransportMode::Legacy).supports_streaming_upload());
        assert!(Capabilities::for_mode(TransportMode::Auto).supports_streaming_upload());
    }
}
