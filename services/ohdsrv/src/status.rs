//! Device status state machine
//!
//! ```text
//!            fault 0->1                 any fault edge
//!   Active ─────────────► Failed     OutOfService ─────► (ignored)
//!     ▲                     │
//!     └─────────────────────┘
//!            fault 1->0
//! ```
//!
//! `Error` is the initial "unknown" state. A fault edge moves it into
//! `Active`/`Failed`; nothing moves a device back into `Error`.

use std::fmt;

/// Operational status reported in `opStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceStatus {
    Active,
    #[default]
    Error,
    Failed,
    OutOfService,
}

impl DeviceStatus {
    /// Wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "Active",
            DeviceStatus::Error => "Error",
            DeviceStatus::Failed => "Failed",
            DeviceStatus::OutOfService => "OutofService",
        }
    }

    /// Decode a configured `opStatus`. Unrecognized text decodes to `Error`,
    /// which counts as "unset".
    pub fn decode(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("Active") {
            DeviceStatus::Active
        } else if value.eq_ignore_ascii_case("OutofService") {
            DeviceStatus::OutOfService
        } else if value.eq_ignore_ascii_case("Failed") {
            DeviceStatus::Failed
        } else {
            DeviceStatus::Error
        }
    }

    /// Status after the fault line settles at `level`.
    ///
    /// Returns `None` when the status does not change, including every edge
    /// seen while out of service.
    pub fn on_fault_level(self, level: bool) -> Option<Self> {
        if self == DeviceStatus::OutOfService {
            return None;
        }
        let next = if level {
            DeviceStatus::Failed
        } else {
            DeviceStatus::Active
        };
        (next != self).then_some(next)
    }

    /// Administrative fail toggle: Failed goes back to Active, anything else
    /// goes to Failed
    pub fn toggled_fail(self) -> Self {
        if self == DeviceStatus::Failed {
            DeviceStatus::Active
        } else {
            DeviceStatus::Failed
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DeviceStatus; 4] = [
        DeviceStatus::Active,
        DeviceStatus::Error,
        DeviceStatus::Failed,
        DeviceStatus::OutOfService,
    ];

    #[test]
    fn test_decode_is_case_insensitive() {
        assert_eq!(DeviceStatus::decode("active"), DeviceStatus::Active);
        assert_eq!(DeviceStatus::decode("OUTOFSERVICE"), DeviceStatus::OutOfService);
        assert_eq!(DeviceStatus::decode(" Failed "), DeviceStatus::Failed);
        assert_eq!(DeviceStatus::decode("broken"), DeviceStatus::Error);
        assert_eq!(DeviceStatus::decode(""), DeviceStatus::Error);
    }

    #[test]
    fn test_wire_names_round_trip() {
        for status in ALL {
            assert_eq!(DeviceStatus::decode(status.as_str()), status);
        }
    }

    #[test]
    fn test_out_of_service_is_sticky() {
        assert_eq!(DeviceStatus::OutOfService.on_fault_level(true), None);
        assert_eq!(DeviceStatus::OutOfService.on_fault_level(false), None);
    }

    #[test]
    fn test_fault_transitions() {
        assert_eq!(
            DeviceStatus::Active.on_fault_level(true),
            Some(DeviceStatus::Failed)
        );
        assert_eq!(
            DeviceStatus::Failed.on_fault_level(false),
            Some(DeviceStatus::Active)
        );
        assert_eq!(
            DeviceStatus::Error.on_fault_level(false),
            Some(DeviceStatus::Active)
        );
        // No-op edges produce no transition
        assert_eq!(DeviceStatus::Active.on_fault_level(false), None);
        assert_eq!(DeviceStatus::Failed.on_fault_level(true), None);
    }

    #[test]
    fn test_never_reenters_error() {
        for status in ALL {
            for level in [false, true] {
                assert_ne!(status.on_fault_level(level), Some(DeviceStatus::Error));
            }
            assert_ne!(status.toggled_fail(), DeviceStatus::Error);
        }
    }

    #[test]
    fn test_toggle_fail() {
        assert_eq!(DeviceStatus::Failed.toggled_fail(), DeviceStatus::Active);
        assert_eq!(DeviceStatus::Active.toggled_fail(), DeviceStatus::Failed);
        assert_eq!(DeviceStatus::Error.toggled_fail(), DeviceStatus::Failed);
    }
}
