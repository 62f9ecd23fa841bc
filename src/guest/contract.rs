//! Guest ABI contract constants — the fixed set of names, kinds, and
//! thresholds every guest module and the host agree on.

/// The host's own contract version. A guest whose `contract_version()`
/// export returns anything else fails instantiation.
pub const CONTRACT_VERSION: i32 = 1;

pub const EXPORT_CONTRACT_VERSION: &str = "contract_version";
pub const EXPORT_MICROTASK_STEP: &str = "microtask_step";
pub const EXPORT_ALLOC: &str = "alloc";
pub const EXPORT_FREE: &str = "free";
pub const EXPORT_INIT: &str = "init";
pub const EXPORT_ON_GESTURE: &str = "on_gesture";
pub const EXPORT_ON_HTTP_REQUEST: &str = "on_http_request";
pub const EXPORT_ON_WIFI_EVENT: &str = "on_wifi_event";
pub const EXPORT_SHUTDOWN: &str = "shutdown";

pub const REQUIRED_EXPORTS: &[&str] = &[
    EXPORT_CONTRACT_VERSION,
    EXPORT_MICROTASK_STEP,
    EXPORT_ALLOC,
    EXPORT_FREE,
];

pub const OPTIONAL_EXPORTS: &[&str] = &[
    EXPORT_INIT,
    EXPORT_ON_GESTURE,
    EXPORT_ON_HTTP_REQUEST,
    EXPORT_ON_WIFI_EVENT,
    EXPORT_SHUTDOWN,
];

/// Touch-synthesis thresholds (SPEC_FULL.md §4.2).
pub const TAP_MAX_DURATION_MS: u32 = 250;
pub const TAP_MAX_MOVE_PX: f32 = 8.0;
pub const LONG_PRESS_MIN_DURATION_MS: u32 = 500;
pub const FLICK_MIN_DISTANCE_PX: f32 = 24.0;
pub const FLICK_MAX_DURATION_MS: u32 = 250;

pub const HTTP_FLAG_BODY_TRUNCATED: u32 = 1;

/// "launcher" and "settings" are the only non-UUID app ids accepted.
pub const EMBEDDED_APP_LAUNCHER: &str = "launcher";
pub const EMBEDDED_APP_SETTINGS: &str = "settings";

/// 36 chars, lowercase hex, dashes at 8/13/18/23 — the only other accepted
/// app id form (SPEC_FULL.md §4.4).
pub fn is_valid_uuid_app_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        let is_dash_pos = matches!(i, 8 | 13 | 18 | 23);
        if is_dash_pos {
            if b != b'-' {
                return false;
            }
        } else if !b.is_ascii_hexdigit() || b.is_ascii_uppercase() {
            return false;
        }
    }
    true
}

/// Any of the three accepted app-id forms.
pub fn is_valid_app_id(id: &str) -> bool {
    id == EMBEDDED_APP_LAUNCHER || id == EMBEDDED_APP_SETTINGS || is_valid_uuid_app_id(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_valid() {
        assert!(is_valid_app_id("launcher"));
        assert!(is_valid_app_id("settings"));
    }

    #[test]
    fn well_formed_uuid_is_valid() {
        assert!(is_valid_app_id("0123abcd-ef01-2345-6789-abcdef012345"));
    }

    #[test]
    fn uppercase_hex_is_rejected() {
        assert!(!is_valid_app_id("0123ABCD-ef01-2345-6789-abcdef012345"));
    }

    #[test]
    fn wrong_dash_positions_rejected() {
        assert!(!is_valid_app_id("0123abcde-f01-2345-6789-abcdef012345"));
    }

    #[test]
    fn arbitrary_strings_are_rejected() {
        assert!(!is_valid_app_id("../etc/passwd"));
        assert!(!is_valid_app_id(""));
        assert!(!is_valid_app_id("LAUNCHER"));
    }
}
