//! Servo engine preferences for the kiosk surface.
//!
//! Builds a [`servo::Preferences`] struct from the surface capabilities:
//! - Thread pools sized to available CPU cores (clamped)
//! - Plain HTTP allowed, the UI is served from loopback
//! - Developer tools server only when the capability is on
//! - Device APIs a kiosk has no use for disabled

use tracing::info;

use crate::host::SurfaceCapabilities;

/// Builds Servo `Preferences` for the kiosk surface.
#[allow(clippy::field_reassign_with_default)]
pub fn build_servo_preferences(capabilities: &SurfaceCapabilities) -> servo::Preferences {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as i64)
        .unwrap_or(4);

    let mut prefs = servo::Preferences::default();

    // ── Performance Tuning ────────────────────────────────────────────────
    prefs.layout_threads = cpus.min(8);
    prefs.threadpools_async_runtime_workers_max = (cpus * 2).min(16);
    prefs.threadpools_image_cache_workers_max = cpus.min(8);
    prefs.threadpools_webrender_workers_max = (cpus / 2).clamp(2, 8);
    prefs.threadpools_resource_workers_max = cpus.min(8);
    prefs.gfx_precache_shaders = true;

    // ── Network ───────────────────────────────────────────────────────────
    // The bundle and the API live on http://127.0.0.1.
    prefs.network_enforce_tls_enabled = false;
    prefs.network_mime_sniff = false;
    // A redeployed bundle must win over the cache; the URL also carries a
    // cache-busting query.
    prefs.network_http_cache_size = 0;

    // ── Surface capabilities ──────────────────────────────────────────────
    prefs.devtools_server_enabled = capabilities.devtools;

    // ── Device APIs ───────────────────────────────────────────────────────
    prefs.dom_geolocation_enabled = false;
    prefs.dom_bluetooth_enabled = false;
    prefs.dom_notification_enabled = false;
    prefs.dom_webrtc_enabled = false;

    info!(
        cpus,
        layout_threads = prefs.layout_threads,
        network_workers = prefs.threadpools_async_runtime_workers_max,
        devtools = prefs.devtools_server_enabled,
        "Servo preferences configured (kiosk)"
    );

    prefs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_layout_threads_bounded() {
        let prefs = build_servo_preferences(&SurfaceCapabilities::default());
        assert!(prefs.layout_threads >= 1);
        assert!(prefs.layout_threads <= 8);
    }

    #[test]
    fn test_preferences_allow_loopback_http() {
        let prefs = build_servo_preferences(&SurfaceCapabilities::default());
        assert!(!prefs.network_enforce_tls_enabled);
        assert!(!prefs.network_mime_sniff);
    }

    #[test]
    fn test_preferences_devtools_follow_capability() {
        let on = SurfaceCapabilities {
            devtools: true,
            ..SurfaceCapabilities::default()
        };
        let off = SurfaceCapabilities {
            devtools: false,
            ..SurfaceCapabilities::default()
        };
        assert!(build_servo_preferences(&on).devtools_server_enabled);
        assert!(!build_servo_preferences(&off).devtools_server_enabled);
    }

    #[test]
    fn test_preferences_device_apis_disabled() {
        let prefs = build_servo_preferences(&SurfaceCapabilities::default());
        assert!(!prefs.dom_geolocation_enabled);
        assert!(!prefs.dom_bluetooth_enabled);
        assert!(!prefs.dom_webrtc_enabled);
        assert!(!prefs.dom_notification_enabled);
    }

    #[test]
    fn test_preferences_webrender_workers_bounded() {
        let prefs = build_servo_preferences(&SurfaceCapabilities::default());
        assert!(prefs.threadpools_webrender_workers_max >= 2);
        assert!(prefs.threadpools_webrender_workers_max <= 8);
    }
}
