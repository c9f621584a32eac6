use rollcall_core::{paths, MatchPolicy, DEFAULT_TOLERANCE};
use std::path::PathBuf;

/// Engine configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Parent of the per-roster enrollment image directories.
    pub gallery_root: PathBuf,
    /// Maximum encoding distance for a positive match.
    pub tolerance: f32,
    pub match_policy: MatchPolicy,
    /// Detection runs on frames downscaled by this factor.
    pub detect_scale: f32,
    /// Administrator secret guarding enrollment. Unset disables enrollment.
    pub admin_secret: Option<String>,
    pub auth_attempts: u32,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let match_policy = match std::env::var("ROLLCALL_MATCH_POLICY") {
            Ok(raw) => raw.parse::<MatchPolicy>().unwrap_or_else(|e| {
                tracing::warn!(value = %raw, error = %e, "ignoring ROLLCALL_MATCH_POLICY");
                MatchPolicy::default()
            }),
            Err(_) => MatchPolicy::default(),
        };

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_width: env_u32("ROLLCALL_CAMERA_WIDTH", 1280),
            camera_height: env_u32("ROLLCALL_CAMERA_HEIGHT", 720),
            model_dir: env_path("ROLLCALL_MODEL_DIR")
                .unwrap_or_else(rollcall_vision::default_model_dir),
            db_path: env_path("ROLLCALL_DB_PATH")
                .unwrap_or_else(paths::default_db_path),
            gallery_root: env_path("ROLLCALL_GALLERY_ROOT")
                .unwrap_or_else(paths::default_gallery_root),
            tolerance: env_f32("ROLLCALL_TOLERANCE", DEFAULT_TOLERANCE),
            match_policy,
            detect_scale: env_f32("ROLLCALL_DETECT_SCALE", 0.25),
            admin_secret: std::env::var("ROLLCALL_ADMIN_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            auth_attempts: env_u32("ROLLCALL_AUTH_ATTEMPTS", 3),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_helpers_fall_back_on_garbage() {
        std::env::set_var("ROLLCALL_TEST_F32", "not-a-number");
        assert_eq!(env_f32("ROLLCALL_TEST_F32", 0.5), 0.5);
        std::env::set_var("ROLLCALL_TEST_F32", "0.35");
        assert_eq!(env_f32("ROLLCALL_TEST_F32", 0.5), 0.35);

        assert_eq!(env_u32("ROLLCALL_TEST_UNSET_U32", 3), 3);
    }

    #[test]
    fn test_env_path_ignores_empty() {
        std::env::set_var("ROLLCALL_TEST_EMPTY_PATH", "");
        assert!(env_path("ROLLCALL_TEST_EMPTY_PATH").is_none());
        std::env::set_var("ROLLCALL_TEST_PATH", "/srv/rollcall.db");
        assert_eq!(
            env_path("ROLLCALL_TEST_PATH"),
            Some(PathBuf::from("/srv/rollcall.db"))
        );
    }
}
