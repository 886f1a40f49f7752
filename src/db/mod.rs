pub mod learning;

use std::path::{Path, PathBuf};

pub const DEFAULT_SQLITE_PATH: &str = "var/backend/tutor.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub app_db_path: PathBuf,
}

impl DbConfig {
    pub fn new(app_db_path: impl Into<PathBuf>) -> Self {
        Self {
            app_db_path: app_db_path.into(),
        }
    }
}

pub fn resolve_db_config(app_root: &Path, sqlite_path: Option<&str>) -> DbConfig {
    let sqlite_raw = sqlite_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| String::from(DEFAULT_SQLITE_PATH));
    let sqlite_candidate = PathBuf::from(sqlite_raw);
    let sqlite_abs = if sqlite_candidate.is_absolute() {
        sqlite_candidate
    } else {
        app_root.join(sqlite_candidate)
    };
    DbConfig::new(sqlite_abs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_sqlite_path_resolves_under_app_root() {
        let cfg = resolve_db_config(Path::new("/tmp/repo"), Some("data/app.db"));
        assert_eq!(cfg.app_db_path, PathBuf::from("/tmp/repo/data/app.db"));
    }

    #[test]
    fn blank_sqlite_path_falls_back_to_default() {
        let cfg = resolve_db_config(Path::new("/tmp/repo"), Some("   "));
        assert_eq!(
            cfg.app_db_path,
            PathBuf::from("/tmp/repo/var/backend/tutor.db")
        );
    }

    #[test]
    fn absolute_sqlite_path_is_kept() {
        let cfg = resolve_db_config(Path::new("/tmp/repo"), Some("/srv/tutor.db"));
        assert_eq!(cfg.app_db_path, PathBuf::from("/srv/tutor.db"));
    }
}
