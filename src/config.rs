//! Persisted user settings (lives in the OS config directory).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::io::{CsvTemplateSource, HttpTemplateSource, TemplateSource, UnconfiguredSource};

const DATABASE_FILE: &str = "spchart.sqlite";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// JSON endpoint serving the template sheet.
    pub template_url: Option<String>,
    /// CSV export of the template sheet, used when no URL is set.
    pub template_csv: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub log_filter: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            template_url: None,
            template_csv: None,
            database_path: None,
            refresh_interval_secs: 30,
            request_timeout_secs: 15,
            log_filter: "spchart=info".into(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "spchart", "Spchart")
}

impl AppSettings {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        project_dirs()
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load from the default location and apply environment overrides.
    /// Unreadable settings fall back to the defaults. Problems are returned
    /// rather than logged, since this runs before tracing is set up.
    pub fn load() -> (Self, Vec<ConfigError>) {
        Self::load_with(Self::default_path(), |key| std::env::var(key).ok())
    }

    fn load_with(
        path: Result<PathBuf, ConfigError>,
        var: impl Fn(&str) -> Option<String>,
    ) -> (Self, Vec<ConfigError>) {
        let mut problems = Vec::new();
        let mut settings = path.and_then(|p| Self::load_from(&p)).unwrap_or_else(|e| {
            problems.push(e);
            Self::default()
        });
        problems.extend(settings.apply_env(var));
        (settings, problems)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::default_path()?;
        self.save_to(&path)?;
        tracing::info!(path = %path.display(), "settings saved");
        Ok(path)
    }

    /// Override fields from `SPCHART_*` variables. Values that do not parse
    /// are skipped and returned.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        if let Some(url) = var("SPCHART_TEMPLATE_URL").filter(|v| !v.trim().is_empty()) {
            self.template_url = Some(url);
        }
        if let Some(csv) = var("SPCHART_TEMPLATE_CSV").filter(|v| !v.trim().is_empty()) {
            self.template_csv = Some(PathBuf::from(csv));
        }
        if let Some(db) = var("SPCHART_DATABASE").filter(|v| !v.trim().is_empty()) {
            self.database_path = Some(PathBuf::from(db));
        }
        if let Some(secs) = var("SPCHART_REFRESH_SECS") {
            match secs.trim().parse() {
                Ok(secs) => self.refresh_interval_secs = secs,
                Err(_) => problems.push(ConfigError::InvalidEnv {
                    key: "SPCHART_REFRESH_SECS",
                    value: secs,
                }),
            }
        }
        problems
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_dir().join(DATABASE_FILE))
                .unwrap_or_else(|| PathBuf::from(DATABASE_FILE))
        })
    }

    /// Zero disables auto-refresh.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// The configured template source. The URL wins over the CSV path.
    pub fn template_source(&self) -> Arc<dyn TemplateSource> {
        if let Some(url) = self.template_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            match HttpTemplateSource::new(url, self.request_timeout()) {
                Ok(source) => return Arc::new(source),
                Err(e) => tracing::error!(error = %e, "could not build HTTP template client"),
            }
        }
        match &self.template_csv {
            Some(path) => Arc::new(CsvTemplateSource::new(path.clone())),
            None => Arc::new(UnconfiguredSource),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.refresh_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            template_url: Some("https://example.com/template".into()),
            refresh_interval_secs: 0,
            ..Default::default()
        };
        settings.save_to(&path).unwrap();
        let loaded = AppSettings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.refresh_interval(), None);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "request_timeout_secs": 5 }"#).unwrap();
        let loaded = AppSettings::load_from(&path).unwrap();
        assert_eq!(loaded.request_timeout_secs, 5);
        assert_eq!(loaded.log_filter, "spchart=info");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppSettings::load_from(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("SPCHART_TEMPLATE_CSV", "/tmp/template.csv"),
            ("SPCHART_DATABASE", "/tmp/db.sqlite"),
            ("SPCHART_REFRESH_SECS", "60"),
            ("SPCHART_TEMPLATE_URL", "  "),
        ]
        .into_iter()
        .collect();
        let mut settings = AppSettings::default();
        let problems = settings.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert!(problems.is_empty());

        assert_eq!(settings.template_csv, Some(PathBuf::from("/tmp/template.csv")));
        assert_eq!(settings.database_path(), PathBuf::from("/tmp/db.sqlite"));
        assert_eq!(settings.refresh_interval_secs, 60);
        assert_eq!(settings.template_url, None);
    }

    #[test]
    fn bad_refresh_override_is_ignored() {
        let mut settings = AppSettings::default();
        let problems =
            settings.apply_env(|k| (k == "SPCHART_REFRESH_SECS").then(|| "soon".to_string()));
        assert_eq!(settings.refresh_interval_secs, 30);
        assert!(matches!(
            problems.as_slice(),
            [ConfigError::InvalidEnv { key: "SPCHART_REFRESH_SECS", value }] if value == "soon"
        ));
    }

    #[test]
    fn load_returns_problems_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let (settings, problems) = AppSettings::load_with(Ok(path), |k| {
            (k == "SPCHART_REFRESH_SECS").then(|| "-5".to_string())
        });
        assert_eq!(settings, AppSettings::default());
        assert_eq!(problems.len(), 2);
        assert!(matches!(problems[0], ConfigError::Json(_)));
        assert!(matches!(problems[1], ConfigError::InvalidEnv { .. }));

        let (settings, problems) =
            AppSettings::load_with(Err(ConfigError::NoConfigDir), |k| {
                (k == "SPCHART_DATABASE").then(|| "/tmp/db.sqlite".to_string())
            });
        assert_eq!(settings.database_path(), PathBuf::from("/tmp/db.sqlite"));
        assert!(matches!(problems.as_slice(), [ConfigError::NoConfigDir]));
    }

    #[test]
    fn unconfigured_source_by_default() {
        let source = AppSettings::default().template_source();
        assert!(source.fetch().is_err());
    }
}
