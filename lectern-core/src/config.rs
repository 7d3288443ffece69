//! Configuration and credential resolution.
//!
//! # Precedence (highest first)
//!
//! 1. explicit override passed by the caller (`--course-id`)
//! 2. environment (`LECTERN_*`)
//! 3. course config `<course_root>/lectern.yaml`
//! 4. stored course default `_course_metadata/defaults.json` (course id only)
//! 5. user config `~/.lectern/config.yaml`
//!
//! # API pattern
//!
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::layout::CourseLayout;

pub const ENV_COURSE_ID: &str = "LECTERN_COURSE_ID";
pub const ENV_API_URL: &str = "LECTERN_API_URL";
pub const ENV_API_KEY: &str = "LECTERN_API_KEY";
pub const ENV_CREDENTIAL_FILE: &str = "LECTERN_CREDENTIAL_FILE";
pub const ENV_PRUNE_APPLY: &str = "LECTERN_PRUNE_APPLY";
pub const ENV_PRUNE_ASSIGNMENTS: &str = "LECTERN_PRUNE_ASSIGNMENTS";
pub const ENV_WORKERS: &str = "LECTERN_WORKERS";
/// Newline-separated list of changed paths seeding an incremental run.
pub const ENV_CHANGED_FILES: &str = "LECTERN_CHANGED_FILES";

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_DEBOUNCE_SECS: f64 = 2.0;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RETRY_ATTEMPTS: u32 = 4;

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum IdValue {
    Int(u64),
    Str(String),
}

impl IdValue {
    fn into_string(self) -> String {
        match self {
            IdValue::Int(n) => n.to_string(),
            IdValue::Str(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PruneSection {
    apply: Option<bool>,
    assignments: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WatchSection {
    debounce_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct HttpSection {
    connect_timeout_secs: Option<u64>,
    read_timeout_secs: Option<u64>,
    upload_timeout_secs: Option<u64>,
    retry_attempts: Option<u32>,
}

/// Shape shared by `lectern.yaml` and `~/.lectern/config.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    course_id: Option<IdValue>,
    api_url: Option<String>,
    api_key: Option<String>,
    credential_file: Option<PathBuf>,
    global_root: Option<PathBuf>,
    workers: Option<usize>,
    #[serde(default)]
    prune: PruneSection,
    #[serde(default)]
    watch: WatchSection,
    #[serde(default)]
    http: HttpSection,
}

/// `_course_metadata/defaults.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
}

#[derive(Deserialize)]
struct DefaultsCompat {
    course_id: Option<IdValue>,
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Raw environment overrides, captured once so tests can inject their own.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub course_id: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub credential_file: Option<PathBuf>,
    pub prune_apply: Option<String>,
    pub prune_assignments: Option<String>,
    pub workers: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        EnvOverrides {
            course_id: var(ENV_COURSE_ID),
            api_url: var(ENV_API_URL),
            api_key: var(ENV_API_KEY),
            credential_file: var(ENV_CREDENTIAL_FILE).map(PathBuf::from),
            prune_apply: var(ENV_PRUNE_APPLY),
            prune_assignments: var(ENV_PRUNE_ASSIGNMENTS),
            workers: var(ENV_WORKERS),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Where the course id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseIdSource {
    Flag,
    Env,
    CourseConfig,
    StoredDefault,
    UserConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneSettings {
    /// When false the prune stage only reports.
    pub apply: bool,
    /// Gate for deleting remote assignments.
    pub assignments: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub upload_timeout: Duration,
    pub retry_attempts: u32,
}

/// Fully merged configuration for one course.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub course_id: Option<(String, CourseIdSource)>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub credential_file: PathBuf,
    pub global_root: Option<PathBuf>,
    pub workers: usize,
    pub prune: PruneSettings,
    pub debounce: Duration,
    pub http: HttpSettings,
}

/// API endpoint and token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Settings {
    /// Resolve the course id, letting `explicit` win over every stored source.
    pub fn course_id(&self, explicit: Option<&str>) -> Result<(String, CourseIdSource), CoreError> {
        if let Some(id) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
            return Ok((id.to_string(), CourseIdSource::Flag));
        }
        self.course_id.clone().ok_or(CoreError::CourseIdMissing)
    }

    /// Resolve API credentials: env/config values first, then the credentials file.
    pub fn credentials(&self) -> Result<Credentials, CoreError> {
        let (mut url, mut key) = (self.api_url.clone(), self.api_key.clone());
        if url.is_none() || key.is_none() {
            let path = &self.credential_file;
            let text = std::fs::read_to_string(path).map_err(|e| CoreError::Credentials {
                message: format!("cannot read {}: {e}", path.display()),
            })?;
            let (file_url, file_key) = parse_credentials(&text);
            url = url.or(file_url);
            key = key.or(file_key);
        }
        match (url, key) {
            (Some(api_url), Some(api_key)) => Ok(Credentials {
                api_url: api_url.trim_end_matches('/').to_string(),
                api_key,
            }),
            (None, _) => Err(CoreError::Credentials {
                message: "API_URL not set".to_string(),
            }),
            (_, None) => Err(CoreError::Credentials {
                message: "API_KEY not set".to_string(),
            }),
        }
    }
}

/// Parse `KEY=value` credential lines; quotes around values are stripped.
pub fn parse_credentials(text: &str) -> (Option<String>, Option<String>) {
    let mut url = None;
    let mut key = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else { continue };
        let value = v.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        match k.trim() {
            "API_URL" => url = Some(value),
            "API_KEY" => key = Some(value),
            _ => {}
        }
    }
    (url, key)
}

/// `<home>/.lectern/`
pub fn user_dir_at(home: &Path) -> PathBuf {
    home.join(".lectern")
}

/// Load and merge settings for `layout`.
pub fn load_settings_at(
    home: &Path,
    layout: &CourseLayout,
    env: &EnvOverrides,
) -> Result<Settings, CoreError> {
    let course = read_config(&layout.config_file())?;
    let user = read_config(&user_dir_at(home).join("config.yaml"))?;
    let stored = load_defaults(layout)?;

    let course_id = env
        .course_id
        .clone()
        .map(|id| (id.trim().to_string(), CourseIdSource::Env))
        .or_else(|| {
            course
                .course_id
                .clone()
                .map(|id| (id.into_string(), CourseIdSource::CourseConfig))
        })
        .or_else(|| {
            stored
                .course_id
                .clone()
                .map(|id| (id, CourseIdSource::StoredDefault))
        })
        .or_else(|| {
            user.course_id
                .clone()
                .map(|id| (id.into_string(), CourseIdSource::UserConfig))
        })
        .filter(|(id, _)| !id.is_empty());

    let workers = match env.workers.as_deref() {
        Some(raw) => raw.trim().parse::<usize>().map_err(|_| CoreError::InvalidEnv {
            var: ENV_WORKERS,
            value: raw.to_string(),
        })?,
        None => course.workers.or(user.workers).unwrap_or(DEFAULT_WORKERS),
    }
    .max(1);

    let prune = PruneSettings {
        apply: env_bool(ENV_PRUNE_APPLY, env.prune_apply.as_deref())?
            .or(course.prune.apply)
            .or(user.prune.apply)
            .unwrap_or(true),
        assignments: env_bool(ENV_PRUNE_ASSIGNMENTS, env.prune_assignments.as_deref())?
            .or(course.prune.assignments)
            .or(user.prune.assignments)
            .unwrap_or(true),
    };

    let debounce_secs = course
        .watch
        .debounce_secs
        .or(user.watch.debounce_secs)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .unwrap_or(DEFAULT_DEBOUNCE_SECS);

    let http = HttpSettings {
        connect_timeout: Duration::from_secs(
            course
                .http
                .connect_timeout_secs
                .or(user.http.connect_timeout_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        ),
        read_timeout: Duration::from_secs(
            course
                .http
                .read_timeout_secs
                .or(user.http.read_timeout_secs)
                .unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
        ),
        upload_timeout: Duration::from_secs(
            course
                .http
                .upload_timeout_secs
                .or(user.http.upload_timeout_secs)
                .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS),
        ),
        retry_attempts: course
            .http
            .retry_attempts
            .or(user.http.retry_attempts)
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS)
            .max(1),
    };

    let credential_file = env
        .credential_file
        .clone()
        .or_else(|| course.credential_file.clone())
        .or_else(|| user.credential_file.clone())
        .map(|p| expand_home(home, &p))
        .unwrap_or_else(|| user_dir_at(home).join("credentials.txt"));

    let global_root = course
        .global_root
        .clone()
        .map(|p| if p.is_relative() { layout.root().join(p) } else { p });

    Ok(Settings {
        course_id,
        api_url: env.api_url.clone().or(course.api_url).or(user.api_url),
        api_key: env.api_key.clone().or(course.api_key).or(user.api_key),
        credential_file,
        global_root,
        workers,
        prune,
        debounce: Duration::from_secs_f64(debounce_secs),
        http,
    })
}

/// [`load_settings_at`] convenience wrapper using `dirs::home_dir()`.
pub fn load_settings(layout: &CourseLayout, env: &EnvOverrides) -> Result<Settings, CoreError> {
    let home = dirs::home_dir().ok_or(CoreError::HomeNotFound)?;
    load_settings_at(&home, layout, env)
}

/// Read `_course_metadata/defaults.json`; empty defaults when absent.
pub fn load_defaults(layout: &CourseLayout) -> Result<CourseDefaults, CoreError> {
    let path = layout.defaults_file();
    if !path.is_file() {
        return Ok(CourseDefaults::default());
    }
    let text = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let compat: DefaultsCompat =
        serde_json::from_str(&text).map_err(|source| CoreError::Json { path, source })?;
    Ok(CourseDefaults {
        course_id: compat.course_id.map(IdValue::into_string),
    })
}

/// Persist the course default atomically (`.tmp` + rename).
pub fn save_defaults(layout: &CourseLayout, defaults: &CourseDefaults) -> Result<(), CoreError> {
    let path = layout.defaults_file();
    let dir = layout.metadata_dir();
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let json = serde_json::to_string_pretty(defaults).map_err(|source| CoreError::Json {
        path: path.clone(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<ConfigFile, CoreError> {
    if !path.is_file() {
        return Ok(ConfigFile::default());
    }
    let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if text.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(&text).map_err(|source| CoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn env_bool(var: &'static str, raw: Option<&str>) -> Result<Option<bool>, CoreError> {
    let Some(raw) = raw else { return Ok(None) };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(CoreError::InvalidEnv {
            var,
            value: raw.to_string(),
        }),
    }
}

fn expand_home(home: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn course(tmp: &TempDir) -> CourseLayout {
        let root = tmp.path().join("course");
        std::fs::create_dir_all(&root).expect("mkdir course");
        CourseLayout::new(root)
    }

    #[test]
    fn defaults_apply_when_nothing_configured() {
        let home = TempDir::new().expect("home");
        let layout = course(&home);
        let s = load_settings_at(home.path(), &layout, &EnvOverrides::default()).expect("load");
        assert!(s.course_id.is_none());
        assert_eq!(s.workers, 4);
        assert!(s.prune.apply && s.prune.assignments);
        assert_eq!(s.debounce, Duration::from_secs(2));
        assert_eq!(s.http.upload_timeout, Duration::from_secs(120));
        assert_eq!(s.credential_file, home.path().join(".lectern").join("credentials.txt"));
    }

    #[test]
    fn course_id_precedence_env_config_defaults_user() {
        let home = TempDir::new().expect("home");
        let layout = course(&home);
        std::fs::create_dir_all(user_dir_at(home.path())).expect("mkdir user");
        std::fs::write(user_dir_at(home.path()).join("config.yaml"), "course_id: 4\n")
            .expect("user cfg");

        let load = |env: &EnvOverrides| {
            load_settings_at(home.path(), &layout, env)
                .expect("load")
                .course_id
                .expect("course id")
        };

        assert_eq!(load(&EnvOverrides::default()), ("4".into(), CourseIdSource::UserConfig));

        save_defaults(&layout, &CourseDefaults { course_id: Some("3".into()) }).expect("save");
        assert_eq!(load(&EnvOverrides::default()), ("3".into(), CourseIdSource::StoredDefault));

        std::fs::write(layout.config_file(), "course_id: 2\n").expect("course cfg");
        assert_eq!(load(&EnvOverrides::default()), ("2".into(), CourseIdSource::CourseConfig));

        let env = EnvOverrides {
            course_id: Some("1".into()),
            ..EnvOverrides::default()
        };
        assert_eq!(load(&env), ("1".into(), CourseIdSource::Env));
    }

    #[test]
    fn explicit_course_id_wins_and_missing_is_fatal() {
        let home = TempDir::new().expect("home");
        let layout = course(&home);
        let s = load_settings_at(home.path(), &layout, &EnvOverrides::default()).expect("load");
        assert!(matches!(s.course_id(None), Err(CoreError::CourseIdMissing)));
        assert_eq!(
            s.course_id(Some("777")).expect("explicit"),
            ("777".to_string(), CourseIdSource::Flag)
        );
    }

    #[test]
    fn prune_gates_from_env_and_file() {
        let home = TempDir::new().expect("home");
        let layout = course(&home);
        std::fs::write(
            layout.config_file(),
            "prune:\n  apply: false\n  assignments: false\nworkers: 8\n",
        )
        .expect("cfg");
        let s = load_settings_at(home.path(), &layout, &EnvOverrides::default()).expect("load");
        assert!(!s.prune.apply);
        assert!(!s.prune.assignments);
        assert_eq!(s.workers, 8);

        let env = EnvOverrides {
            prune_assignments: Some("yes".into()),
            ..EnvOverrides::default()
        };
        let s = load_settings_at(home.path(), &layout, &env).expect("load");
        assert!(s.prune.assignments);

        let bad = EnvOverrides {
            prune_apply: Some("maybe".into()),
            ..EnvOverrides::default()
        };
        assert!(matches!(
            load_settings_at(home.path(), &layout, &bad),
            Err(CoreError::InvalidEnv { var: ENV_PRUNE_APPLY, .. })
        ));
    }

    #[test]
    fn credentials_file_fills_missing_values() {
        let home = TempDir::new().expect("home");
        let layout = course(&home);
        let cred = home.path().join("creds.txt");
        std::fs::write(&cred, "# lms\nAPI_URL = \"https://lms.example.edu/\"\nAPI_KEY='s3cret'\n")
            .expect("creds");
        let env = EnvOverrides {
            credential_file: Some(cred),
            ..EnvOverrides::default()
        };
        let s = load_settings_at(home.path(), &layout, &env).expect("load");
        let c = s.credentials().expect("credentials");
        assert_eq!(c.api_url, "https://lms.example.edu");
        assert_eq!(c.api_key, "s3cret");
        assert!(!format!("{c:?}").contains("s3cret"));
    }

    #[test]
    fn unreadable_credentials_are_reported() {
        let home = TempDir::new().expect("home");
        let layout = course(&home);
        let s = load_settings_at(home.path(), &layout, &EnvOverrides::default()).expect("load");
        assert!(matches!(s.credentials(), Err(CoreError::Credentials { .. })));
    }
}
