use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Deserialize;
use toml::{Table, Value};

use crate::git::cli::DEFAULT_COMMAND_TIMEOUT;
use crate::lock::{RepoLock, DEFAULT_LOCK_TIMEOUT};
use crate::repository::DEFAULT_CONTENT_DIR;
use crate::util::os_helper;

pub const CFG_FILE_NAME: &str = "blogstore.toml";

pub const ENV_REPO_PATH: &str = "BLOG_REPO_PATH";
pub const ENV_REPO_URL: &str = "BLOG_REPO_URL";
pub const ENV_API_KEYS: &str = "BLOG_API_KEYS";
pub const ENV_PORT: &str = "PORT";

#[derive(Deserialize)]
pub struct Repository {
    pub path: PathBuf,
    /// Cloned into `path` when the working tree does not exist yet
    pub url: Option<String>,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Git {
    pub binary: String,
    pub command_timeout_secs: u64,
    /// If empty, OS user real name is being used
    pub author_name: Option<String>,
    pub author_email: String,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Lock {
    pub path: Option<PathBuf>,
    pub timeout_secs: u64,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Content {
    /// UTC offset of generated post dates, e.g. "+09:00"
    pub timezone: String,
    pub default_categories: Vec<String>,
    /// Extra front matter keys every new post starts with
    pub front_matter: Table,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Server {
    pub address: String,
    pub port: u16,
    pub api_keys: Vec<String>,
}

#[derive(Deserialize)]
pub struct Log {
    pub level: LogLevel,
    pub log_to_console: bool,
    pub location: Option<PathBuf>,
    /// Daily files kept before the oldest is removed
    #[serde(default = "default_log_files")]
    pub max_files: usize,
}

fn default_log_files() -> usize {
    60
}

#[derive(Deserialize, Copy, Clone)]
pub enum LogLevel {
    Critical = 0,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Deserialize)]
pub struct Config {
    pub repository: Repository,
    #[serde(default)]
    pub git: Git,
    #[serde(default)]
    pub lock: Lock,
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub server: Server,
    pub log: Option<Log>,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_content_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CONTENT_DIR)
}

impl Default for Git {
    fn default() -> Self {
        Git {
            binary: "git".to_string(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            author_name: None,
            author_email: os_helper::get_email(),
        }
    }
}

impl Git {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn author_name(&self) -> String {
        match self.author_name {
            Some(ref name) if !name.trim().is_empty() => name.clone(),
            _ => os_helper::get_name(),
        }
    }
}

impl Default for Lock {
    fn default() -> Self {
        Lock {
            path: None,
            timeout_secs: DEFAULT_LOCK_TIMEOUT.as_secs(),
        }
    }
}

impl Lock {
    pub fn path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(RepoLock::default_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Content {
    fn default() -> Self {
        let mut front_matter = Table::new();
        front_matter.insert("ShowToc".to_string(), Value::Boolean(true));
        front_matter.insert("TocOpen".to_string(), Value::Boolean(true));
        Content {
            timezone: "+09:00".to_string(),
            default_categories: vec!["Development".to_string()],
            front_matter,
        }
    }
}

impl Content {
    pub fn timezone(&self) -> io::Result<FixedOffset> {
        let tz = self.timezone.trim();
        if tz == "Z" || tz.eq_ignore_ascii_case("UTC") {
            return Ok(Utc.fix());
        }
        DateTime::parse_from_str(&format!("2000-01-01 00:00:00 {}", tz), "%Y-%m-%d %H:%M:%S %:z")
            .map(|d| *d.offset())
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, format!("Invalid timezone {}: {}", self.timezone, e)))
    }
}

impl Default for Server {
    fn default() -> Self {
        Server {
            address: "0.0.0.0".to_string(),
            port: 8000,
            api_keys: vec![],
        }
    }
}

impl Config {
    /// Configuration for a working tree at `path`, everything else defaulted.
    pub fn for_repository(path: &Path) -> Self {
        Config {
            repository: Repository {
                path: path.to_path_buf(),
                url: None,
                remote: default_remote(),
                branch: default_branch(),
                content_dir: default_content_dir(),
            },
            git: Git::default(),
            lock: Lock::default(),
            content: Content::default(),
            server: Server::default(),
            log: None,
        }
    }

    /// `BLOG_REPO_PATH`, `BLOG_REPO_URL`, `BLOG_API_KEYS` and `PORT` win over
    /// the file.
    pub fn apply_env(&mut self) -> io::Result<()> {
        self.apply_vars(|name| env::var(name).ok())
    }

    fn apply_vars<F: Fn(&str) -> Option<String>>(&mut self, var: F) -> io::Result<()> {
        if let Some(path) = var(ENV_REPO_PATH).filter(|v| !v.is_empty()) {
            self.repository.path = parse_path(PathBuf::from(path));
        }
        if let Some(url) = var(ENV_REPO_URL).filter(|v| !v.is_empty()) {
            self.repository.url = Some(url);
        }
        if let Some(keys) = var(ENV_API_KEYS) {
            self.server.api_keys = split_keys(&keys);
        }
        if let Some(port) = var(ENV_PORT).filter(|v| !v.is_empty()) {
            self.server.port = port.parse().map_err(|e| io::Error::new(
                ErrorKind::InvalidData, format!("Invalid {}={}: {}", ENV_PORT, port, e)))?;
        }
        Ok(())
    }
}

pub fn split_keys(keys: &str) -> Vec<String> {
    keys.split(',')
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| k.to_string())
        .collect()
}

fn parse_path(path: PathBuf) -> PathBuf {
    let Some(str_path) = path.to_str() else {
        return path;
    };
    if !str_path.starts_with("${exe_dir}") {
        return path;
    }
    match env::current_exe().ok().and_then(|exe| exe.parent().map(|p| p.to_path_buf())) {
        Some(exe_dir) => PathBuf::from(str_path.replace("${exe_dir}", &exe_dir.to_string_lossy())),
        None => path,
    }
}

pub fn parse_config(cfg_content: &str) -> io::Result<Config> {
    let mut cfg: Config = match toml::from_str::<Config>(cfg_content) {
        Ok(cfg) => cfg,
        Err(e) => return Err(io::Error::new(
            ErrorKind::InvalidData, format!("Error parsing configuration file: {}", e))),
    };

    cfg.repository.path = parse_path(cfg.repository.path);
    cfg.lock.path = cfg.lock.path.map(parse_path);
    if let Some(ref mut log) = cfg.log {
        log.location = log.location.take().map(parse_path);
    }

    // Fail at startup rather than on the first post
    cfg.content.timezone()?;

    Ok(cfg)
}

pub fn read_config(cfg_path: &Path) -> io::Result<Config> {
    let cfg_content = match fs::read_to_string(cfg_path) {
        Ok(content) => content,
        Err(e) => return Err(io::Error::new(e.kind(), format!("Error opening configuration file {}: {}", cfg_path.display(), e))),
    };
    parse_config(&cfg_content)
}

/// Next to the executable, then the current directory, then the user
/// config directory.
pub fn get_config_path() -> Option<PathBuf> {
    let exe_dir = env::current_exe().ok().and_then(|exe| exe.parent().map(|p| p.to_path_buf()));
    let candidates = [exe_dir, env::current_dir().ok(), dirs::config_dir()];
    candidates.into_iter()
        .flatten()
        .map(|dir| dir.join(CFG_FILE_NAME))
        .find(|path| path.exists())
}

/// Reads `cfg_path`, or the file found by [`get_config_path`]. With no file
/// at all, `BLOG_REPO_PATH` alone is enough. Environment overrides are
/// applied last.
pub fn load_config(cfg_path: Option<PathBuf>) -> io::Result<Config> {
    let mut config = match cfg_path.or_else(get_config_path) {
        Some(path) => read_config(&path)?,
        None => match env::var(ENV_REPO_PATH) {
            Ok(path) if !path.is_empty() => Config::for_repository(Path::new(&path)),
            _ => return Err(io::Error::new(ErrorKind::NotFound, format!(
                "Could not find {} and {} is not set", CFG_FILE_NAME, ENV_REPO_PATH))),
        },
    };
    config.apply_env()?;
    Ok(config)
}
