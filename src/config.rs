use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const HOME_ENV: &str = "ARCHIVE_QUERY_HOME";
const HOME_DIR_NAME: &str = ".archive-query";
const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "archive.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub data: DataConfig,
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Archive file; wins over `data_dir`. A `sqlite://` prefix is accepted.
    pub database_url: Option<String>,
    /// Directory holding `archive.db`.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    pub writable: bool,
    pub max_connections: Option<u32>,
}

impl ArchiveConfig {
    /// Reads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ArchiveError::Config(format!(
                    "reading {}: {e}",
                    path.display()
                )));
            }
        };
        toml::from_str(&content)
            .map_err(|e| ArchiveError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Loads `~/.archive-query/config.toml`, or the defaults when there is
    /// no home directory or no file.
    pub fn discover() -> Result<Self> {
        match home_root() {
            Some(root) => Self::load(&root.join(CONFIG_FILE_NAME)),
            None => {
                warn!("No home directory found, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Archive path from the configured `database_url` or `data_dir`, with
    /// a leading `~` expanded to the home directory.
    pub fn configured_path(&self) -> Option<PathBuf> {
        self.configured_path_in(dirs::home_dir().as_deref())
    }

    fn configured_path_in(&self, user_home: Option<&Path>) -> Option<PathBuf> {
        if let Some(url) = self.data.database_url.as_deref() {
            let path = url
                .strip_prefix("sqlite://")
                .or_else(|| url.strip_prefix("sqlite:"))
                .unwrap_or(url);
            return Some(expand_home(Path::new(path), user_home));
        }
        self.data
            .data_dir
            .as_ref()
            .map(|dir| expand_home(dir, user_home).join(DB_FILE_NAME))
    }

    /// Picks the archive file: `explicit`, then `$ARCHIVE_QUERY_HOME/archive.db`
    /// and the configured path if they exist, then `~/.archive-query/archive.db`.
    /// Fails with `NotFound` when the chosen file does not exist.
    pub fn resolve_database_path(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        let env_home = env::var_os(HOME_ENV).map(PathBuf::from);
        let user_home = dirs::home_dir();
        let root = user_home.as_ref().map(|home| home.join(HOME_DIR_NAME));
        self.resolve_with(explicit, env_home.as_deref(), root.as_deref(), user_home.as_deref())
    }

    fn resolve_with(
        &self,
        explicit: Option<&Path>,
        env_home: Option<&Path>,
        root: Option<&Path>,
        user_home: Option<&Path>,
    ) -> Result<PathBuf> {
        let chosen = explicit
            .map(|path| expand_home(path, user_home))
            .or_else(|| {
                env_home
                    .map(|dir| expand_home(dir, user_home).join(DB_FILE_NAME))
                    .filter(|path| path.exists())
            })
            .or_else(|| {
                let configured = self.configured_path_in(user_home)?;
                if configured.exists() {
                    Some(configured)
                } else {
                    warn!(
                        "Configured archive {} not found, falling back to default",
                        configured.display()
                    );
                    None
                }
            })
            .or_else(|| root.map(|dir| dir.join(DB_FILE_NAME)));

        match chosen {
            Some(path) if path.exists() => Ok(path),
            Some(path) => Err(ArchiveError::NotFound(path)),
            None => Err(ArchiveError::NotFound(PathBuf::from(DB_FILE_NAME))),
        }
    }
}

/// Replaces a leading `~` component with `user_home`.
fn expand_home(path: &Path, user_home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), user_home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn home_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HOME_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ArchiveConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, ArchiveConfig::default());
        assert!(!config.archive.writable);
    }

    #[test]
    fn parses_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[data]\ndata_dir = \"/srv/mail\"\n\n[archive]\nwritable = true\nmax_connections = 2\n",
        )
        .unwrap();

        let config = ArchiveConfig::load(&path).unwrap();
        assert_eq!(config.data.data_dir, Some(PathBuf::from("/srv/mail")));
        assert!(config.archive.writable);
        assert_eq!(config.archive.max_connections, Some(2));
        assert_eq!(
            config.configured_path(),
            Some(PathBuf::from("/srv/mail/archive.db"))
        );
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[archive]\nwritable = \"sometimes\"\n").unwrap();
        assert!(matches!(
            ArchiveConfig::load(&path),
            Err(ArchiveError::Config(_))
        ));
    }

    #[test]
    fn database_url_wins_over_data_dir() {
        let config = ArchiveConfig {
            data: DataConfig {
                database_url: Some("sqlite:///tmp/x.db".into()),
                data_dir: Some("/srv/mail".into()),
            },
            ..Default::default()
        };
        assert_eq!(config.configured_path(), Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn resolution_order() {
        let env_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let explicit = env_dir.path().join("explicit.db");
        fs::write(&explicit, b"").unwrap();
        fs::write(home_dir.path().join(DB_FILE_NAME), b"").unwrap();

        let config = ArchiveConfig::default();

        // Explicit path first.
        let got = config
            .resolve_with(Some(&explicit), Some(env_dir.path()), Some(home_dir.path()), None)
            .unwrap();
        assert_eq!(got, explicit);

        // Env home is skipped while it has no archive.db.
        let got = config
            .resolve_with(None, Some(env_dir.path()), Some(home_dir.path()), None)
            .unwrap();
        assert_eq!(got, home_dir.path().join(DB_FILE_NAME));

        fs::write(env_dir.path().join(DB_FILE_NAME), b"").unwrap();
        let got = config
            .resolve_with(None, Some(env_dir.path()), Some(home_dir.path()), None)
            .unwrap();
        assert_eq!(got, env_dir.path().join(DB_FILE_NAME));
    }

    #[test]
    fn unresolvable_path_is_not_found() {
        let home_dir = tempfile::tempdir().unwrap();
        let err = ArchiveConfig::default()
            .resolve_with(None, None, Some(home_dir.path()), None)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(p) if p == home_dir.path().join(DB_FILE_NAME)));
    }

    #[test]
    fn missing_configured_file_falls_back_to_default() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join(DB_FILE_NAME), b"").unwrap();
        let config = ArchiveConfig {
            data: DataConfig {
                database_url: None,
                data_dir: Some(root.path().join("gone")),
            },
            ..Default::default()
        };

        let got = config
            .resolve_with(None, None, Some(root.path()), None)
            .unwrap();
        assert_eq!(got, root.path().join(DB_FILE_NAME));
    }

    #[test]
    fn tilde_paths_expand_to_home() {
        let user_home = tempfile::tempdir().unwrap();
        let mail_dir = user_home.path().join("mail");
        fs::create_dir(&mail_dir).unwrap();
        fs::write(mail_dir.join(DB_FILE_NAME), b"").unwrap();

        let config = ArchiveConfig {
            data: DataConfig {
                database_url: None,
                data_dir: Some("~/mail".into()),
            },
            ..Default::default()
        };
        assert_eq!(
            config.configured_path_in(Some(user_home.path())),
            Some(mail_dir.join(DB_FILE_NAME))
        );

        let got = config
            .resolve_with(None, None, None, Some(user_home.path()))
            .unwrap();
        assert_eq!(got, mail_dir.join(DB_FILE_NAME));

        let explicit = config
            .resolve_with(Some(Path::new("~/mail/archive.db")), None, None, Some(user_home.path()))
            .unwrap();
        assert_eq!(explicit, mail_dir.join(DB_FILE_NAME));

        // Only a leading component is expanded.
        assert_eq!(
            expand_home(Path::new("/srv/~/x"), Some(user_home.path())),
            PathBuf::from("/srv/~/x")
        );
    }
}
