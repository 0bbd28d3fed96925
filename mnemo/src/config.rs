//! JSON configuration loader (§6, §C12).
//!
//! Loads a single JSON document from a fixed search path: current working
//! directory, then installation directory (next to the running binary), then
//! the user's home directory, then a system-wide location. Missing sections
//! use documented defaults; a missing config file uses all defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_NAME: &str = "mnemo_config.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default, alias = "neo4j")]
    pub graph: GraphConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            graph: GraphConfig::default(),
            features: FeaturesConfig::default(),
            performance: PerformanceConfig::default(),
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub db_path: String,
    pub vector_index_path: String,
    pub embedding_model: String,
    pub vector_dimension: usize,
    pub max_chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_path: "mnemo.db".to_string(),
            vector_index_path: "mnemo_vectors.idx".to_string(),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            vector_dimension: 384,
            max_chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
    pub connection_timeout: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
            connection_timeout: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub enabled: bool,
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connection_timeout: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
            connection_timeout: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub cache_enabled: bool,
    pub buffer_enabled: bool,
    pub session_state_enabled: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            buffer_enabled: true,
            session_state_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub connection_pool_size: u32,
    pub query_timeout: u64,
    pub bulk_insert_batch_size: usize,
    pub cache_ttl_seconds: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            connection_pool_size: 10,
            query_timeout: 30,
            bulk_insert_batch_size: 100,
            cache_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: String,
    pub temp_dir: String,
    pub backup_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            temp_dir: "tmp".to_string(),
            backup_dir: "backups".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the fixed search path, falling back to
    /// defaults for any section or file that cannot be found or parsed.
    ///
    /// Relative paths inside the loaded document (`database.db_path`,
    /// `database.vector_index_path`, `paths.*`) are resolved against the
    /// directory the config file was found in, not the process cwd.
    pub fn load() -> Self {
        Self::load_named(DEFAULT_CONFIG_NAME)
    }

    pub fn load_named(config_file_name: &str) -> Self {
        match Self::find_config_file(config_file_name) {
            Some(path) => Self::load_from_path(&path).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "invalid config file, using defaults");
                Config::default()
            }),
            None => {
                tracing::info!("no config file found in search path, using defaults");
                Config::default()
            }
        }
    }

    fn find_config_file(name: &str) -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(name));
        }
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                candidates.push(dir.join(name));
            }
        }
        if let Some(home) = dirs_home() {
            candidates.push(home.join(".mnemo").join(name));
        }
        candidates.push(PathBuf::from("/etc/mnemo").join(name));

        candidates.into_iter().find(|p| p.is_file())
    }

    fn load_from_path(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let mut config: Config = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_relative_paths(base_dir);
        Ok(config)
    }

    fn resolve_relative_paths(&mut self, base_dir: &Path) {
        self.database.db_path = resolve(base_dir, &self.database.db_path);
        self.database.vector_index_path = resolve(base_dir, &self.database.vector_index_path);
        self.paths.data_dir = resolve(base_dir, &self.paths.data_dir);
        self.paths.temp_dir = resolve(base_dir, &self.paths.temp_dir);
        self.paths.backup_dir = resolve(base_dir, &self.paths.backup_dir);
    }
}

fn resolve(base_dir: &Path, value: &str) -> String {
    let p = Path::new(value);
    if p.is_absolute() {
        value.to_string()
    } else {
        base_dir.join(p).to_string_lossy().into_owned()
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.database.vector_dimension, 384);
        assert_eq!(config.database.max_chunk_size, 1000);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.performance.cache_ttl_seconds, 3600);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_named("definitely-not-a-real-mnemo-config.json");
        assert_eq!(config.database.vector_dimension, 384);
    }

    #[test]
    fn partial_json_fills_in_documented_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnemo_config.json");
        std::fs::write(&path, r#"{"database": {"vector_dimension": 768}}"#).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.database.vector_dimension, 768);
        assert_eq!(config.database.max_chunk_size, 1000);
        assert_eq!(config.redis.port, 6379);
    }

    #[test]
    fn relative_paths_resolve_against_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnemo_config.json");
        std::fs::write(&path, r#"{"database": {"db_path": "sub/mnemo.db"}}"#).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.database.db_path, dir.path().join("sub/mnemo.db").to_string_lossy());
    }

    #[test]
    fn neo4j_alias_populates_graph_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnemo_config.json");
        std::fs::write(&path, r#"{"neo4j": {"uri": "bolt://example:7687"}}"#).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.graph.uri, "bolt://example:7687");
    }
}
