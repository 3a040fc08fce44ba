use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const DB_FILE_NAME: &str = "muraldb.db";

const DB_PATH_KEY: &str = "MURALDB_DB_PATH";
const BLOB_DIR_KEY: &str = "MURALDB_BLOB_DIR";
const PUBLIC_BASE_KEY: &str = "MURALDB_PUBLIC_BASE_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub blob_dir: PathBuf,
    /// Prefix of the URLs handed out for uploaded blobs.
    pub public_base_url: String,
}

/// Main entry point: process environment, then `.env`, then defaults.
/// Writes the resolved values to `.env` when there is none yet.
pub fn load_config() -> Result<Config> {
    resolve(Path::new(".env"), |key| std::env::var(key).ok())
}

pub fn resolve(env_path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut values = if env_path.exists() {
        let values = load_from_env(env_path)?;
        debug!("Loaded {} setting(s) from {:?}", values.len(), env_path);
        values
    } else {
        HashMap::new()
    };

    for key in [DB_PATH_KEY, BLOB_DIR_KEY, PUBLIC_BASE_KEY] {
        if let Some(value) = env(key).filter(|v| !v.trim().is_empty()) {
            values.insert(key.to_string(), value);
        }
    }

    let db_path = match values.get(DB_PATH_KEY) {
        Some(path) => PathBuf::from(path),
        None => {
            let base = env_path.parent().unwrap_or(Path::new("."));
            find_file(base, DB_FILE_NAME, 3).unwrap_or_else(|| base.join(DB_FILE_NAME))
        }
    };
    let blob_dir = match values.get(BLOB_DIR_KEY) {
        Some(dir) => PathBuf::from(dir),
        None => db_path
            .parent()
            .unwrap_or(Path::new("."))
            .join("blobs"),
    };
    let public_base_url = match values.get(PUBLIC_BASE_KEY) {
        Some(url) => url.clone(),
        None => default_public_base(&blob_dir),
    };

    let config = Config {
        db_path,
        blob_dir,
        public_base_url,
    };

    if !env_path.exists() {
        save_to_env(env_path, &config)?;
        info!("Saved settings to {:?}", env_path);
    }
    Ok(config)
}

fn default_public_base(blob_dir: &Path) -> String {
    let absolute = std::path::absolute(blob_dir).unwrap_or_else(|_| blob_dir.to_path_buf());
    format!("file://{}", absolute.display())
}

/// An existing database somewhere below `root`, so running from a
/// subdirectory keeps using the same store.
fn find_file(root: &Path, filename: &str, max_depth: usize) -> Option<PathBuf> {
    WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == filename)
        .map(|e| e.path().to_path_buf())
}

fn load_from_env(path: &Path) -> Result<HashMap<String, String>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);

    let mut values = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if matches!(key, DB_PATH_KEY | BLOB_DIR_KEY | PUBLIC_BASE_KEY) {
                values.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    Ok(values)
}

fn save_to_env(path: &Path, config: &Config) -> Result<()> {
    let mut file = File::create(path).context("Failed to create .env file")?;
    writeln!(file, "{}={}", DB_PATH_KEY, config.db_path.display())?;
    writeln!(file, "{}={}", BLOB_DIR_KEY, config.blob_dir.display())?;
    writeln!(file, "{}={}", PUBLIC_BASE_KEY, config.public_base_url)?;
    Ok(())
}
