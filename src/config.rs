//! Runtime configuration.
//!
//! Values come from built-in defaults, then the first `.env` file found in the
//! working directory or up to two parents, then the process environment. Later
//! sources win. The `.env` file is optional.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const API_KEY: &str = "API_KEY";
pub const TEXT_MODEL: &str = "TEXT_MODEL";
pub const IMAGE_MODEL: &str = "IMAGE_MODEL";

pub const DEFAULT_TEXT_MODEL: &str = "gemini-pro";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-1.5-flash";

const DOTENV_FILE: &str = ".env";
const SEARCH_DIRS: [&str; 3] = [".", "..", "../.."];

#[derive(Debug, Error)]
pub enum Error {
    #[error("API_KEY is required in environment or .env file")]
    MissingApiKey,
    #[error("failed to read config file {path}: {source}")]
    Dotenv {
        path: PathBuf,
        #[source]
        source: dotenv::Error,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: String,
    pub text_model: String,
    pub image_model: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"[REDACTED]")
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .finish()
    }
}

impl Config {
    /// Loads configuration relative to the current working directory.
    pub fn load() -> Result<Self, Error> {
        Self::load_from(Path::new("."))
    }

    /// Loads configuration, searching for `.env` in `base` and its two parents.
    pub fn load_from(base: &Path) -> Result<Self, Error> {
        Self::load_with(base, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load_from`], with an explicit environment lookup.
    pub fn load_with<F>(base: &Path, env: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file_vars = match find_dotenv(base) {
            Some(path) => read_dotenv(&path)?,
            None => {
                debug!(base = %base.display(), "no .env file found, using environment only");
                HashMap::new()
            }
        };
        Self::from_sources(&file_vars, env)
    }

    /// Resolves configuration from already-read `.env` values and an
    /// environment lookup.
    pub fn from_sources<F>(file_vars: &HashMap<String, String>, env: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset.
        let lookup = |key: &str| {
            env(key)
                .filter(|value| !value.is_empty())
                .or_else(|| file_vars.get(key).filter(|value| !value.is_empty()).cloned())
        };

        let api_key = lookup(API_KEY).ok_or(Error::MissingApiKey)?;
        Ok(Self {
            api_key,
            text_model: lookup(TEXT_MODEL).unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            image_model: lookup(IMAGE_MODEL).unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
        })
    }
}

fn find_dotenv(base: &Path) -> Option<PathBuf> {
    SEARCH_DIRS
        .iter()
        .map(|dir| base.join(dir).join(DOTENV_FILE))
        .find(|path| path.is_file())
}

fn read_dotenv(path: &Path) -> Result<HashMap<String, String>, Error> {
    let to_error = |source| Error::Dotenv {
        path: path.to_path_buf(),
        source,
    };
    debug!(path = %path.display(), "reading .env file");
    dotenv::from_path_iter(path)
        .map_err(to_error)?
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(to_error)
}
