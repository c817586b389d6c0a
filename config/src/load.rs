use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory holding the configuration files, relative to the loader root.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried for every layer, in lookup order.
const FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variable overrides (`APP_INDEX__BUILD_ON_CREATE=false`).
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

const ENV_KEY_SEPARATOR: &str = "__";

const ENV_LIST_SEPARATOR: &str = ",";

/// Implemented by top-level settings structures read through a [`ConfigLoader`].
pub trait Config {
    /// Keys whose environment variable overrides are comma-separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while reading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    #[error("no base configuration in `{directory}`; attempted: {attempted}")]
    MissingBaseFile { directory: PathBuf, attempted: String },

    #[error("failed to read configuration file `{path}`: {source}")]
    InvalidFile {
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    /// `APP_ENVIRONMENT` holds an unsupported value.
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// One file layer of the configuration, later layers overriding earlier ones.
#[derive(Debug, Clone, Copy)]
enum Layer {
    Base,
    Environment(Environment),
}

impl Layer {
    fn stem(self) -> &'static str {
        match self {
            Layer::Base => "base",
            Layer::Environment(environment) => environment.as_str(),
        }
    }
}

/// Reads layered settings from a `configuration` directory.
///
/// Layers are applied in order: `base.(yaml|yml|json)`, which must exist, then the optional
/// `{environment}.(yaml|yml|json)` file, then `APP_`-prefixed environment variables where nested
/// keys are separated by double underscores and list values by commas.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    directory: PathBuf,
    environment: Option<Environment>,
    env_overrides: bool,
}

impl ConfigLoader {
    /// Creates a loader reading `root/configuration`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            directory: root.into().join(CONFIGURATION_DIR),
            environment: None,
            env_overrides: true,
        }
    }

    /// Creates a loader reading `./configuration` relative to the working directory.
    pub fn from_current_dir() -> Result<Self, LoadConfigError> {
        let root = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
        Ok(Self::new(root))
    }

    /// Selects the environment layer explicitly instead of reading `APP_ENVIRONMENT`.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Ignores `APP_`-prefixed environment variables.
    pub fn without_env_overrides(mut self) -> Self {
        self.env_overrides = false;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Reads every layer and deserializes the merged settings into `T`.
    pub fn load<T>(&self) -> Result<T, LoadConfigError>
    where
        T: Config + DeserializeOwned,
    {
        if !self.directory.is_dir() {
            return Err(LoadConfigError::MissingDirectory(self.directory.clone()));
        }

        let environment = match self.environment {
            Some(environment) => environment,
            None => Environment::load()?,
        };

        let mut builder = rust_cli_config::Config::builder();
        for layer in [Layer::Base, Layer::Environment(environment)] {
            let path = match (self.locate(layer), layer) {
                (Some(path), _) => path,
                (None, Layer::Environment(_)) => continue,
                (None, Layer::Base) => return Err(self.missing_base_file()),
            };

            // Parse each file on its own so a broken one is reported by name.
            rust_cli_config::Config::builder()
                .add_source(rust_cli_config::File::from(path.as_path()))
                .build()
                .map_err(|source| LoadConfigError::InvalidFile {
                    path: path.clone(),
                    source,
                })?;

            builder = builder.add_source(rust_cli_config::File::from(path));
        }

        if self.env_overrides {
            builder = builder.add_source(env_overrides::<T>());
        }

        builder
            .build()
            .and_then(|settings| settings.try_deserialize::<T>())
            .map_err(LoadConfigError::Deserialization)
    }

    fn candidates(&self, layer: Layer) -> impl Iterator<Item = PathBuf> + '_ {
        FILE_EXTENSIONS
            .iter()
            .map(move |extension| self.directory.join(format!("{}.{extension}", layer.stem())))
    }

    fn locate(&self, layer: Layer) -> Option<PathBuf> {
        self.candidates(layer).find(|path| path.is_file())
    }

    fn missing_base_file(&self) -> LoadConfigError {
        let attempted = self
            .candidates(Layer::Base)
            .map(|path| format!("`{}`", path.display()))
            .collect::<Vec<_>>()
            .join(", ");

        LoadConfigError::MissingBaseFile {
            directory: self.directory.clone(),
            attempted,
        }
    }
}

fn env_overrides<T: Config>() -> rust_cli_config::Environment {
    let source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_KEY_SEPARATOR);

    if T::LIST_PARSE_KEYS.is_empty() {
        return source;
    }

    T::LIST_PARSE_KEYS.iter().fold(
        source.try_parsing(true).list_separator(ENV_LIST_SEPARATOR),
        |source, key| source.with_list_parse_key(key),
    )
}
