//! Container configuration

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{DIError, DIResult};
use crate::lifestyle::Lifestyle;

/// Prefix of the environment variables read by [`ContainerOptions::load`]
pub const ENV_PREFIX: &str = "TESSERA";

/// Options controlling registration and resolution behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Replace an existing registration instead of failing
    pub allow_overriding_registrations: bool,
    /// Lifestyle used by `Container::register`
    pub default_lifestyle: Lifestyle,
    /// Build concrete types that were never registered
    pub resolve_unregistered_concrete_types: bool,
    /// Longest dependency chain the container will follow
    pub max_resolution_depth: usize,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            allow_overriding_registrations: false,
            default_lifestyle: Lifestyle::Transient,
            resolve_unregistered_concrete_types: true,
            max_resolution_depth: 64,
        }
    }
}

impl ContainerOptions {
    /// Load options from an optional TOML file, then `TESSERA_*` environment variables.
    ///
    /// A missing file is not an error; the defaults fill in anything neither source sets.
    pub fn load(path: Option<&Path>) -> DIResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let options: ContainerOptions = config.try_deserialize()?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_toml_str(source: &str) -> DIResult<Self> {
        let options: ContainerOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_toml_string(&self) -> DIResult<String> {
        toml::to_string(self).map_err(|err| DIError::Configuration(err.to_string()))
    }

    pub fn validate(&self) -> DIResult<()> {
        if self.max_resolution_depth == 0 {
            return Err(DIError::Configuration(
                "max_resolution_depth must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_overriding_registrations(mut self, allow: bool) -> Self {
        self.allow_overriding_registrations = allow;
        self
    }

    pub fn with_default_lifestyle(mut self, lifestyle: Lifestyle) -> Self {
        self.default_lifestyle = lifestyle;
        self
    }

    pub fn with_unregistered_concrete_types(mut self, resolve: bool) -> Self {
        self.resolve_unregistered_concrete_types = resolve;
        self
    }

    pub fn with_max_resolution_depth(mut self, depth: usize) -> Self {
        self.max_resolution_depth = depth;
        self
    }
}
