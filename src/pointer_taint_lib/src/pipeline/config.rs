use crate::analysis::source_binder::{ArgumentSpec, TaintSource};
use crate::checkers::index_sentinel::DEFAULT_SENTINEL_TAG;
use crate::prelude::*;
use crate::taint::shadow::SHADOW_PAGE_SIZE;
use crate::CheckModule;

/// The largest number of bytes a single argument may taint.
pub const MAX_ARGUMENT_SIZE: u64 = 256 * SHADOW_PAGE_SIZE;

/// The configuration of a check module as read from *config.json*.
///
/// Missing fields default to tainting the second argument (4 bytes) of `main`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Config {
    /// The name of the function whose arguments get tainted.
    #[serde(default = "default_function")]
    pub function: String,
    /// The zero-based positions of the arguments to taint.
    #[serde(default = "default_arg_index")]
    pub arg_index: Vec<u32>,
    /// The number of bytes to taint for each argument, in the order of `arg_index`.
    #[serde(default = "default_arg_size")]
    pub arg_size: Vec<u64>,
    /// The sentinel tag looked for by sentinel-matching checks.
    #[serde(default)]
    pub sentinel_tag: Option<Tag>,
}

fn default_function() -> String {
    "main".to_string()
}

fn default_arg_index() -> Vec<u32> {
    vec![1]
}

fn default_arg_size() -> Vec<u64> {
    vec![4]
}

impl Default for Config {
    fn default() -> Config {
        Config {
            function: default_function(),
            arg_index: default_arg_index(),
            arg_size: default_arg_size(),
            sentinel_tag: None,
        }
    }
}

impl Config {
    /// Get the configuration of the given module from the contents of a configuration file.
    /// If the file has no entry for the module the default configuration is returned.
    pub fn from_json(config: &serde_json::Value, module: &CheckModule) -> Result<Config, Error> {
        match config.get(module.name) {
            Some(value) => serde_json::from_value(value.clone())
                .with_context(|| format!("Invalid configuration for {}", module.name)),
            None => Ok(Config::default()),
        }
    }

    /// Validate the configuration and convert it into the taint source description.
    pub fn taint_source(&self) -> Result<TaintSource, Error> {
        if self.function.is_empty() {
            return Err(anyhow!("The name of the taint source function is empty."));
        }
        if self.arg_index.is_empty() {
            return Err(anyhow!("No argument positions to taint given."));
        }
        if self.arg_index.len() != self.arg_size.len() {
            return Err(anyhow!(
                "Got {} argument positions but {} argument sizes.",
                self.arg_index.len(),
                self.arg_size.len()
            ));
        }
        if let Some(size) = self.arg_size.iter().find(|size| **size > MAX_ARGUMENT_SIZE) {
            return Err(anyhow!(
                "Argument size {} exceeds the maximum of {} bytes.",
                size,
                MAX_ARGUMENT_SIZE
            ));
        }
        let arguments = self
            .arg_index
            .iter()
            .zip(self.arg_size.iter())
            .map(|(position, size)| ArgumentSpec {
                position: *position,
                size: *size,
            })
            .collect();
        Ok(TaintSource {
            function: self.function.clone(),
            arguments,
        })
    }

    /// Get the sentinel tag. The untainted tag cannot serve as sentinel.
    pub fn sentinel(&self) -> Result<Tag, Error> {
        match self.sentinel_tag {
            Some(tag) if !tag.is_tainted() => {
                Err(anyhow!("The sentinel tag must not be the untainted tag 0."))
            }
            Some(tag) => Ok(tag),
            None => Ok(DEFAULT_SENTINEL_TAG),
        }
    }
}
