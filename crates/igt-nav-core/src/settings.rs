//! Persisted key-value settings keyed by `(parameter, configuration)`.
//!
//! Calibration results survive across sessions as 16 space-separated
//! row-major matrix values, e.g. `"1 0 0 12.5 0 1 0 0 0 0 1 0 0 0 0 1"`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, error};
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::transform::{matrix_from_row_values, matrix_to_row_values, MATRIX_VALUE_COUNT};

/// Configuration name used when the caller has not picked one.
pub const DEFAULT_CONFIGURATION: &str = "Default";

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("setting '{parameter}' in configuration '{configuration}' is not a number list: '{value}'")]
    NotNumeric {
        parameter: String,
        configuration: String,
        value: String,
    },
    #[error("setting '{parameter}' in configuration '{configuration}' holds {got} values, expected 16")]
    WrongMatrixLength {
        parameter: String,
        configuration: String,
        got: usize,
    },
}

/// Settings grouped by configuration name, then parameter name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsStore {
    #[serde(default)]
    configurations: BTreeMap<String, BTreeMap<String, String>>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON settings file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load a JSON settings file, or start empty when it does not exist yet.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no settings at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        Self::load_json(path)
    }

    /// Write all settings to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn value(&self, parameter: &str, configuration: &str) -> Option<&str> {
        self.configurations
            .get(configuration)?
            .get(parameter)
            .map(String::as_str)
    }

    pub fn set_value(&mut self, parameter: &str, configuration: &str, value: impl Into<String>) {
        self.configurations
            .entry(configuration.to_owned())
            .or_default()
            .insert(parameter.to_owned(), value.into());
    }

    /// Insert every pair that is not already set. Existing values win.
    pub fn merge_defaults<'a>(
        &mut self,
        defaults: impl IntoIterator<Item = (&'a str, &'a str)>,
        configuration: &str,
    ) {
        let entries = self
            .configurations
            .entry(configuration.to_owned())
            .or_default();
        for (parameter, value) in defaults {
            entries
                .entry(parameter.to_owned())
                .or_insert_with(|| value.to_owned());
        }
    }

    /// Numeric value, or `None` when missing or unparsable.
    pub fn value_f64(&self, parameter: &str, configuration: &str) -> Option<f64> {
        self.value(parameter, configuration)?.trim().parse().ok()
    }

    /// Read a stored 4×4 transform.
    ///
    /// `Ok(None)` when nothing is stored under that name; malformed entries
    /// are logged and returned as errors.
    pub fn read_transform(
        &self,
        parameter: &str,
        configuration: &str,
    ) -> Result<Option<Matrix4<f64>>, SettingsError> {
        let Some(raw) = self.value(parameter, configuration) else {
            return Ok(None);
        };
        let values: Vec<f64> = raw
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| {
                error!("setting '{parameter}' is not a list of numbers");
                SettingsError::NotNumeric {
                    parameter: parameter.to_owned(),
                    configuration: configuration.to_owned(),
                    value: raw.to_owned(),
                }
            })?;
        match matrix_from_row_values(&values) {
            Some(m) => Ok(Some(m)),
            None => {
                error!(
                    "{MATRIX_VALUE_COUNT} values are needed for transform '{parameter}', found {}",
                    values.len()
                );
                Err(SettingsError::WrongMatrixLength {
                    parameter: parameter.to_owned(),
                    configuration: configuration.to_owned(),
                    got: values.len(),
                })
            }
        }
    }

    /// Store a 4×4 transform as 16 space-separated row-major values.
    pub fn write_transform(&mut self, parameter: &str, m: &Matrix4<f64>, configuration: &str) {
        let value = matrix_to_row_values(m)
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("storing transform '{parameter}' in configuration '{configuration}'");
        self.set_value(parameter, configuration, value);
    }
}
