//! Computation parameters.
//!
//! JSON-deserializable with per-field defaults, so partial documents
//! configure only what they change.

use serde::{Deserialize, Serialize};

use crate::error::{CityraysError, Result};

/// Closed parameter set of the path computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of specular reflections per path.
    #[serde(default = "default_reflexion_order")]
    pub reflexion_order: usize,
    /// Maximum diffraction order; 0 disables edge diffraction.
    #[serde(default = "default_diffraction_order")]
    pub diffraction_order: usize,
    /// Enable diffraction around vertical building edges.
    #[serde(default = "default_true")]
    pub compute_horizontal_diffraction: bool,
    /// Enable diffraction over horizontal roof edges.
    #[serde(default = "default_true")]
    pub compute_vertical_diffraction: bool,
    /// Maximum source-receiver search distance (m).
    #[serde(default = "default_max_src_dist")]
    pub max_src_dist: f64,
    /// Maximum wall distance for the reflection search (m).
    #[serde(default = "default_max_ref_dist")]
    pub max_ref_dist: f64,
    /// Minimum effective receiver distance for line-source splitting (m).
    #[serde(default = "default_min_rec_dist")]
    pub min_rec_dist: f64,
    /// Default ground factor at sources, in [0, 1].
    #[serde(default)]
    pub g_s: f64,
    /// Early-stop threshold on the remaining source power (dB).
    #[serde(default = "default_maximum_error")]
    pub maximum_error: f64,
    /// Worker count; defaults to the number of CPU cores.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    /// Band center frequencies (Hz).
    #[serde(default = "default_freq_lvl")]
    pub freq_lvl: Vec<f64>,
    /// Air temperature (degrees C).
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Atmospheric pressure (Pa).
    #[serde(default = "default_pressure")]
    pub pressure: f64,
    /// Relative humidity (%, 0-100).
    #[serde(default = "default_humidity")]
    pub humidity: f64,
    /// Speed of sound (m/s).
    #[serde(default = "default_celerity")]
    pub celerity: f64,
}

fn default_reflexion_order() -> usize {
    1
}
fn default_diffraction_order() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_max_src_dist() -> f64 {
    1200.0
}
fn default_max_ref_dist() -> f64 {
    50.0
}
fn default_min_rec_dist() -> f64 {
    1.0
}
fn default_maximum_error() -> f64 {
    0.1
}
fn default_thread_count() -> usize {
    num_cpus::get()
}
fn default_freq_lvl() -> Vec<f64> {
    vec![63.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0]
}
fn default_temperature() -> f64 {
    15.0
}
fn default_pressure() -> f64 {
    101_325.0
}
fn default_humidity() -> f64 {
    70.0
}
fn default_celerity() -> f64 {
    340.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reflexion_order: default_reflexion_order(),
            diffraction_order: default_diffraction_order(),
            compute_horizontal_diffraction: true,
            compute_vertical_diffraction: true,
            max_src_dist: default_max_src_dist(),
            max_ref_dist: default_max_ref_dist(),
            min_rec_dist: default_min_rec_dist(),
            g_s: 0.0,
            maximum_error: default_maximum_error(),
            thread_count: default_thread_count(),
            freq_lvl: default_freq_lvl(),
            temperature: default_temperature(),
            pressure: default_pressure(),
            humidity: default_humidity(),
            celerity: default_celerity(),
        }
    }
}

impl Config {
    /// Parses a (possibly partial) JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(text).map_err(|e| CityraysError::InvalidGeometry {
                message: format!("config: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks on the closed parameter set.
    pub fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            return Err(CityraysError::InvalidGeometry {
                message: "thread_count must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.g_s) {
            return Err(CityraysError::InvalidGeometry {
                message: format!("g_s {} outside [0, 1]", self.g_s),
            });
        }
        if self.freq_lvl.is_empty() {
            return Err(CityraysError::InvalidGeometry {
                message: "freq_lvl must name at least one band".into(),
            });
        }
        Ok(())
    }

    /// Number of frequency bands.
    pub fn band_count(&self) -> usize {
        self.freq_lvl.len()
    }
}
