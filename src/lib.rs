pub mod block;
pub mod consistency;
pub mod data_import;
pub mod error;
pub mod fft;
pub mod fftshift;
pub mod layout;
pub mod mask;
pub mod padding;
pub mod post_processing;
pub mod pre_processing;
pub mod scaling;

pub use error::{Result, TransformError};
pub use fft::{from_complex as to_tensor, to_complex as tensor_to_complex};

use mask::MaskConfig;
use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

/// Placement tag for the compute context a transform targets, e.g. `cpu` or `cuda:0`. It is
/// carried through the pipeline and only ever asked whether it names the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Device(String);

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn cpu() -> Self {
        Self::new("cpu")
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_host(&self) -> bool {
        self.0 == "cpu" || self.0.starts_with("cpu:")
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Device {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// the data set a transform is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Challenge {
    #[serde(rename = "singlecoil")]
    SingleCoil,
    #[serde(rename = "multicoil")]
    MultiCoil,
}

impl FromStr for Challenge {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "singlecoil" => Ok(Self::SingleCoil),
            "multicoil" => Ok(Self::MultiCoil),
            _ => Err(TransformError::config(format!(
                "challenge should either be \"singlecoil\" or \"multicoil\", got \"{s}\""
            ))),
        }
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleCoil => f.write_str("singlecoil"),
            Self::MultiCoil => f.write_str("multicoil"),
        }
    }
}

/// The reconstruction network, a black box mapping a padded NCHW tensor to a tensor of the same
/// layout. Any matching function or closure is a network.
pub trait Network {
    fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>>;
}

impl<F> Network for F
where
    F: Fn(ArrayView4<f32>) -> Result<Array4<f32>>,
{
    fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        self(x)
    }
}

/// pipeline parameters as stored in a toml file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconParams {
    pub challenge: Challenge,
    pub device: Device,
    /// derive mask seeds from file names
    pub use_seed: bool,
    /// network inputs are padded to a multiple of this width
    pub divisor: usize,
    /// log weighting scale for k-space inputs, none to disable
    pub log_amp_scale: Option<f32>,
    pub amplification_factor: f32,
    pub patch_size: usize,
    pub stride: usize,
    pub mask: MaskConfig,
}

impl Default for ReconParams {
    fn default() -> Self {
        Self {
            challenge: Challenge::SingleCoil,
            device: Device::cpu(),
            use_seed: true,
            divisor: 16,
            log_amp_scale: None,
            amplification_factor: 1.,
            patch_size: 128,
            stride: 64,
            mask: MaskConfig::default(),
        }
    }
}

impl ReconParams {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().with_extension("toml");
        let mut toml_str = String::new();
        File::open(&path)
            .and_then(|mut f| f.read_to_string(&mut toml_str))
            .map_err(|e| TransformError::io(&path, e))?;
        toml::from_str(&toml_str).map_err(|e| TransformError::Parse(format!("{}: {e}", path.display())))
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().with_extension("toml");
        let mut toml_string = toml::to_string(self).map_err(|e| TransformError::Parse(e.to_string()))?;
        toml_string.push('\n');
        File::create(&path)
            .and_then(|mut f| f.write_all(toml_string.as_bytes()))
            .map_err(|e| TransformError::io(&path, e))
    }
}
