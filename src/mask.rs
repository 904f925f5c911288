use crate::error::{Result, TransformError};
use ndarray::{ArrayD, ArrayViewD, IxDyn, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// identifies the policy that produced a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskPolicy {
    Random,
    Equispaced,
    Fixed,
}

/// metadata needed to reproduce or interpret a mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskInfo {
    pub acceleration: usize,
    pub center_fraction: f32,
    /// width of the fully sampled calibration region in columns
    pub num_low_freqs: usize,
    pub policy: MaskPolicy,
}

impl MaskInfo {
    /// the info as a JSON object, for merging into per-sample parameter maps
    pub fn to_map(&self) -> Result<Map<String, Value>> {
        let value = serde_json::to_value(self).map_err(|e| TransformError::Parse(format!("mask info: {e}")))?;
        object_map(value)
    }
}

fn object_map(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(TransformError::Parse(format!("mask info is not a JSON object: {other}"))),
    }
}

/// A mask generating policy. Implementations must be deterministic for a given seed and
/// draw fresh randomness when no seed is given. Masks have the rank of the requested shape with
/// every axis singleton except the width axis.
pub trait MaskFunc: Send + Sync {
    fn mask(&self, shape: &[usize], seed: Option<u64>) -> Result<(ArrayD<f32>, MaskInfo)>;
}

/// Derives a mask seed from a file name so that every slice of a volume receives the same mask
/// in every epoch while different volumes receive different masks.
pub fn seed_from_file_name(file_name: &str) -> u64 {
    file_name
        .chars()
        .fold(0xcbf2_9ce4_8422_2325u64, |acc, c| (acc ^ c as u64).wrapping_mul(0x0100_0000_01b3))
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    }
}

/// number of columns and the mask shape for a k-space shape `[..., H, W, 2]`
fn column_mask_shape(shape: &[usize]) -> Result<(usize, Vec<usize>)> {
    if shape.len() < 3 {
        return Err(TransformError::shape(format!(
            "mask shape must have at least 3 dimensions, got {:?}",
            shape
        )));
    }
    let nd = shape.len();
    let num_cols = shape[nd - 2];
    if num_cols == 0 {
        return Err(TransformError::shape("cannot build a mask for zero columns"));
    }
    let mut mask_shape = vec![1; nd];
    mask_shape[nd - 2] = num_cols;
    Ok((num_cols, mask_shape))
}

fn columns_to_mask(columns: Vec<f32>, mask_shape: &[usize]) -> Result<ArrayD<f32>> {
    Ok(ArrayD::from_shape_vec(IxDyn(mask_shape), columns)?)
}

/// paired center fractions and accelerations shared by the column policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskParams {
    pub center_fractions: Vec<f32>,
    pub accelerations: Vec<usize>,
}

impl MaskParams {
    pub fn new(center_fractions: Vec<f32>, accelerations: Vec<usize>) -> Result<Self> {
        if center_fractions.is_empty() || center_fractions.len() != accelerations.len() {
            return Err(TransformError::config(
                "the number of center fractions must match the number of accelerations",
            ));
        }
        if accelerations.iter().any(|&a| a == 0) {
            return Err(TransformError::config("accelerations must be positive"));
        }
        if center_fractions.iter().any(|f| !(0.0..=1.0).contains(f)) {
            return Err(TransformError::config("center fractions must lie in [0, 1]"));
        }
        Ok(Self { center_fractions, accelerations })
    }

    fn choose(&self, rng: &mut StdRng) -> (f32, usize) {
        let choice = rng.random_range(0..self.accelerations.len());
        (self.center_fractions[choice], self.accelerations[choice])
    }
}

/// marks the `num_low` central columns as sampled
fn fill_center(columns: &mut [f32], num_low: usize) {
    let num_cols = columns.len();
    let pad = (num_cols - num_low + 1) / 2;
    columns[pad..pad + num_low].fill(1.);
}

/// Fixed-acceleration random column sampling. A fully sampled center band is kept and the
/// remaining columns are sampled with the probability that yields the requested acceleration
/// on average.
#[derive(Debug, Clone)]
pub struct RandomMask {
    params: MaskParams,
}

impl RandomMask {
    pub fn new(params: MaskParams) -> Self {
        Self { params }
    }

    fn generate(&self, shape: &[usize], rng: &mut StdRng) -> Result<(ArrayD<f32>, MaskInfo)> {
        let (num_cols, mask_shape) = column_mask_shape(shape)?;
        let (center_fraction, acceleration) = self.params.choose(rng);
        let num_low = ((num_cols as f32) * center_fraction).round() as usize;

        let mut columns = vec![0f32; num_cols];
        if num_low < num_cols {
            let prob = (num_cols as f64 / acceleration as f64 - num_low as f64) / (num_cols - num_low) as f64;
            columns.iter_mut().for_each(|c| {
                if rng.random::<f64>() < prob {
                    *c = 1.
                }
            });
        }
        fill_center(&mut columns, num_low);

        let info = MaskInfo {
            acceleration,
            center_fraction,
            num_low_freqs: num_low,
            policy: MaskPolicy::Random,
        };
        Ok((columns_to_mask(columns, &mask_shape)?, info))
    }
}

impl MaskFunc for RandomMask {
    fn mask(&self, shape: &[usize], seed: Option<u64>) -> Result<(ArrayD<f32>, MaskInfo)> {
        self.generate(shape, &mut rng_for(seed))
    }
}

/// Equally spaced column sampling with a fully sampled center band. The spacing is adjusted so
/// that center and outer columns together reach the requested acceleration.
#[derive(Debug, Clone)]
pub struct EquispacedMask {
    params: MaskParams,
}

impl EquispacedMask {
    pub fn new(params: MaskParams) -> Self {
        Self { params }
    }

    fn generate(&self, shape: &[usize], rng: &mut StdRng) -> Result<(ArrayD<f32>, MaskInfo)> {
        let (num_cols, mask_shape) = column_mask_shape(shape)?;
        let (center_fraction, acceleration) = self.params.choose(rng);
        let num_low = ((num_cols as f32) * center_fraction).round() as usize;

        let mut columns = vec![0f32; num_cols];
        let denominator = (num_low * acceleration) as f64 - num_cols as f64;
        // otherwise the center band alone exceeds the sampling budget
        if denominator < 0. {
            let spacing = acceleration as f64 * (num_low as f64 - num_cols as f64) / denominator;
            let offset = rng.random_range(0..(spacing.round() as usize).max(1));
            let mut t = offset as f64;
            while t < (num_cols - 1) as f64 {
                columns[(t.round() as usize).min(num_cols - 1)] = 1.;
                t += spacing;
            }
        }
        fill_center(&mut columns, num_low);

        let info = MaskInfo {
            acceleration,
            center_fraction,
            num_low_freqs: num_low,
            policy: MaskPolicy::Equispaced,
        };
        Ok((columns_to_mask(columns, &mask_shape)?, info))
    }
}

impl MaskFunc for EquispacedMask {
    fn mask(&self, shape: &[usize], seed: Option<u64>) -> Result<(ArrayD<f32>, MaskInfo)> {
        self.generate(shape, &mut rng_for(seed))
    }
}

/// Chooses between random and equispaced sampling for every call. The chosen policy is
/// recorded in [MaskInfo::policy].
#[derive(Debug, Clone)]
pub struct RandomTypeMask {
    random: RandomMask,
    equispaced: EquispacedMask,
}

impl RandomTypeMask {
    pub fn new(params: MaskParams) -> Self {
        Self {
            random: RandomMask::new(params.clone()),
            equispaced: EquispacedMask::new(params),
        }
    }
}

impl MaskFunc for RandomTypeMask {
    fn mask(&self, shape: &[usize], seed: Option<u64>) -> Result<(ArrayD<f32>, MaskInfo)> {
        let mut rng = rng_for(seed);
        if rng.random_bool(0.5) {
            self.random.generate(shape, &mut rng)
        } else {
            self.equispaced.generate(shape, &mut rng)
        }
    }
}

/// Returns a previously generated mask for every call, for retrospective re-subsampling.
#[derive(Debug, Clone)]
pub struct FixedMask {
    mask: ArrayD<f32>,
    info: MaskInfo,
}

impl FixedMask {
    pub fn new(mask: ArrayD<f32>, info: MaskInfo) -> Self {
        Self { mask, info: MaskInfo { policy: MaskPolicy::Fixed, ..info } }
    }
}

impl MaskFunc for FixedMask {
    fn mask(&self, shape: &[usize], _seed: Option<u64>) -> Result<(ArrayD<f32>, MaskInfo)> {
        let compatible = self.mask.ndim() == shape.len()
            && self.mask.shape().iter().zip(shape).all(|(&m, &s)| m == 1 || m == s);
        if !compatible {
            return Err(TransformError::shape(format!(
                "fixed mask of shape {:?} does not broadcast to {:?}",
                self.mask.shape(),
                shape
            )));
        }
        Ok((self.mask.clone(), self.info.clone()))
    }
}

/// mask generation settings as stored in parameter files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskConfig {
    pub mask_type: MaskType,
    pub center_fractions: Vec<f32>,
    pub accelerations: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskType {
    Random,
    Equispaced,
    RandomType,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            mask_type: MaskType::Random,
            center_fractions: vec![0.08, 0.04],
            accelerations: vec![4, 8],
        }
    }
}

impl MaskConfig {
    pub fn build(&self) -> Result<Box<dyn MaskFunc>> {
        let params = MaskParams::new(self.center_fractions.clone(), self.accelerations.clone())?;
        Ok(match self.mask_type {
            MaskType::Random => Box::new(RandomMask::new(params)),
            MaskType::Equispaced => Box::new(EquispacedMask::new(params)),
            MaskType::RandomType => Box::new(RandomTypeMask::new(params)),
        })
    }
}

/// the data shape with every axis before `[H, W, 2]` collapsed to 1
fn collapsed_shape(data: &ArrayViewD<f32>) -> Result<Vec<usize>> {
    if data.ndim() < 3 {
        return Err(TransformError::shape(format!(
            "k-space must have at least 3 dimensions, got shape {:?}",
            data.shape()
        )));
    }
    let nd = data.ndim();
    let mut shape = data.shape().to_vec();
    shape[..nd - 3].fill(1);
    Ok(shape)
}

fn broadcast_mask<'a>(mask: &'a ArrayViewD<f32>, data: &ArrayViewD<f32>) -> Result<ArrayViewD<'a, f32>> {
    mask.broadcast(data.raw_dim()).ok_or_else(|| {
        TransformError::shape(format!(
            "mask of shape {:?} does not broadcast to data of shape {:?}",
            mask.shape(),
            data.shape()
        ))
    })
}

fn multiply(data: &ArrayViewD<f32>, mask: &ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    let m = broadcast_mask(mask, data)?;
    Ok(Zip::from(data).and(&m).map_collect(|&d, &m| d * m))
}

fn select(data: &ArrayViewD<f32>, mask: &ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    let m = broadcast_mask(mask, data)?;
    Ok(Zip::from(data).and(&m).map_collect(|&d, &m| if m == 0. { 0. } else { d }))
}

/// Subsamples k-space by multiplying with a generated mask. Unsampled entries become signed
/// zeros. Returns the masked data, the mask and its metadata.
pub fn apply_mask(
    data: ArrayViewD<f32>,
    mask_func: &dyn MaskFunc,
    seed: Option<u64>,
) -> Result<(ArrayD<f32>, ArrayD<f32>, MaskInfo)> {
    let shape = collapsed_shape(&data)?;
    let (mask, info) = mask_func.mask(&shape, seed)?;
    debug!(acceleration = info.acceleration, num_low_freqs = info.num_low_freqs, "applying mask");
    Ok((multiply(&data, &mask.view())?, mask, info))
}

/// Subsamples k-space by selecting entries where the mask is non-zero. Unsampled entries are
/// replaced by exact positive zero and sampled entries are copied unchanged.
pub fn apply_info_mask(
    data: ArrayViewD<f32>,
    mask_func: &dyn MaskFunc,
    seed: Option<u64>,
) -> Result<(ArrayD<f32>, ArrayD<f32>, MaskInfo)> {
    let shape = collapsed_shape(&data)?;
    let (mask, info) = mask_func.mask(&shape, seed)?;
    Ok((select(&data, &mask.view())?, mask, info))
}

/// applies an existing mask with the same selection rule as [apply_info_mask]
pub fn apply_retro_mask(data: ArrayViewD<f32>, mask: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    select(&data, &mask)
}

/// [apply_mask] for policies that choose their variant per sample; returns the chosen policy
pub fn apply_random_mask(
    data: ArrayViewD<f32>,
    mask_func: &dyn MaskFunc,
    seed: Option<u64>,
) -> Result<(ArrayD<f32>, ArrayD<f32>, MaskPolicy)> {
    let (masked, mask, info) = apply_mask(data, mask_func, seed)?;
    Ok((masked, mask, info.policy))
}
