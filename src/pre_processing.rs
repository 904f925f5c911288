use crate::error::{Result, TransformError};
use crate::fft::{complex_abs, from_complex, ifft2, root_sum_of_squares};
use crate::layout::k_slice_to_chw;
use crate::mask::{apply_info_mask, apply_mask, seed_from_file_name, MaskFunc, MaskInfo};
use crate::padding::{center_crop, complex_center_crop, crop_width, pad_width, PadSplit};
use crate::scaling::{amplify, log_weighting, mean, std_dev, std_scale};
use crate::{Challenge, Device, ReconParams};
use ndarray::{Array3, ArrayD, Axis, Ix3};
use num_complex::Complex32;
use rand::Rng;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// One slice as handed over by the data loader
#[derive(Debug, Clone)]
pub struct SliceInput {
    /// `(Coil, H, W)` for multi-coil or `(H, W)` for single-coil data
    pub kspace: ArrayD<Complex32>,
    pub target: Option<ArrayD<f32>>,
    /// acquisition attributes
    pub attrs: Map<String, Value>,
    pub file_name: String,
    pub slice_num: usize,
}

impl SliceInput {
    pub fn new(kspace: ArrayD<Complex32>, file_name: impl Into<String>, slice_num: usize) -> Self {
        Self {
            kspace,
            target: None,
            attrs: Map::new(),
            file_name: file_name.into(),
            slice_num,
        }
    }

    pub fn with_target(mut self, target: ArrayD<f32>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_attrs(mut self, attrs: Map<String, Value>) -> Self {
        self.attrs = attrs;
        self
    }

    /// k-space as a `(Coil, H, W, 2)` tensor. Single-coil slices gain a coil axis of size 1.
    pub fn kslice(&self) -> Result<ArrayD<f32>> {
        let k = match self.kspace.ndim() {
            2 => self.kspace.view().insert_axis(Axis(0)),
            3 => self.kspace.view(),
            _ => {
                return Err(TransformError::shape(format!(
                    "invalid slice shape {:?}, expected (H, W) or (Coil, H, W)",
                    self.kspace.shape()
                )))
            }
        };
        Ok(from_complex(&k.to_owned()))
    }
}

/// zero pads the width of a CHW tensor to a multiple of `divisor`
pub fn pad_to_divisor(chw: Array3<f32>, divisor: usize) -> Result<Array3<f32>> {
    let split = PadSplit::for_divisor(chw.len_of(Axis(2)), divisor)?;
    Ok(pad_width(chw.view().into_dyn(), split)?.into_dimensionality::<Ix3>()?)
}

/// Settings shared by the k-space input transforms
#[derive(Clone)]
pub struct InputConfig {
    pub mask_func: Arc<dyn MaskFunc>,
    pub challenge: Challenge,
    pub device: Device,
    /// derive the mask seed from the file name so every slice of a volume shares a mask
    pub use_seed: bool,
    pub divisor: usize,
}

impl InputConfig {
    pub fn new(mask_func: Arc<dyn MaskFunc>, challenge: Challenge, device: Device) -> Self {
        Self {
            mask_func,
            challenge,
            device,
            use_seed: true,
            divisor: 1,
        }
    }

    pub fn with_seed(mut self, use_seed: bool) -> Self {
        self.use_seed = use_seed;
        self
    }

    pub fn with_divisor(mut self, divisor: usize) -> Self {
        self.divisor = divisor;
        self
    }

    pub fn from_params(params: &ReconParams) -> Result<Self> {
        let mask_func: Arc<dyn MaskFunc> = Arc::from(params.mask.build()?);
        Ok(Self::new(mask_func, params.challenge, params.device.clone())
            .with_seed(params.use_seed)
            .with_divisor(params.divisor))
    }

    pub fn seed(&self, file_name: &str) -> Option<u64> {
        self.use_seed.then(|| seed_from_file_name(file_name))
    }

    fn pad(&self, chw: Array3<f32>) -> Result<Array3<f32>> {
        pad_to_divisor(chw, self.divisor)
    }
}

/// scale and mask of a k-space input, needed to restore network outputs
#[derive(Debug, Clone)]
pub struct KSpaceParams {
    pub scale: f32,
    pub mask: ArrayD<f32>,
    pub info: MaskInfo,
    pub device: Device,
}

/// [KSpaceParams] plus the fully sampled k-space `(1, Coil, H, W, 2)`
#[derive(Debug, Clone)]
pub struct K2CParams {
    pub kspace_target: ArrayD<f32>,
    pub kspace: KSpaceParams,
}

/// standardization applied to image-domain inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageParams {
    pub scale: f32,
    pub bias: f32,
}

/// Amplified, masked and padded k-space for training with magnitude image targets
#[derive(Clone)]
pub struct TrainInputSliceTransform {
    pub config: InputConfig,
    pub amp_fac: f32,
}

impl TrainInputSliceTransform {
    pub fn new(config: InputConfig, amp_fac: f32) -> Self {
        Self { config, amp_fac }
    }

    /// returns the padded CHW input and the `(Coil, H, W)` magnitude target
    pub fn transform(&self, input: &SliceInput) -> Result<(Array3<f32>, ArrayD<f32>)> {
        let k = input.kslice()?;
        let width = k.len_of(Axis(2));
        if width % 2 != 0 {
            return Err(TransformError::shape(format!("k-space width must be even, got {width}")));
        }
        let k = amplify(k.view(), self.amp_fac)?;
        let target = complex_abs(ifft2(k.view())?.view())?;
        let seed = self.config.seed(&input.file_name);
        let (masked, _, _) = apply_mask(k.view(), self.config.mask_func.as_ref(), seed)?;
        let data = self.config.pad(k_slice_to_chw(masked.view())?)?;
        debug!("train input {:?} for {} slice {}", data.shape(), input.file_name, input.slice_num);
        Ok((data, target))
    }
}

/// Inference input. Validation data is masked with the file seed, test data is used as is.
#[derive(Clone)]
pub struct SubmitInputSliceTransform {
    pub mask_func: Option<Arc<dyn MaskFunc>>,
    pub challenge: Challenge,
    pub divisor: usize,
}

impl SubmitInputSliceTransform {
    pub fn new(challenge: Challenge, mask_func: Option<Arc<dyn MaskFunc>>, divisor: usize) -> Self {
        Self { mask_func, challenge, divisor }
    }

    pub fn transform(&self, input: &SliceInput) -> Result<Array3<f32>> {
        let k = input.kslice()?;
        let masked = match &self.mask_func {
            Some(f) => apply_mask(k.view(), f.as_ref(), Some(seed_from_file_name(&input.file_name)))?.0,
            None => k,
        };
        pad_to_divisor(k_slice_to_chw(masked.view())?, self.divisor)
    }
}

/// K-space input standardized by the standard deviation of the fully sampled k-space
#[derive(Clone)]
pub struct KInputSliceTransform {
    pub config: InputConfig,
}

impl KInputSliceTransform {
    pub fn new(config: InputConfig) -> Self {
        Self { config }
    }

    /// returns the padded CHW input, the magnitude target and the scale
    pub fn transform(&self, input: &SliceInput) -> Result<(Array3<f32>, ArrayD<f32>, f32)> {
        let k = input.kslice()?;
        let (scaled, scale) = std_scale(k.view());
        let target = complex_abs(ifft2(k.view())?.view())?;
        let seed = self.config.seed(&input.file_name);
        let (masked, _, _) = apply_mask(scaled.view(), self.config.mask_func.as_ref(), seed)?;
        let data = self.config.pad(k_slice_to_chw(masked.view())?)?;
        debug!(scale, "k input for {}", input.file_name);
        Ok((data, target, scale))
    }
}

/// masks, standardizes, optionally log-weights and pads a `(Coil, H, W, 2)` k-slice
fn kspace_input(
    config: &InputConfig,
    kspace_target: &ArrayD<f32>,
    log_amp_scale: Option<f32>,
    file_name: &str,
) -> Result<(Array3<f32>, KSpaceParams)> {
    let seed = config.seed(file_name);
    let (masked, mask, info) = apply_mask(kspace_target.view(), config.mask_func.as_ref(), seed)?;
    let (masked, scale) = std_scale(masked.view());
    let mut chw = k_slice_to_chw(masked.view())?;
    if let Some(s) = log_amp_scale {
        chw = log_weighting(chw.view().into_dyn(), s)?.into_dimensionality::<Ix3>()?;
    }
    let data = config.pad(chw)?;
    debug!(scale, acceleration = info.acceleration, "k-space input for {file_name}");
    let params = KSpaceParams {
        scale,
        mask,
        info,
        device: config.device.clone(),
    };
    Ok((data, params))
}

/// K-space to k-space: masked k-space in, fully sampled k-space as the target
#[derive(Clone)]
pub struct InputSliceTransformK2K {
    pub config: InputConfig,
    pub log_amp_scale: Option<f32>,
}

impl InputSliceTransformK2K {
    pub fn new(config: InputConfig, log_amp_scale: Option<f32>) -> Self {
        Self { config, log_amp_scale }
    }

    /// returns the padded CHW input, the `(Coil, H, W, 2)` k-space target and its parameters
    pub fn transform(&self, input: &SliceInput) -> Result<(Array3<f32>, ArrayD<f32>, KSpaceParams)> {
        let kspace_target = input.kslice()?;
        let (data, params) = kspace_input(&self.config, &kspace_target, self.log_amp_scale, &input.file_name)?;
        Ok((data, kspace_target, params))
    }
}

/// K-space to complex image: masked k-space in, the complex image of the fully sampled
/// k-space as the target
#[derive(Clone)]
pub struct InputSliceTransformK2C {
    pub config: InputConfig,
    pub log_amp_scale: Option<f32>,
}

impl InputSliceTransformK2C {
    pub fn new(config: InputConfig, log_amp_scale: Option<f32>) -> Self {
        Self { config, log_amp_scale }
    }

    /// returns the padded CHW input, the `(Coil, H, W, 2)` complex image target and the
    /// parameters holding the batched k-space target
    pub fn transform(&self, input: &SliceInput) -> Result<(Array3<f32>, ArrayD<f32>, K2CParams)> {
        let kspace_target = input.kslice()?;
        let c_img_target = ifft2(kspace_target.view())?;
        let (data, kspace) = kspace_input(&self.config, &kspace_target, self.log_amp_scale, &input.file_name)?;
        let params = K2CParams {
            kspace_target: kspace_target.insert_axis(Axis(0)),
            kspace,
        };
        Ok((data, c_img_target, params))
    }
}

/// Complex image to complex image. The input is standardized and centered, and the width of
/// input and target is cut down to a multiple of the divisor instead of padded.
#[derive(Clone)]
pub struct InputSliceTransformC2C {
    pub config: InputConfig,
}

impl InputSliceTransformC2C {
    pub fn new(config: InputConfig) -> Self {
        Self { config }
    }

    /// returns the CHW input, the CHW complex image target and the standardization
    pub fn transform(&self, input: &SliceInput) -> Result<(Array3<f32>, Array3<f32>, ImageParams)> {
        let kspace_target = input.kslice()?;
        let c_img_target = k_slice_to_chw(ifft2(kspace_target.view())?.view())?;
        let seed = self.config.seed(&input.file_name);
        let (masked, _, _) = apply_mask(kspace_target.view(), self.config.mask_func.as_ref(), seed)?;
        let c_img_input = k_slice_to_chw(ifft2(masked.view())?.view())?;

        let (scaled, scale) = std_scale(c_img_input.view().into_dyn());
        let bias = mean(&scaled.view());
        let centered = scaled.mapv(|v| v - bias);

        let split = PadSplit::for_crop(c_img_target.len_of(Axis(2)), self.config.divisor)?;
        let c_img_input = crop_width(centered.view(), split)?.to_owned().into_dimensionality::<Ix3>()?;
        let c_img_target = crop_width(c_img_target.view().into_dyn(), split)?.to_owned().into_dimensionality::<Ix3>()?;
        debug!(scale, bias, "image input for {}", input.file_name);
        Ok((c_img_input, c_img_target, ImageParams { scale, bias }))
    }
}

/// inputs and targets of the RSS transform
#[derive(Debug, Clone)]
pub struct RssTargets {
    /// standardized magnitude images `(1, Coil, res, res)`
    pub img_inputs: ArrayD<f32>,
    pub rss_targets: Option<ArrayD<f32>>,
    /// RSS of the magnitude images `(res, res)`
    pub rss_inputs: ArrayD<f32>,
}

#[derive(Debug, Clone)]
pub struct RssParams {
    pub img_scale: f32,
    pub mask: ArrayD<f32>,
    /// mask info merged with the acquisition attributes
    pub extra: Map<String, Value>,
}

/// Image-domain inputs for RSS targets. Only single slice batches are handled.
#[derive(Clone)]
pub struct PreProcessRss {
    pub config: InputConfig,
    /// side length of the center crop
    pub resolution: usize,
    /// random up-down and left-right flips
    pub augment: bool,
}

impl PreProcessRss {
    pub fn new(config: InputConfig, resolution: usize, augment: bool) -> Self {
        Self { config, resolution, augment }
    }

    /// k-space batched to `(1, Coil, H, W)`
    fn batched(kspace: &ArrayD<Complex32>) -> Result<ArrayD<Complex32>> {
        let k = match kspace.ndim() {
            2 => kspace.view().insert_axis(Axis(0)).insert_axis(Axis(0)),
            3 => kspace.view().insert_axis(Axis(0)),
            4 => kspace.view(),
            _ => {
                return Err(TransformError::shape(format!(
                    "k-space target has invalid shape {:?}",
                    kspace.shape()
                )))
            }
        };
        if k.len_of(Axis(0)) != 1 {
            return Err(TransformError::unsupported("batch size should be 1 for now"));
        }
        Ok(k.to_owned())
    }

    /// returns the cropped complex image `(1, Coil, res, res, 2)`, the network inputs and targets,
    /// and the parameters
    pub fn transform<R: Rng + ?Sized>(&self, input: &SliceInput, rng: &mut R) -> Result<(ArrayD<f32>, RssTargets, RssParams)> {
        let kspace_target = from_complex(&Self::batched(&input.kspace)?);
        let seed = self.config.seed(&input.file_name);
        let (masked, mask, info) = apply_info_mask(kspace_target.view(), self.config.mask_func.as_ref(), seed)?;

        let complex_image = ifft2(masked.view())?;
        let input_image = complex_abs(complex_image.view())?;
        let res = (self.resolution, self.resolution);
        let complex_image = complex_center_crop(complex_image.view(), res)?.to_owned();
        let mut input_image = center_crop(input_image.view(), res)?.to_owned();
        let img_scale = std_dev(&input_image.view());
        input_image.mapv_inplace(|v| v / img_scale);

        let mut extra = info.to_map()?;
        extra.extend(input.attrs.clone());

        let mut target = input.target.clone();
        if self.augment {
            let flip_lr = rng.random::<f32>() < 0.5;
            let flip_ud = rng.random::<f32>() < 0.5;
            for (flip, from_end) in [(flip_ud, 2), (flip_lr, 1)] {
                if !flip {
                    continue;
                }
                let nd = input_image.ndim();
                input_image.invert_axis(Axis(nd - from_end));
                if let Some(t) = target.as_mut() {
                    let nd = t.ndim();
                    t.invert_axis(Axis(nd - from_end));
                }
            }
        }

        let rss_inputs = root_sum_of_squares(input_image.view(), Axis(1))?.index_axis_move(Axis(0), 0);
        debug!(img_scale, "rss input for {} slice {}", input.file_name, input.slice_num);
        let targets = RssTargets {
            img_inputs: input_image,
            rss_targets: target,
            rss_inputs,
        };
        Ok((complex_image, targets, RssParams { img_scale, mask, extra }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::to_complex;
    use crate::mask::{MaskParams, RandomMask};
    use ndarray::{Array, IxDyn};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_kspace(shape: &[usize], seed: u64) -> ArrayD<Complex32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array::from_shape_fn(IxDyn(shape), |_| Complex32::new(rng.random_range(-1f32..1.), rng.random_range(-1f32..1.)))
    }

    fn config() -> InputConfig {
        let params = MaskParams::new(vec![0.2], vec![4]).unwrap();
        InputConfig::new(Arc::new(RandomMask::new(params)), Challenge::SingleCoil, Device::cpu())
    }

    #[test]
    fn slice_rank_is_checked() {
        let input = SliceInput::new(random_kspace(&[6, 8], 0), "a.h5", 0);
        assert_eq!(input.kslice().unwrap().shape(), &[1, 6, 8, 2]);
        let input = SliceInput::new(random_kspace(&[1, 2, 6, 8], 0), "a.h5", 0);
        assert!(matches!(input.kslice(), Err(TransformError::Shape(_))));
    }

    #[test]
    fn k2k_input_is_masked_scaled_and_padded() {
        let input = SliceInput::new(random_kspace(&[2, 10, 20], 1), "file1.h5", 3);
        let t = InputSliceTransformK2K::new(config().with_divisor(16), None);
        let (data, target, params) = t.transform(&input).unwrap();
        assert_eq!(data.shape(), &[4, 10, 32]);
        assert_eq!(target.shape(), &[2, 10, 20, 2]);
        assert_eq!(params.mask.shape(), &[1, 1, 20, 1]);
        assert!(params.device.is_host());

        // the padding columns stay empty
        assert!(data.slice(ndarray::s![.., .., ..6]).iter().all(|&v| v == 0.));
        assert!(data.slice(ndarray::s![.., .., 26..]).iter().all(|&v| v == 0.));

        // unscaling the input recovers the masked k-space
        let (masked, _, _) = apply_mask(target.view(), config().mask_func.as_ref(), Some(seed_from_file_name("file1.h5"))).unwrap();
        let expected = k_slice_to_chw(masked.view()).unwrap();
        let restored = data.slice(ndarray::s![.., .., 6..26]).mapv(|v| v * params.scale);
        for (a, b) in restored.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5);
        }

        // same file, same mask
        let (_, _, again) = t.transform(&input).unwrap();
        assert_eq!(again.mask, params.mask);
    }

    #[test]
    fn k2k_log_weighting() {
        let input = SliceInput::new(random_kspace(&[8, 8], 2), "w.h5", 0);
        let plain = InputSliceTransformK2K::new(config(), None).transform(&input).unwrap().0;
        let weighted = InputSliceTransformK2K::new(config(), Some(2.)).transform(&input).unwrap().0;
        let expected = log_weighting(plain.view().into_dyn(), 2.).unwrap();
        assert_eq!(weighted.into_dyn(), expected);
    }

    #[test]
    fn k2c_target_is_complex_image() {
        let k = random_kspace(&[3, 8, 12], 3);
        let input = SliceInput::new(k.clone(), "c.h5", 0);
        let (data, c_img, params) = InputSliceTransformK2C::new(config().with_divisor(8), None).transform(&input).unwrap();
        assert_eq!(data.shape(), &[6, 8, 16]);
        assert_eq!(c_img.shape(), &[3, 8, 12, 2]);
        assert_eq!(params.kspace_target.shape(), &[1, 3, 8, 12, 2]);
        let back = crate::fft::fft2(c_img.view()).unwrap();
        let k_real = from_complex(&k);
        back.iter().zip(k_real.iter()).for_each(|(a, b)| assert!((a - b).abs() < 1e-5));
    }

    #[test]
    fn train_and_k_inputs() {
        let odd = SliceInput::new(random_kspace(&[8, 7], 4), "o.h5", 0);
        let train = TrainInputSliceTransform::new(config(), 1e4);
        assert!(matches!(train.transform(&odd), Err(TransformError::Shape(_))));

        let input = SliceInput::new(random_kspace(&[8, 8], 4), "t.h5", 0);
        let (data, target) = train.transform(&input).unwrap();
        assert_eq!(data.shape(), &[2, 8, 8]);
        assert_eq!(target.shape(), &[1, 8, 8]);

        let (_, target_k, scale) = KInputSliceTransform::new(config()).transform(&input).unwrap();
        assert!((scale - std_dev(&input.kslice().unwrap().view())).abs() < 1e-6);
        let ratio = target.sum() / target_k.sum();
        assert!((ratio / 1e4 - 1.).abs() < 1e-4);
    }

    #[test]
    fn submit_without_mask_keeps_kspace() {
        let input = SliceInput::new(random_kspace(&[2, 4, 6], 5), "s.h5", 0);
        let t = SubmitInputSliceTransform::new(Challenge::MultiCoil, None, 4);
        let data = t.transform(&input).unwrap();
        assert_eq!(data.shape(), &[4, 4, 8]);
        let chw = k_slice_to_chw(input.kslice().unwrap().view()).unwrap();
        assert_eq!(data.slice(ndarray::s![.., .., 1..7]), chw);

        let masked = SubmitInputSliceTransform::new(Challenge::MultiCoil, Some(config().mask_func), 4);
        assert_eq!(masked.transform(&input).unwrap(), masked.transform(&input).unwrap());
    }

    #[test]
    fn c2c_standardization_is_invertible() {
        let input = SliceInput::new(random_kspace(&[2, 6, 20], 6), "i.h5", 0);
        let t = InputSliceTransformC2C::new(config().with_divisor(8));
        let (x, target, p) = t.transform(&input).unwrap();
        assert_eq!(x.shape(), &[4, 6, 16]);
        assert_eq!(target.shape(), &[4, 6, 16]);

        let k = input.kslice().unwrap();
        let (masked, _, _) = apply_mask(k.view(), config().mask_func.as_ref(), Some(seed_from_file_name("i.h5"))).unwrap();
        let image = k_slice_to_chw(ifft2(masked.view()).unwrap().view()).unwrap();
        let image = image.slice(ndarray::s![.., .., 2..18]);
        for (a, b) in x.iter().zip(image.iter()) {
            assert!(((a + p.bias) * p.scale - b).abs() < 1e-5);
        }
    }

    #[test]
    fn rss_inputs() {
        let k = random_kspace(&[3, 12, 12], 7);
        let input = SliceInput::new(k.clone(), "r.h5", 0);
        let t = PreProcessRss::new(config(), 8, false);
        let mut rng = StdRng::seed_from_u64(0);
        let (c_img, targets, params) = t.transform(&input, &mut rng).unwrap();
        assert_eq!(c_img.shape(), &[1, 3, 8, 8, 2]);
        assert_eq!(targets.img_inputs.shape(), &[1, 3, 8, 8]);
        assert_eq!(targets.rss_inputs.shape(), &[8, 8]);
        assert!((std_dev(&targets.img_inputs.view()) - 1.).abs() < 1e-5);
        assert!(params.extra.contains_key("acceleration"));

        let batch = SliceInput::new(random_kspace(&[2, 3, 12, 12], 7), "r.h5", 0);
        assert!(matches!(t.transform(&batch, &mut rng), Err(TransformError::Unsupported(_))));
    }

    #[test]
    fn rss_augmentation_flips_inputs_and_targets_together() {
        let k = random_kspace(&[2, 10, 10], 8);
        let plain = PreProcessRss::new(config(), 10, false);
        let mut rng = StdRng::seed_from_u64(1);
        let reference = plain.transform(&SliceInput::new(k.clone(), "f.h5", 0), &mut rng).unwrap().1;

        let augmented = PreProcessRss::new(config(), 10, true);
        let input = SliceInput::new(k, "f.h5", 0).with_target(reference.img_inputs.clone());
        for seed in 0..8 {
            let (_, targets, _) = augmented.transform(&input, &mut StdRng::seed_from_u64(seed)).unwrap();
            assert_eq!(Some(targets.img_inputs), targets.rss_targets);
        }
    }

    #[test]
    fn tensor_conversion_round_trip() {
        let k = random_kspace(&[2, 3], 9);
        assert_eq!(to_complex(from_complex(&k).view()).unwrap(), k);
    }
}
