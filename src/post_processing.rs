use crate::consistency::replace_measured;
use crate::error::{Result, TransformError};
use crate::fft::{complex_abs, ifft2};
use crate::layout::{chw_to_k_slice, nchw_to_kspace};
use crate::padding::{crop_width, PadSplit};
use crate::pre_processing::{ImageParams, K2CParams, KSpaceParams};
use crate::scaling::{amplify, exp_weighting};
use ndarray::{ArrayD, ArrayView3, ArrayView4, ArrayViewD, Axis};
use tracing::debug;

fn last_dim(x: &ArrayViewD<f32>, from_end: usize) -> Result<usize> {
    x.ndim()
        .checked_sub(from_end)
        .map(|i| x.shape()[i])
        .ok_or_else(|| TransformError::shape(format!("tensor of shape {:?} has too few dimensions", x.shape())))
}

/// Magnitude images from a CHW k-space prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputSliceTransform {
    pub amplification_factor: f32,
}

impl Default for OutputSliceTransform {
    fn default() -> Self {
        Self { amplification_factor: 1. }
    }
}

impl OutputSliceTransform {
    pub fn new(amplification_factor: f32) -> Self {
        Self { amplification_factor }
    }

    /// `target` is the `(Coil, H, W)` magnitude the prediction is compared against
    pub fn transform(&self, output: ArrayView3<f32>, target: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        let split = PadSplit::from_widths(output.len_of(Axis(2)), last_dim(&target, 1)?)?;
        let cropped = crop_width(output.into_dyn(), split)?;
        let k = chw_to_k_slice(cropped)?;
        let image = complex_abs(ifft2(k.view())?.view())?;
        let image = amplify(image.view(), self.amplification_factor)?;
        if image.shape() != target.shape() {
            return Err(TransformError::shape(format!(
                "reconstruction shape {:?} does not match target shape {:?}",
                image.shape(),
                target.shape()
            )));
        }
        Ok(image)
    }
}

/// Magnitude images from a batch of NCHW k-space predictions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputBatchTransform {
    pub amplification_factor: f32,
}

impl Default for OutputBatchTransform {
    fn default() -> Self {
        Self { amplification_factor: 1. }
    }
}

impl OutputBatchTransform {
    pub fn new(amplification_factor: f32) -> Self {
        Self { amplification_factor }
    }

    /// `targets` are the `(N, Coil, H, W)` magnitudes the predictions are compared against
    pub fn transform(&self, outputs: ArrayView4<f32>, targets: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        let split = PadSplit::from_widths(outputs.len_of(Axis(3)), last_dim(&targets, 1)?)?;
        let cropped = crop_width(outputs.into_dyn(), split)?;
        let k = nchw_to_kspace(cropped)?;
        let images = complex_abs(ifft2(k.view())?.view())?;
        let images = amplify(images.view(), self.amplification_factor)?;
        if images.shape() != targets.shape() {
            return Err(TransformError::shape(format!(
                "reconstruction shape {:?} does not match target shape {:?}",
                images.shape(),
                targets.shape()
            )));
        }
        debug!("batch output {:?}", images.shape());
        Ok(images)
    }
}

/// K-space prediction back to `(1, Coil, H, W, 2)` k-space at the original scale, optionally
/// with the measured samples put back in
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputTransformK2K {
    pub replace: bool,
    pub log_amp_scale: Option<f32>,
}

impl OutputTransformK2K {
    pub fn new(replace: bool, log_amp_scale: Option<f32>) -> Self {
        Self { replace, log_amp_scale }
    }

    /// `kspace_target` is `(Coil, H, W, 2)` or batched `(1, Coil, H, W, 2)`
    pub fn transform(
        &self,
        outputs: ArrayView4<f32>,
        kspace_target: ArrayViewD<f32>,
        params: &KSpaceParams,
    ) -> Result<ArrayD<f32>> {
        if outputs.len_of(Axis(0)) != 1 {
            return Err(TransformError::unsupported("batch size should be 1 for now"));
        }
        let target = match kspace_target.ndim() {
            4 => kspace_target.insert_axis(Axis(0)),
            _ => kspace_target,
        };
        let split = PadSplit::from_widths(outputs.len_of(Axis(3)), last_dim(&target, 2)?)?;
        let cropped = crop_width(outputs.into_dyn(), split)?;
        let mut recon = nchw_to_kspace(cropped)?;
        if let Some(s) = self.log_amp_scale {
            recon = exp_weighting(recon.view(), s)?;
        }
        recon.mapv_inplace(|v| v * params.scale);

        if self.replace {
            recon = replace_measured(recon.view(), target, params.mask.view())?;
        }
        debug!(scale = params.scale, replace = self.replace, "k-space output {:?}", recon.shape());
        Ok(recon)
    }
}

/// K-space prediction to the complex image of the data consistent k-space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputTransformK2C {
    pub log_amp_scale: Option<f32>,
}

impl OutputTransformK2C {
    pub fn new(log_amp_scale: Option<f32>) -> Self {
        Self { log_amp_scale }
    }

    /// returns the `(1, Coil, H, W, 2)` complex image
    pub fn transform(&self, outputs: ArrayView4<f32>, params: &K2CParams) -> Result<ArrayD<f32>> {
        let k2k = OutputTransformK2K::new(true, self.log_amp_scale);
        let kspace = k2k.transform(outputs, params.kspace_target.view(), &params.kspace)?;
        ifft2(kspace.view())
    }
}

/// undoes the standardization of image-domain inputs
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputTransformC2C;

impl OutputTransformC2C {
    pub fn transform(&self, outputs: ArrayViewD<f32>, params: &ImageParams) -> ArrayD<f32> {
        outputs.mapv(|v| (v + params.bias) * params.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{apply_mask, seed_from_file_name, MaskParams, RandomMask};
    use crate::pre_processing::{
        InputConfig, InputSliceTransformC2C, InputSliceTransformK2C, InputSliceTransformK2K, SliceInput,
        TrainInputSliceTransform,
    };
    use crate::{Challenge, Device};
    use ndarray::{stack, Array, Array3, IxDyn};
    use num_complex::Complex32;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn input(shape: &[usize], seed: u64, name: &str) -> SliceInput {
        let mut rng = StdRng::seed_from_u64(seed);
        let k = Array::from_shape_fn(IxDyn(shape), |_| Complex32::new(rng.random_range(-1f32..1.), rng.random_range(-1f32..1.)));
        SliceInput::new(k, name, 0)
    }

    fn config() -> InputConfig {
        let params = MaskParams::new(vec![0.25], vec![4]).unwrap();
        InputConfig::new(Arc::new(RandomMask::new(params)), Challenge::MultiCoil, Device::cpu()).with_divisor(16)
    }

    fn assert_close(a: &ArrayD<f32>, b: &ArrayD<f32>, tol: f32) {
        assert_eq!(a.shape(), b.shape());
        a.iter().zip(b.iter()).for_each(|(x, y)| assert!((x - y).abs() < tol, "{x} != {y}"));
    }

    fn masked_target(target: &ArrayD<f32>, name: &str) -> ArrayD<f32> {
        apply_mask(target.view(), config().mask_func.as_ref(), Some(seed_from_file_name(name))).unwrap().0
    }

    #[test]
    fn k2k_identity_recovers_masked_kspace() {
        let slice = input(&[2, 8, 20], 0, "k2k.h5");
        for log_amp_scale in [None, Some(1.5)] {
            let (x, target, params) = InputSliceTransformK2K::new(config(), log_amp_scale).transform(&slice).unwrap();
            let x = x.insert_axis(Axis(0));
            let out = OutputTransformK2K::new(false, log_amp_scale).transform(x.view(), target.view(), &params).unwrap();
            let expected = masked_target(&target, "k2k.h5").insert_axis(Axis(0));
            assert_close(&out, &expected, 1e-4);
        }
    }

    #[test]
    fn k2k_replacement_keeps_measured_samples() {
        let slice = input(&[1, 6, 16], 1, "dc.h5");
        let (x, target, params) = InputSliceTransformK2K::new(config(), None).transform(&slice).unwrap();
        let zeros = Array::zeros(x.raw_dim()).insert_axis(Axis(0));
        let out = OutputTransformK2K::new(true, None).transform(zeros.view(), target.view(), &params).unwrap();
        let expected = masked_target(&target, "dc.h5").insert_axis(Axis(0));
        assert_eq!(out, expected);

        let batch = Array::zeros((2, 2, 6, 16));
        assert!(matches!(
            OutputTransformK2K::default().transform(batch.view(), target.view(), &params),
            Err(TransformError::Unsupported(_))
        ));
    }

    #[test]
    fn k2c_output_is_zero_filled_image_for_identity() {
        let slice = input(&[3, 8, 12], 2, "k2c.h5");
        let (x, c_img, params) = InputSliceTransformK2C::new(config(), None).transform(&slice).unwrap();
        let x = x.insert_axis(Axis(0));
        let out = OutputTransformK2C::default().transform(x.view(), &params).unwrap();
        assert_eq!(out.shape(), &[1, 3, 8, 12, 2]);
        assert_eq!(&out.shape()[1..], c_img.shape());
        let masked = masked_target(&params.kspace_target.index_axis(Axis(0), 0).to_owned(), "k2c.h5");
        let expected = ifft2(masked.view()).unwrap().insert_axis(Axis(0));
        assert_close(&out, &expected, 1e-4);
    }

    #[test]
    fn slice_output_matches_target_geometry() {
        let slice = input(&[2, 8, 10], 3, "slice.h5");
        let (x, target) = TrainInputSliceTransform::new(config(), 1.).transform(&slice).unwrap();
        assert_eq!(x.shape(), &[4, 8, 16]);
        let out = OutputSliceTransform::default().transform(x.view(), target.view()).unwrap();
        assert_eq!(out.shape(), target.shape());

        let wrong = Array3::<f32>::zeros((3, 8, 10)).into_dyn();
        assert!(OutputSliceTransform::new(2.).transform(x.view(), wrong.view()).is_err());
    }

    #[test]
    fn batch_output_matches_per_slice_output() {
        let transform = TrainInputSliceTransform::new(config(), 1.);
        let slices: Vec<_> = (0..3).map(|i| input(&[2, 8, 10], 10 + i, &format!("batch{i}.h5"))).collect();
        let (xs, targets): (Vec<_>, Vec<_>) = slices.iter().map(|s| transform.transform(s).unwrap()).unzip();
        let x_views: Vec<_> = xs.iter().map(|x| x.view()).collect();
        let t_views: Vec<_> = targets.iter().map(|t| t.view()).collect();
        let x = stack(Axis(0), &x_views).unwrap();
        let target = stack(Axis(0), &t_views).unwrap();

        let out = OutputBatchTransform::new(2.).transform(x.view(), target.view()).unwrap();
        assert_eq!(out.shape(), &[3, 2, 8, 10]);
        for (i, (x, t)) in xs.iter().zip(&targets).enumerate() {
            let single = OutputSliceTransform::new(2.).transform(x.view(), t.view()).unwrap();
            assert_close(&out.index_axis(Axis(0), i).to_owned(), &single, 1e-5);
        }

        let wrong = Array::<f32, _>::zeros(IxDyn(&[2, 2, 8, 10]));
        assert!(matches!(
            OutputBatchTransform::default().transform(x.view(), wrong.view()),
            Err(TransformError::Shape(_))
        ));
    }

    #[test]
    fn c2c_output_undoes_standardization() {
        let slice = input(&[2, 6, 16], 4, "c2c.h5");
        let (x, _, params) = InputSliceTransformC2C::new(config()).transform(&slice).unwrap();
        let out = OutputTransformC2C.transform(x.view().into_dyn(), &params);
        let back = out.mapv(|v| v / params.scale - params.bias);
        assert_close(&back, &x.into_dyn(), 1e-4);
    }
}
