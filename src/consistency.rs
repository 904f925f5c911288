use crate::error::{Result, TransformError};
use crate::fft::{fft2_nchw, ifft2, ifft2_nchw, root_sum_of_squares};
use crate::layout::{as_nchw, kspace_to_nchw};
use crate::mask::apply_retro_mask;
use crate::padding::complex_height_crop;
use ndarray::{Array3, Array4, ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Broadcasts `mask` to `shape`, requiring every value to be exactly 0 or 1
fn binary_mask<'a>(mask: &'a ArrayViewD<f32>, shape: &[usize]) -> Result<ArrayViewD<'a, f32>> {
    if let Some(bad) = mask.iter().find(|&&m| m != 0. && m != 1.) {
        return Err(TransformError::config(format!(
            "data consistency needs a binary mask, found value {bad}"
        )));
    }
    mask.broadcast(IxDyn(shape)).ok_or_else(|| {
        TransformError::shape(format!(
            "mask of shape {:?} does not broadcast to {:?}",
            mask.shape(),
            shape
        ))
    })
}

fn check_same_shape(a: &ArrayViewD<f32>, b: &ArrayViewD<f32>, op: &str) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(TransformError::shape(format!(
            "{op}: shapes {:?} and {:?} differ",
            a.shape(),
            b.shape()
        )));
    }
    Ok(())
}

/// Reshapes a k-space mask `(..., 1, W, 1)` into an NCHW mask `(1, 1, 1, W)` that broadcasts
/// against channel-interleaved spectra
pub fn nchw_mask(mask: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    let mut shape = mask.shape().to_vec();
    if shape.last() == Some(&1) {
        shape.pop();
    }
    while shape.len() > 4 && shape[0] == 1 {
        shape.remove(0);
    }
    if shape.len() > 4 {
        return Err(TransformError::shape(format!(
            "cannot use a mask of shape {:?} on NCHW tensors",
            mask.shape()
        )));
    }
    while shape.len() < 4 {
        shape.insert(0, 1);
    }
    Ok(mask.to_owned().into_shape_with_order(IxDyn(&shape))?)
}

/// `fft(input) * mask + fft(recon) * (1 - mask)` for NCHW image tensors, returned as an NCHW
/// spectrum. Measured locations hold the input spectrum exactly, the others the
/// reconstruction spectrum.
pub fn hard_dc_kspace(input: ArrayViewD<f32>, recon: ArrayViewD<f32>, mask: ArrayViewD<f32>) -> Result<Array4<f32>> {
    check_same_shape(&input, &recon, "hard_dc_kspace")?;
    let k_input = fft2_nchw(input)?;
    let k_recon = fft2_nchw(recon)?;
    let m = binary_mask(&mask, k_input.shape())?;
    let m = m.into_dimensionality::<ndarray::Ix4>()?;
    Ok(Zip::from(&k_input)
        .and(&k_recon)
        .and(&m)
        .map_collect(|&a, &r, &m| a * m + r * (1. - m)))
}

/// [hard_dc_kspace] transformed back to NCHW images
pub fn hard_dc_img(input: ArrayViewD<f32>, recon: ArrayViewD<f32>, mask: ArrayViewD<f32>) -> Result<Array4<f32>> {
    let k = hard_dc_kspace(input, recon, mask)?;
    ifft2_nchw(k.view().into_dyn())
}

/// Data consistency with a blend weight `lambda` at the measured locations:
/// `lambda * fft(input) * mask + (1 - lambda) * fft(recon) * mask + fft(recon) * (1 - mask)`.
/// Starts at zero, trusting the reconstruction everywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveDc {
    pub lambda: f32,
}

impl AdaptiveDc {
    pub fn new(lambda: f32) -> Self {
        Self { lambda }
    }

    pub fn kspace(&self, input: ArrayViewD<f32>, recon: ArrayViewD<f32>, mask: ArrayViewD<f32>) -> Result<Array4<f32>> {
        check_same_shape(&input, &recon, "adaptive dc")?;
        let k_input = fft2_nchw(input)?;
        let k_recon = fft2_nchw(recon)?;
        let m = binary_mask(&mask, k_input.shape())?.into_dimensionality::<ndarray::Ix4>()?;
        let lambda = self.lambda;
        debug!("adaptive dc with lambda {lambda}");
        Ok(Zip::from(&k_input).and(&k_recon).and(&m).map_collect(|&a, &r, &m| {
            let measured = a * m * lambda + r * m * (1. - lambda);
            measured + r * (1. - m)
        }))
    }

    pub fn transform(&self, input: ArrayViewD<f32>, recon: ArrayViewD<f32>, mask: ArrayViewD<f32>) -> Result<Array4<f32>> {
        let k = self.kspace(input, recon, mask)?;
        ifft2_nchw(k.view().into_dyn())
    }
}

/// `recon * (1 - mask) + target * mask` on k-space tensors of equal shape
pub fn replace_measured(recon: ArrayViewD<f32>, target: ArrayViewD<f32>, mask: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    check_same_shape(&recon, &target, "replace_measured")?;
    let m = binary_mask(&mask, recon.shape())?;
    Ok(Zip::from(&recon)
        .and(&target)
        .and(&m)
        .map_collect(|&r, &t, &m| r * (1. - m) + t * m))
}

/// Re-subsamples a reconstructed NCHW image: fft, the given mask, and back to NCHW images
pub fn fake_input_gen(image: ArrayViewD<f32>, mask: ArrayViewD<f32>) -> Result<Array4<f32>> {
    let full_k = fft2_nchw(image)?;
    let under_k = apply_retro_mask(full_k.view().into_dyn(), mask)?;
    ifft2_nchw(under_k.view())
}

/// [fake_input_gen] followed by RSS over the channel axis. Returns the RSS image `(N, H, W)`
/// and the masked NCHW spectrum.
pub fn fake_input_gen_rss(image: ArrayViewD<f32>, mask: ArrayViewD<f32>) -> Result<(Array3<f32>, Array4<f32>)> {
    let full_k = fft2_nchw(image)?;
    let under_k = apply_retro_mask(full_k.view().into_dyn(), mask)?;
    let under_im = ifft2_nchw(under_k.view())?;
    let rss = root_sum_of_squares(under_im.view().into_dyn(), Axis(1))?.into_dimensionality()?;
    let under_k = as_nchw(under_k.view(), "fake_input_gen_rss")?.to_owned();
    Ok((rss, under_k))
}

/// Re-subsamples batched k-space `(N, Coil, H, W, 2)`, transforms it to the image domain, crops
/// the height to `height` and returns NCHW images
pub fn fake_input_gen_hc(kspace: ArrayViewD<f32>, mask: ArrayViewD<f32>, height: usize) -> Result<Array4<f32>> {
    let under_k = apply_retro_mask(kspace, mask)?;
    let image = ifft2(under_k.view())?;
    let cropped = complex_height_crop(image.view(), height)?;
    kspace_to_nchw(cropped)
}

/// retrospective projection of k-space onto the sampled locations
pub fn proj_mask(kspace: ArrayViewD<f32>, mask: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    apply_retro_mask(kspace, mask)
}
