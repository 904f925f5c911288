use crate::error::{Result, TransformError};
use ndarray::{concatenate, Array3, Array4, ArrayD, ArrayView4, ArrayViewD, Axis, Ix4, Ix5, IxDyn, Slice};

/// Checks the rank of a complex-valued tensor and the size of its trailing complex axis. Complex
/// values are stored as (real, imag) pairs on a trailing axis of size 2.
pub(crate) fn check_complex(x: &ArrayViewD<f32>, rank: usize, op: &str) -> Result<()> {
    if rank == 0 || x.ndim() != rank {
        return Err(TransformError::shape(format!(
            "{op} expects a rank {rank} tensor, got shape {:?}",
            x.shape()
        )));
    }
    if x.shape()[rank - 1] != 2 {
        return Err(TransformError::shape(format!(
            "{op} expects a trailing complex axis of size 2, got shape {:?}",
            x.shape()
        )));
    }
    Ok(())
}

fn check_channels(x: &ArrayViewD<f32>, rank: usize, channel_axis: usize, op: &str) -> Result<()> {
    if x.ndim() != rank {
        return Err(TransformError::shape(format!(
            "{op} expects a rank {rank} tensor, got shape {:?}",
            x.shape()
        )));
    }
    if x.shape()[channel_axis] % 2 != 0 {
        return Err(TransformError::shape(format!(
            "{op} expects an even channel count, got {}",
            x.shape()[channel_axis]
        )));
    }
    Ok(())
}

/// Converts a `(Coil, Height, Width, 2)` k-slice into `(2 * Coil, Height, Width)` CHW form.
/// Single-coil data must already carry a coil axis of size 1.
pub fn k_slice_to_chw(x: ArrayViewD<f32>) -> Result<Array3<f32>> {
    check_complex(&x, 4, "k_slice_to_chw")?;
    let (coils, h, w) = (x.shape()[0], x.shape()[1], x.shape()[2]);
    let chw = x
        .permuted_axes(IxDyn(&[0, 3, 1, 2]))
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((2 * coils, h, w))?;
    Ok(chw)
}

/// Converts a `(C, Height, Width)` tensor back to `(C / 2, Height, Width, 2)`. This assumes the
/// real and imaginary values of a coil are adjacent in `C`.
pub fn chw_to_k_slice(x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    check_channels(&x, 3, 0, "chw_to_k_slice")?;
    let (c, h, w) = (x.shape()[0], x.shape()[1], x.shape()[2]);
    let split = x
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(&[c / 2, 2, h, w]))?;
    Ok(split
        .permuted_axes(IxDyn(&[0, 2, 3, 1]))
        .as_standard_layout()
        .into_owned())
}

/// Converts a `(Slice, Coil, Height, Width, 2)` tensor into `(N, 2 * Coil, Height, Width)` NCHW
/// form.
pub fn kspace_to_nchw(x: ArrayViewD<f32>) -> Result<Array4<f32>> {
    check_complex(&x, 5, "kspace_to_nchw")?;
    let (n, coils, h, w) = (x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]);
    let nchw = x
        .permuted_axes(IxDyn(&[0, 1, 4, 2, 3]))
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n, 2 * coils, h, w))?;
    Ok(nchw)
}

/// Converts an `(N, C, Height, Width)` tensor back to `(N, C / 2, Height, Width, 2)`.
pub fn nchw_to_kspace(x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    check_channels(&x, 4, 1, "nchw_to_kspace")?;
    let (n, c, h, w) = (x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]);
    let split = x
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(&[n, c / 2, 2, h, w]))?;
    Ok(split
        .permuted_axes(IxDyn(&[0, 1, 3, 4, 2]))
        .as_standard_layout()
        .into_owned())
}

/// moves a trailing coil axis in front of the spatial axes: `(H, W, Coil, 2)` becomes
/// `(Coil, H, W, 2)` and `(N, H, W, Coil, 2)` becomes `(N, Coil, H, W, 2)`
pub fn permute_hwc(x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    let order: &[usize] = match x.ndim() {
        4 => &[2, 0, 1, 3],
        5 => &[0, 3, 1, 2, 4],
        _ => {
            return Err(TransformError::shape(format!(
                "permute_hwc expects a rank 4 or 5 tensor, got shape {:?}",
                x.shape()
            )))
        }
    };
    check_complex(&x, x.ndim(), "permute_hwc")?;
    Ok(x.permuted_axes(IxDyn(order)).as_standard_layout().into_owned())
}

/// splits a `(B, C, H, W, 2)` tensor into four tensors holding the columns congruent to 0, 1, 2
/// and 3 modulo 4
pub fn split_four_cols(x: ArrayViewD<f32>) -> Result<[ArrayD<f32>; 4]> {
    check_complex(&x, 5, "split_four_cols")?;
    let x = x.into_dimensionality::<Ix5>()?;
    let w = x.len_of(Axis(3));
    if w % 4 != 0 {
        return Err(TransformError::shape(format!("width {w} is not a multiple of 4")));
    }
    let col = |k: usize| {
        x.slice_axis(Axis(3), Slice::new(k as isize, None, 4))
            .to_owned()
            .into_dyn()
    };
    Ok([col(0), col(1), col(2), col(3)])
}

/// Reassembles a `(B, 4 * C, H, W / 4)` tensor whose channel axis holds four column groups
/// into a `(B, C, H, W)` image. Column `i` of the output is column `i / 4` of group `i % 4`.
pub fn stack_for_vis(x: ArrayView4<f32>) -> Result<Array4<f32>> {
    let (b, c4, h, w4) = x.dim();
    if c4 == 0 || c4 % 4 != 0 {
        return Err(TransformError::shape(format!(
            "stack_for_vis expects a positive channel count divisible by 4, got {c4}"
        )));
    }
    let c = c4 / 4;
    let mut holder = Array4::<f32>::zeros((b, c, h, 4 * w4));
    for (k, group) in x.axis_chunks_iter(Axis(1), c).enumerate() {
        holder
            .slice_axis_mut(Axis(3), Slice::new(k as isize, None, 4))
            .assign(&group);
    }
    Ok(holder)
}

/// [stack_for_vis] applied to inputs, reconstructions and targets
pub fn stack_for_vis_all(
    inputs: ArrayView4<f32>,
    recons: ArrayView4<f32>,
    targets: ArrayView4<f32>,
) -> Result<(Array4<f32>, Array4<f32>, Array4<f32>)> {
    Ok((stack_for_vis(inputs)?, stack_for_vis(recons)?, stack_for_vis(targets)?))
}

/// splits the channel axis of an NCHW tensor into `slices` equal groups
pub fn split_slices(x: ArrayView4<f32>, slices: usize) -> Result<Vec<Array4<f32>>> {
    let c = x.len_of(Axis(1));
    if slices == 0 || c % slices != 0 {
        return Err(TransformError::shape(format!(
            "cannot split {c} channels into {slices} slices"
        )));
    }
    Ok(x.axis_chunks_iter(Axis(1), c / slices).map(|s| s.to_owned()).collect())
}

/// concatenates NCHW tensors along the channel axis
pub fn concat_channels(parts: &[Array4<f32>]) -> Result<Array4<f32>> {
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    Ok(concatenate(Axis(1), &views)?)
}

pub(crate) fn as_nchw<'a>(x: ArrayViewD<'a, f32>, op: &str) -> Result<ArrayView4<'a, f32>> {
    if x.ndim() != 4 {
        return Err(TransformError::shape(format!(
            "{op} expects an NCHW tensor, got shape {:?}",
            x.shape()
        )));
    }
    Ok(x.into_dimensionality::<Ix4>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array5};

    fn ramp(shape: &[usize]) -> ArrayD<f32> {
        let n: usize = shape.iter().product();
        Array::from_shape_vec(IxDyn(shape), (0..n).map(|i| i as f32 * 0.5 - 3.0).collect()).unwrap()
    }

    #[test]
    fn k_slice_round_trip() {
        for &(coils, h, w) in &[(1, 4, 6), (3, 5, 7), (15, 2, 3)] {
            let x = ramp(&[coils, h, w, 2]);
            let chw = k_slice_to_chw(x.view()).unwrap();
            assert_eq!(chw.dim(), (2 * coils, h, w));
            let back = chw_to_k_slice(chw.into_dyn().view()).unwrap();
            assert_eq!(back, x, "k-slice layout round trip is not exact");
        }
    }

    #[test]
    fn channel_order_is_real_then_imag_per_coil() {
        let x = ramp(&[2, 1, 1, 2]);
        let chw = k_slice_to_chw(x.view()).unwrap();
        let channels: Vec<f32> = chw.iter().cloned().collect();
        let expected = vec![x[[0, 0, 0, 0]], x[[0, 0, 0, 1]], x[[1, 0, 0, 0]], x[[1, 0, 0, 1]]];
        assert_eq!(channels, expected);
    }

    #[test]
    fn kspace_round_trip() {
        let x = ramp(&[2, 3, 4, 5, 2]);
        let nchw = kspace_to_nchw(x.view()).unwrap();
        assert_eq!(nchw.dim(), (2, 6, 4, 5));
        assert_eq!(nchw[[1, 3, 2, 1]], x[[1, 1, 2, 1, 1]]);
        let back = nchw_to_kspace(nchw.into_dyn().view()).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn rank_and_complex_axis_are_checked() {
        let bad_rank = ramp(&[4, 4, 2]);
        assert!(matches!(k_slice_to_chw(bad_rank.view()), Err(TransformError::Shape(_))));
        let bad_complex = ramp(&[1, 4, 4, 3]);
        assert!(matches!(k_slice_to_chw(bad_complex.view()), Err(TransformError::Shape(_))));
        let odd_channels = ramp(&[3, 4, 4]);
        assert!(matches!(chw_to_k_slice(odd_channels.view()), Err(TransformError::Shape(_))));
        let not_batched = ramp(&[1, 4, 4, 2]);
        assert!(matches!(kspace_to_nchw(not_batched.view()), Err(TransformError::Shape(_))));
    }

    #[test]
    fn permute_moves_coils_forward() {
        let x = ramp(&[4, 5, 3, 2]);
        let p = permute_hwc(x.view()).unwrap();
        assert_eq!(p.shape(), &[3, 4, 5, 2]);
        assert_eq!(p[[2, 1, 4, 1]], x[[1, 4, 2, 1]]);
    }

    #[test]
    fn split_and_stack_columns() {
        let x = Array5::from_shape_fn((1, 1, 2, 8, 2), |(_, _, h, w, c)| (h * 100 + w * 2 + c) as f32);
        let cols = split_four_cols(x.view().into_dyn()).unwrap();
        for (k, col) in cols.iter().enumerate() {
            assert_eq!(col.shape(), &[1, 1, 2, 2, 2]);
            assert_eq!(col[[0, 0, 1, 1, 0]], x[[0, 0, 1, 4 + k, 0]]);
        }

        // real parts of each group, fused along the channel axis
        let groups: Vec<Array4<f32>> = cols
            .iter()
            .map(|c| c.index_axis(Axis(4), 0).to_owned().into_dimensionality::<Ix4>().unwrap())
            .collect();
        let fused = concat_channels(&groups).unwrap();
        let stacked = stack_for_vis(fused.view()).unwrap();
        assert_eq!(stacked.dim(), (1, 1, 2, 8));
        assert_eq!(stacked, x.index_axis(Axis(4), 0));
    }

    #[test]
    fn split_slices_needs_divisible_channels() {
        let x = Array4::<f32>::zeros((1, 6, 2, 2));
        assert_eq!(split_slices(x.view(), 3).unwrap().len(), 3);
        assert!(split_slices(x.view(), 4).is_err());
    }

    #[test]
    fn stack_for_vis_rejects_bad_channel_counts() {
        let empty = Array4::<f32>::zeros((1, 0, 2, 2));
        assert!(matches!(stack_for_vis(empty.view()), Err(TransformError::Shape(_))));
        let odd = Array4::<f32>::zeros((1, 6, 2, 2));
        assert!(matches!(stack_for_vis(odd.view()), Err(TransformError::Shape(_))));
    }
}
