use crate::error::{Result, TransformError};
use crate::fftshift::{fftshift, ifftshift};
use crate::layout::{as_nchw, check_complex, kspace_to_nchw, nchw_to_kspace};
use ndarray::{stack, Array3, Array4, ArrayD, ArrayView4, ArrayViewD, Axis, Dimension, IxDyn, Zip};
use num_complex::Complex32;
use rustfft::{FftDirection, FftPlanner};

/// selects the spatial axis of a one-dimensional transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftAxis {
    Height,
    Width,
}

/// FFT workspace that caches plans for reuse across calls. Transforms act on the two axes in
/// front of the trailing complex axis and shift the zero frequency to the center in both
/// directions.
pub struct CenteredFft {
    planner: FftPlanner<f32>,
}

impl Default for CenteredFft {
    fn default() -> Self {
        Self::new()
    }
}

impl CenteredFft {
    pub fn new() -> Self {
        Self { planner: FftPlanner::new() }
    }

    /// centered 2-D FFT over axes -3 and -2
    pub fn fft2(&mut self, x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        self.centered(x, 2, FftDirection::Forward)
    }

    /// centered 2-D inverse FFT over axes -3 and -2
    pub fn ifft2(&mut self, x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        self.centered(x, 2, FftDirection::Inverse)
    }

    /// Centered 1-D FFT along height or width. The height variant swaps the height axis into the
    /// width position, transforms along that axis, and swaps it back.
    pub fn fft1(&mut self, x: ArrayViewD<f32>, axis: FftAxis) -> Result<ArrayD<f32>> {
        self.centered_1d(x, axis, FftDirection::Forward)
    }

    /// centered 1-D inverse FFT along height or width
    pub fn ifft1(&mut self, x: ArrayViewD<f32>, axis: FftAxis) -> Result<ArrayD<f32>> {
        self.centered_1d(x, axis, FftDirection::Inverse)
    }

    fn centered_1d(&mut self, x: ArrayViewD<f32>, axis: FftAxis, direction: FftDirection) -> Result<ArrayD<f32>> {
        check_spatial(&x)?;
        let nd = x.ndim();
        let mut x = x;
        if axis == FftAxis::Height {
            x.swap_axes(nd - 3, nd - 2);
        }
        let mut y = self.centered(x, 1, direction)?;
        if axis == FftAxis::Height {
            y.swap_axes(nd - 3, nd - 2);
            y = y.as_standard_layout().into_owned();
        }
        Ok(y)
    }

    /// shift, transform and shift back over the last `n_axes` spatial axes
    fn centered(&mut self, x: ArrayViewD<f32>, n_axes: usize, direction: FftDirection) -> Result<ArrayD<f32>> {
        check_spatial(&x)?;
        let c = to_complex(x)?;
        // the complex array drops the trailing axis, so the spatial axes are its last two
        let nd = c.ndim();
        let axes: Vec<Axis> = (nd - n_axes..nd).map(Axis).collect();
        let mut c = ifftshift(c.view(), &axes);
        for &ax in &axes {
            self.transform_axis(&mut c, ax, direction);
        }
        let c = fftshift(c.view(), &axes);
        Ok(from_complex(&c))
    }

    /// orthonormal DFT along a single axis, in place
    fn transform_axis(&mut self, x: &mut ArrayD<Complex32>, axis: Axis, direction: FftDirection) {
        let n = x.len_of(axis);
        if n == 0 {
            return;
        }
        let fft = self.planner.plan_fft(n, direction);
        let scale = 1. / (n as f32).sqrt();
        let mut buffer = vec![Complex32::new(0., 0.); n];
        let mut scratch = vec![Complex32::new(0., 0.); fft.get_inplace_scratch_len()];
        for mut lane in x.lanes_mut(axis) {
            buffer.iter_mut().zip(lane.iter()).for_each(|(b, v)| *b = *v);
            fft.process_with_scratch(&mut buffer, &mut scratch);
            lane.iter_mut().zip(&buffer).for_each(|(v, b)| *v = *b * scale);
        }
    }
}

fn check_spatial(x: &ArrayViewD<f32>) -> Result<()> {
    if x.ndim() < 3 {
        return Err(TransformError::shape(format!(
            "expected at least 3 dimensions (height, width, complex), got shape {:?}",
            x.shape()
        )));
    }
    check_complex(x, x.ndim(), "fft")
}

/// fuses the trailing (real, imag) axis into complex values
pub fn to_complex(x: ArrayViewD<f32>) -> Result<ArrayD<Complex32>> {
    check_complex(&x, x.ndim(), "to_complex")?;
    let last = Axis(x.ndim() - 1);
    let re = x.index_axis(last, 0);
    let im = x.index_axis(last, 1);
    Ok(Zip::from(&re).and(&im).map_collect(|&r, &i| Complex32::new(r, i)))
}

/// splits complex values onto a new trailing (real, imag) axis
pub fn from_complex(c: &ArrayD<Complex32>) -> ArrayD<f32> {
    let mut shape = c.shape().to_vec();
    shape.push(2);
    ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
        let (pos, part) = idx.slice().split_at(c.ndim());
        let z = c[pos];
        if part[0] == 0 {
            z.re
        } else {
            z.im
        }
    })
}

/// centered, orthonormal 2-D FFT
pub fn fft2(x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    CenteredFft::new().fft2(x)
}

/// centered, orthonormal 2-D inverse FFT
pub fn ifft2(x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    CenteredFft::new().ifft2(x)
}

/// centered, orthonormal 1-D FFT along height or width
pub fn fft1(x: ArrayViewD<f32>, axis: FftAxis) -> Result<ArrayD<f32>> {
    CenteredFft::new().fft1(x, axis)
}

/// centered, orthonormal 1-D inverse FFT along height or width
pub fn ifft1(x: ArrayViewD<f32>, axis: FftAxis) -> Result<ArrayD<f32>> {
    CenteredFft::new().ifft1(x, axis)
}

/// magnitude of a complex tensor, reducing the trailing complex axis
pub fn complex_abs(x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    if x.ndim() == 0 {
        return Err(TransformError::shape("complex_abs expects a complex tensor"));
    }
    check_complex(&x, x.ndim(), "complex_abs")?;
    let last = Axis(x.ndim() - 1);
    Ok(x.map_axis(last, |z| (z[0] * z[0] + z[1] * z[1]).sqrt()))
}

/// root sum of squares along `axis`
pub fn root_sum_of_squares(x: ArrayViewD<f32>, axis: Axis) -> Result<ArrayD<f32>> {
    if axis.index() >= x.ndim() {
        return Err(TransformError::shape(format!(
            "axis {} out of range for shape {:?}",
            axis.index(),
            x.shape()
        )));
    }
    Ok(x.map_axis(axis, |lane| lane.iter().map(|v| v * v).sum::<f32>().sqrt()))
}

/// Root sum of squares per multi-slice group and their maximum intensity projection. The channel
/// axis of `x` holds `slices` concatenated groups; returns the stacked per-group RSS images
/// `(N, slices, H, W)` and the projection `(N, H, W)`.
pub fn ssos_mip(x: ArrayView4<f32>, slices: usize) -> Result<(Array4<f32>, Array3<f32>)> {
    let groups = crate::layout::split_slices(x, slices)?;
    let rss: Vec<ArrayD<f32>> = groups
        .iter()
        .map(|g| root_sum_of_squares(g.view().into_dyn(), Axis(1)))
        .collect::<Result<_>>()?;
    let views: Vec<_> = rss.iter().map(|r| r.view()).collect();
    let stacked = stack(Axis(1), &views)?.into_dimensionality::<ndarray::Ix4>()?;
    let mip = stacked.map_axis(Axis(1), |lane| lane.iter().cloned().fold(f32::NEG_INFINITY, f32::max));
    Ok((stacked, mip))
}

/// RSS over the leading axis of reconstructions and targets of equal shape
pub fn pre_rss(recons: ArrayViewD<f32>, targets: ArrayViewD<f32>) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
    if recons.shape() != targets.shape() {
        return Err(TransformError::shape(format!(
            "reconstruction shape {:?} does not match target shape {:?}",
            recons.shape(),
            targets.shape()
        )));
    }
    Ok((root_sum_of_squares(recons, Axis(0))?, root_sum_of_squares(targets, Axis(0))?))
}

/// centered 2-D FFT of an NCHW tensor, returned in NCHW form
pub fn fft2_nchw(x: ArrayViewD<f32>) -> Result<Array4<f32>> {
    let x = as_nchw(x, "fft2_nchw")?;
    let k = fft2(nchw_to_kspace(x.into_dyn())?.view())?;
    kspace_to_nchw(k.view())
}

/// centered 2-D inverse FFT of an NCHW tensor, returned in NCHW form
pub fn ifft2_nchw(x: ArrayViewD<f32>) -> Result<Array4<f32>> {
    let x = as_nchw(x, "ifft2_nchw")?;
    let img = ifft2(nchw_to_kspace(x.into_dyn())?.view())?;
    kspace_to_nchw(img.view())
}

/// [fft2_nchw] applied to network inputs and outputs of the same shape
pub fn kspace_transform(inputs: ArrayViewD<f32>, outputs: ArrayViewD<f32>) -> Result<(Array4<f32>, Array4<f32>)> {
    if inputs.shape() != outputs.shape() {
        return Err(TransformError::shape("input and output shape should be the same"));
    }
    Ok((fft2_nchw(inputs)?, fft2_nchw(outputs)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn random_tensor(shape: &[usize], seed: u64) -> ArrayD<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array::from_shape_simple_fn(IxDyn(shape), || rng.random_range(-1.0f32..1.0))
    }

    fn max_abs_diff(a: &ArrayD<f32>, b: &ArrayD<f32>) -> f32 {
        assert_eq!(a.shape(), b.shape());
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0., f32::max)
    }

    /// naive centered DFT of a single complex sequence in double precision
    fn naive_centered_dft(x: &[(f64, f64)], sign: f64) -> Vec<(f64, f64)> {
        let n = x.len();
        let shifted: Vec<_> = (0..n).map(|i| x[(i + n / 2) % n]).collect();
        let out: Vec<(f64, f64)> = (0..n)
            .map(|k| {
                let mut acc = (0., 0.);
                for (j, &(re, im)) in shifted.iter().enumerate() {
                    let phi = sign * 2. * PI * (j * k) as f64 / n as f64;
                    acc.0 += re * phi.cos() - im * phi.sin();
                    acc.1 += re * phi.sin() + im * phi.cos();
                }
                (acc.0 / (n as f64).sqrt(), acc.1 / (n as f64).sqrt())
            })
            .collect();
        (0..n).map(|i| out[(i + (n + 1) / 2) % n]).collect()
    }

    #[test]
    fn fft_consistency() {
        for shape in [vec![1, 8, 8, 2], vec![3, 7, 10, 2], vec![2, 2, 5, 9, 2]] {
            let x = random_tensor(&shape, 7);
            let y = ifft2(fft2(x.view()).unwrap().view()).unwrap();
            assert!(max_abs_diff(&x, &y) < 1e-5, "fft consistency failed for {:?}", shape);
        }
    }

    #[test]
    fn centered_impulse_is_flat() {
        let (h, w) = (6, 5);
        let mut x = ArrayD::<f32>::zeros(IxDyn(&[1, h, w, 2]));
        x[[0, h / 2, w / 2, 0]] = 1.;
        let k = fft2(x.view()).unwrap();
        let expected = 1. / ((h * w) as f32).sqrt();
        for v in k.index_axis(Axis(3), 0).iter() {
            assert!((v - expected).abs() < 1e-6);
        }
        for v in k.index_axis(Axis(3), 1).iter() {
            assert!(v.abs() < 1e-6);
        }
    }

    #[test]
    fn energy_is_preserved() {
        let x = random_tensor(&[2, 9, 12, 2], 3);
        let k = fft2(x.view()).unwrap();
        let e_x: f32 = x.iter().map(|v| v * v).sum();
        let e_k: f32 = k.iter().map(|v| v * v).sum();
        assert!((e_x - e_k).abs() / e_x < 1e-5);
    }

    #[test]
    fn fft1_matches_native_single_axis() {
        let (h, w) = (7, 4);
        let x = random_tensor(&[1, h, w, 2], 11);
        for (axis, forward) in [(FftAxis::Height, true), (FftAxis::Width, true), (FftAxis::Height, false)] {
            let y = if forward { fft1(x.view(), axis).unwrap() } else { ifft1(x.view(), axis).unwrap() };
            let sign = if forward { -1. } else { 1. };
            match axis {
                FftAxis::Height => {
                    for col in 0..w {
                        let seq: Vec<_> = (0..h).map(|r| (x[[0, r, col, 0]] as f64, x[[0, r, col, 1]] as f64)).collect();
                        let expected = naive_centered_dft(&seq, sign);
                        for (r, e) in expected.iter().enumerate() {
                            assert!((y[[0, r, col, 0]] as f64 - e.0).abs() < 1e-5);
                            assert!((y[[0, r, col, 1]] as f64 - e.1).abs() < 1e-5);
                        }
                    }
                }
                FftAxis::Width => {
                    for row in 0..h {
                        let seq: Vec<_> = (0..w).map(|c| (x[[0, row, c, 0]] as f64, x[[0, row, c, 1]] as f64)).collect();
                        let expected = naive_centered_dft(&seq, sign);
                        for (c, e) in expected.iter().enumerate() {
                            assert!((y[[0, row, c, 0]] as f64 - e.0).abs() < 1e-5);
                            assert!((y[[0, row, c, 1]] as f64 - e.1).abs() < 1e-5);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn fft1_both_axes_equals_fft2() {
        let x = random_tensor(&[2, 6, 5, 2], 5);
        let by_axes = fft1(fft1(x.view(), FftAxis::Height).unwrap().view(), FftAxis::Width).unwrap();
        let full = fft2(x.view()).unwrap();
        assert!(max_abs_diff(&by_axes, &full) < 1e-5);
    }

    #[test]
    fn non_complex_input_is_rejected() {
        let x = ArrayD::<f32>::zeros(IxDyn(&[1, 4, 4, 3]));
        assert!(matches!(fft2(x.view()), Err(TransformError::Shape(_))));
        let x = ArrayD::<f32>::zeros(IxDyn(&[4, 2]));
        assert!(matches!(ifft2(x.view()), Err(TransformError::Shape(_))));
    }

    #[test]
    fn to_complex_needs_a_complex_axis() {
        for shape in [vec![4, 3], vec![4, 1], vec![]] {
            let x = ArrayD::<f32>::zeros(IxDyn(&shape));
            assert!(matches!(to_complex(x.view()), Err(TransformError::Shape(_))), "{:?}", shape);
        }
        let x = Array::from_shape_vec(IxDyn(&[2, 2]), vec![1., 2., 3., 4.]).unwrap();
        let c = to_complex(x.view()).unwrap();
        assert_eq!(c[[1]], Complex32::new(3., 4.));
        assert_eq!(from_complex(&c), x);
    }

    #[test]
    fn magnitude_and_rss() {
        let x = Array::from_shape_vec(IxDyn(&[1, 1, 2, 2]), vec![3., 4., -5., 12.]).unwrap();
        let m = complex_abs(x.view()).unwrap();
        assert_eq!(m.shape(), &[1, 1, 2]);
        assert_eq!(m[[0, 0, 0]], 5.);
        assert_eq!(m[[0, 0, 1]], 13.);

        let coils = Array::from_shape_vec(IxDyn(&[2, 1, 1]), vec![3., 4.]).unwrap();
        let rss = root_sum_of_squares(coils.view(), Axis(0)).unwrap();
        assert_eq!(rss[[0, 0]], 5.);
    }

    #[test]
    fn ssos_mip_takes_group_maximum() {
        let mut x = Array4::<f32>::zeros((1, 4, 1, 1));
        x[[0, 0, 0, 0]] = 3.;
        x[[0, 1, 0, 0]] = 4.;
        x[[0, 2, 0, 0]] = 1.;
        let (stacked, mip) = ssos_mip(x.view(), 2).unwrap();
        assert_eq!(stacked.dim(), (1, 2, 1, 1));
        assert_eq!(stacked[[0, 0, 0, 0]], 5.);
        assert_eq!(stacked[[0, 1, 0, 0]], 1.);
        assert_eq!(mip[[0, 0, 0]], 5.);
    }

    #[test]
    fn nchw_round_trip_through_kspace() {
        let x = random_tensor(&[1, 4, 8, 6], 2);
        let k = fft2_nchw(x.view()).unwrap();
        let back = ifft2_nchw(k.view().into_dyn()).unwrap().into_dyn();
        assert!(max_abs_diff(&x, &back) < 1e-5);
    }
}
