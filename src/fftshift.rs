use crate::error::{Result, TransformError};
use ndarray::{ArrayD, ArrayViewD, Axis, Slice};

/// circularly shifts `x` along `axis` by `shift` samples. Positive shifts move samples towards
/// higher indices, matching `numpy.roll`.
pub fn roll<A: Clone>(x: ArrayViewD<A>, shift: isize, axis: Axis) -> ArrayD<A> {
    let n = x.len_of(axis);
    let mut out = x.to_owned();
    if n == 0 {
        return out;
    }
    let s = shift.rem_euclid(n as isize) as usize;
    if s == 0 {
        return out;
    }
    // the last s samples wrap around to the front
    out.slice_axis_mut(axis, Slice::from(s..))
        .assign(&x.slice_axis(axis, Slice::from(..n - s)));
    out.slice_axis_mut(axis, Slice::from(..s))
        .assign(&x.slice_axis(axis, Slice::from(n - s..)));
    out
}

/// circular shift over several axes at once
pub fn circshift<A: Clone>(x: ArrayViewD<A>, shifts: &[isize], axes: &[Axis]) -> Result<ArrayD<A>> {
    if shifts.len() != axes.len() {
        return Err(TransformError::shape(format!(
            "circshift got {} shifts for {} axes",
            shifts.len(),
            axes.len()
        )));
    }
    if let Some(ax) = axes.iter().find(|ax| ax.index() >= x.ndim()) {
        return Err(TransformError::shape(format!(
            "circshift axis {} out of range for shape {:?}",
            ax.index(),
            x.shape()
        )));
    }
    Ok(shift_axes(x, shifts, axes))
}

fn shift_axes<A: Clone>(x: ArrayViewD<A>, shifts: &[isize], axes: &[Axis]) -> ArrayD<A> {
    let mut out = x.to_owned();
    for (&s, &ax) in shifts.iter().zip(axes) {
        out = roll(out.view(), s, ax);
    }
    out
}

/// forward fft shift: moves the zero-frequency sample to the center by rolling each axis by
/// `floor(n / 2)`
pub fn fftshift<A: Clone>(x: ArrayViewD<A>, axes: &[Axis]) -> ArrayD<A> {
    let shifts: Vec<isize> = axes.iter().map(|&ax| (x.len_of(ax) / 2) as isize).collect();
    shift_axes(x, &shifts, axes)
}

/// inverse fft shift: rolls each axis by `ceil(n / 2)`, undoing [fftshift] for odd sizes as well
pub fn ifftshift<A: Clone>(x: ArrayViewD<A>, axes: &[Axis]) -> ArrayD<A> {
    let shifts: Vec<isize> = axes.iter().map(|&ax| ((x.len_of(ax) + 1) / 2) as isize).collect();
    shift_axes(x, &shifts, axes)
}
