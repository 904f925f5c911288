use crate::error::{Result, TransformError};
use ndarray::{ArrayD, ArrayViewD, Axis, Slice};

/// Amount of samples added to (or removed from) the left and right of the width axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PadSplit {
    pub left: usize,
    pub right: usize,
}

fn check_divisor(divisor: usize) -> Result<()> {
    if divisor == 0 {
        return Err(TransformError::config("divisor must be at least 1"));
    }
    Ok(())
}

impl PadSplit {
    pub fn new(left: usize, right: usize) -> Self {
        Self { left, right }
    }

    /// Padding that brings `width` up to the next multiple of `divisor`. A width that already
    /// divides evenly is left alone.
    pub fn for_divisor(width: usize, divisor: usize) -> Result<Self> {
        check_divisor(divisor)?;
        let margin = width % divisor;
        if margin == 0 {
            return Ok(Self::default());
        }
        let total = divisor - margin;
        let left = total / 2;
        Ok(Self::new(left, total - left))
    }

    /// Crop that brings `width` down to the previous multiple of `divisor`, cutting `m / 2` from
    /// the left and `(m + 1) / 2` from the right
    pub fn for_crop(width: usize, divisor: usize) -> Result<Self> {
        check_divisor(divisor)?;
        let margin = width % divisor;
        Ok(Self::new(margin / 2, (margin + 1) / 2))
    }

    /// Crop bounds that take a `padded` width back to `target`, split from the widths themselves
    /// rather than from the padding used on the way in
    pub fn from_widths(padded: usize, target: usize) -> Result<Self> {
        if padded < target {
            return Err(TransformError::shape(format!(
                "cannot crop width {padded} to the larger width {target}"
            )));
        }
        let total = padded - target;
        let left = total / 2;
        Ok(Self::new(left, total - left))
    }

    pub fn total(&self) -> usize {
        self.left + self.right
    }
}

/// zero pads the last axis by `split`
pub fn pad_width(x: ArrayViewD<f32>, split: PadSplit) -> Result<ArrayD<f32>> {
    if x.ndim() == 0 {
        return Err(TransformError::shape("cannot pad the width of a scalar"));
    }
    if split.total() == 0 {
        return Ok(x.to_owned());
    }
    let last = Axis(x.ndim() - 1);
    let w = x.len_of(last);
    let mut shape = x.shape().to_vec();
    shape[last.index()] = w + split.total();
    let mut out = ArrayD::<f32>::zeros(shape);
    out.slice_axis_mut(last, Slice::from(split.left..split.left + w)).assign(&x);
    Ok(out)
}

/// removes `split` from the last axis, the exact inverse of [pad_width]
pub fn crop_width<'a, A>(x: ArrayViewD<'a, A>, split: PadSplit) -> Result<ArrayViewD<'a, A>> {
    if x.ndim() == 0 {
        return Err(TransformError::shape("cannot crop the width of a scalar"));
    }
    let last = Axis(x.ndim() - 1);
    let w = x.len_of(last);
    if split.total() > w {
        return Err(TransformError::shape(format!(
            "cannot remove {} samples from width {w}",
            split.total()
        )));
    }
    let mut x = x;
    x.slice_axis_inplace(last, Slice::from(split.left..w - split.right));
    Ok(x)
}

/// start index of a centered window of `size` samples within `dim`
pub fn crop_offset(dim: usize, size: usize) -> Result<usize> {
    if size == 0 || size > dim {
        return Err(TransformError::shape(format!(
            "crop size {size} must be within 1..={dim}"
        )));
    }
    Ok((dim - size) / 2)
}

/// centered crop of the axis `from_end` positions before the end
fn crop_axis<'a, A>(mut x: ArrayViewD<'a, A>, from_end: usize, size: usize) -> Result<ArrayViewD<'a, A>> {
    if x.ndim() < from_end {
        return Err(TransformError::shape(format!(
            "expected at least {from_end} dimensions, got shape {:?}",
            x.shape()
        )));
    }
    let axis = Axis(x.ndim() - from_end);
    let start = crop_offset(x.len_of(axis), size)?;
    x.slice_axis_inplace(axis, Slice::from(start..start + size));
    Ok(x)
}

/// Center crop of a real image or a batch of real images on the last two axes
pub fn center_crop<'a, A>(x: ArrayViewD<'a, A>, shape: (usize, usize)) -> Result<ArrayViewD<'a, A>> {
    let x = crop_axis(x, 2, shape.0)?;
    crop_axis(x, 1, shape.1)
}

/// Center crop of complex images on the height and width axes preceding the complex axis
pub fn complex_center_crop<'a, A>(x: ArrayViewD<'a, A>, shape: (usize, usize)) -> Result<ArrayViewD<'a, A>> {
    let x = crop_axis(x, 3, shape.0)?;
    crop_axis(x, 2, shape.1)
}

pub fn complex_height_crop<'a, A>(x: ArrayViewD<'a, A>, height: usize) -> Result<ArrayViewD<'a, A>> {
    crop_axis(x, 3, height)
}

pub fn complex_width_crop<'a, A>(x: ArrayViewD<'a, A>, width: usize) -> Result<ArrayViewD<'a, A>> {
    crop_axis(x, 2, width)
}

pub fn width_crop<'a, A>(x: ArrayViewD<'a, A>, width: usize) -> Result<ArrayViewD<'a, A>> {
    crop_axis(x, 1, width)
}
