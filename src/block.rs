use crate::error::{Result, TransformError};
use crate::layout::as_nchw;
use ndarray::parallel::prelude::*;
use ndarray::{s, Array3, Array4, ArrayD, ArrayView3, ArrayView4, ArrayViewD, Axis, Slice};
use rand::Rng;
use std::iter::once;
use tracing::debug;

/// Deterministic grid of square patches covering a `height` x `width` field of view. Offsets
/// are spaced by `stride` with a final row and column snapped to the far edge, so the grid
/// always reaches the border at the price of extra overlap there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGrid {
    pub height: usize,
    pub width: usize,
    pub patch_size: usize,
    pub stride: usize,
}

impl PatchGrid {
    pub fn new(height: usize, width: usize, patch_size: usize, stride: usize) -> Result<Self> {
        if patch_size == 0 || stride == 0 {
            return Err(TransformError::config("patch size and stride must be non-zero"));
        }
        if patch_size > height || patch_size > width {
            return Err(TransformError::config(format!(
                "patch size {patch_size} exceeds the field of view {height}x{width}"
            )));
        }
        Ok(Self { height, width, patch_size, stride })
    }

    /// regular offsets along one axis followed by the snapped edge offset
    fn axis_offsets(&self, dim: usize) -> Vec<usize> {
        let n = (dim - self.patch_size) / self.stride + 1;
        (0..n).map(|i| i * self.stride).chain(once(dim - self.patch_size)).collect()
    }

    /// `(row, col)` patch offsets in row-major order
    pub fn offsets(&self) -> Vec<(usize, usize)> {
        let rows = self.axis_offsets(self.height);
        let cols = self.axis_offsets(self.width);
        rows.iter().flat_map(|&r| cols.iter().map(move |&c| (r, c))).collect()
    }

    /// number of patches in the grid
    pub fn len(&self) -> usize {
        self.axis_offsets(self.height).len() * self.axis_offsets(self.width).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Draws one random top-left corner for a `patch_size` patch, uniform over
/// `[0, dim - patch_size - 1]` on both axes
pub fn random_offset<R: Rng + ?Sized>(height: usize, width: usize, patch_size: usize, rng: &mut R) -> Result<(usize, usize)> {
    if patch_size == 0 {
        return Err(TransformError::config("patch size must be non-zero"));
    }
    if patch_size >= height || patch_size >= width {
        return Err(TransformError::config(format!(
            "patch size {patch_size} leaves no room for a random offset in {height}x{width}"
        )));
    }
    let row = rng.random_range(0..height - patch_size);
    let col = rng.random_range(0..width - patch_size);
    Ok((row, col))
}

/// the `(H, W)` size shared by the last two axes of every tensor
fn common_field_of_view(tensors: &[ArrayViewD<f32>]) -> Result<(usize, usize)> {
    let mut fov = None;
    for t in tensors {
        let nd = t.ndim();
        if nd < 2 {
            return Err(TransformError::shape(format!(
                "patches need at least 2 dimensions, got shape {:?}",
                t.shape()
            )));
        }
        let hw = (t.shape()[nd - 2], t.shape()[nd - 1]);
        match fov {
            None => fov = Some(hw),
            Some(prev) if prev != hw => {
                return Err(TransformError::shape(format!(
                    "tensors disagree on the field of view: {prev:?} vs {hw:?}"
                )))
            }
            _ => {}
        }
    }
    fov.ok_or_else(|| TransformError::shape("no tensors to extract patches from"))
}

fn patch_at(t: &ArrayViewD<f32>, row: usize, col: usize, ps: usize) -> ArrayD<f32> {
    let nd = t.ndim();
    let mut p = t.view();
    p.slice_axis_inplace(Axis(nd - 2), Slice::from(row..row + ps));
    p.slice_axis_inplace(Axis(nd - 1), Slice::from(col..col + ps));
    p.to_owned()
}

/// Cuts the same random patch out of every tensor. All tensors must share the size of their
/// last two axes.
pub fn extract_patches<R: Rng + ?Sized>(tensors: &[ArrayViewD<f32>], patch_size: usize, rng: &mut R) -> Result<Vec<ArrayD<f32>>> {
    let (h, w) = common_field_of_view(tensors)?;
    let (row, col) = random_offset(h, w, patch_size, rng)?;
    debug!(row, col, patch_size, "extracting patch");
    Ok(tensors.iter().map(|t| patch_at(t, row, col, patch_size)).collect())
}

/// training patch of matching inputs and targets
pub fn extract_patch<'a, R: Rng + ?Sized>(
    inputs: ArrayViewD<'a, f32>,
    targets: ArrayViewD<'a, f32>,
    patch_size: usize,
    rng: &mut R,
) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
    let mut patches = extract_patches(&[inputs, targets], patch_size, rng)?.into_iter();
    match (patches.next(), patches.next()) {
        (Some(i), Some(t)) => Ok((i, t)),
        _ => Err(TransformError::shape("expected an input and a target patch")),
    }
}

fn check_dims(dims: usize) -> Result<()> {
    if dims != 2 {
        return Err(TransformError::unsupported(format!("only 2-D patches are implemented, got {dims}")));
    }
    Ok(())
}

/// Extracts every grid patch of a `(1, C, H, W)` tensor into a `(P, C, ps, ps)` batch
pub fn tile(inputs: ArrayViewD<f32>, dims: usize, grid: &PatchGrid) -> Result<Array4<f32>> {
    check_dims(dims)?;
    let x = as_nchw(inputs, "tile")?;
    let (n, c, h, w) = x.dim();
    if n != 1 || (h, w) != (grid.height, grid.width) {
        return Err(TransformError::shape(format!(
            "expected a (1, C, {}, {}) tensor, got {:?}",
            grid.height,
            grid.width,
            x.shape()
        )));
    }
    let ps = grid.patch_size;
    let offsets = grid.offsets();
    let mut batch = Array4::<f32>::zeros((offsets.len(), c, ps, ps));

    // read patches into the batch in parallel
    batch.axis_iter_mut(Axis(0)).into_par_iter().enumerate().for_each(|(i, mut patch)| {
        let (row, col) = offsets[i];
        patch.assign(&x.slice(s![0, .., row..row + ps, col..col + ps]));
    });
    Ok(batch)
}

/// Overlap-averaging buffer for one field of view. Patches are added into a zeroed value
/// buffer while a weight buffer counts contributions per pixel.
pub struct PatchAccumulator {
    grid: PatchGrid,
    values: Array3<f32>,
    weights: Array3<f32>,
}

impl PatchAccumulator {
    pub fn new(grid: PatchGrid, channels: usize) -> Self {
        let shape = (channels, grid.height, grid.width);
        Self {
            grid,
            values: Array3::zeros(shape),
            weights: Array3::zeros(shape),
        }
    }

    pub fn add(&mut self, patch: ArrayView3<f32>, row: usize, col: usize) -> Result<()> {
        let ps = self.grid.patch_size;
        let (c, _, _) = self.values.dim();
        if patch.dim() != (c, ps, ps) {
            return Err(TransformError::shape(format!(
                "expected a ({c}, {ps}, {ps}) patch, got {:?}",
                patch.shape()
            )));
        }
        if row + ps > self.grid.height || col + ps > self.grid.width {
            return Err(TransformError::shape(format!("patch at ({row}, {col}) leaves the field of view")));
        }
        let mut v = self.values.slice_mut(s![.., row..row + ps, col..col + ps]);
        v += &patch;
        let mut w = self.weights.slice_mut(s![.., row..row + ps, col..col + ps]);
        w += 1.;
        Ok(())
    }

    /// per-pixel number of contributing patches
    pub fn weights(&self) -> ArrayView3<f32> {
        self.weights.view()
    }

    /// Divides the accumulated values by their weights. Pixels no patch touched come out as
    /// NaN.
    pub fn finish(self) -> Array3<f32> {
        self.values / self.weights
    }
}

/// Reassembles a `(P, C, ps, ps)` batch produced by [tile] into a `(C, H, W)` image
pub fn stitch(patches: ArrayView4<f32>, dims: usize, grid: &PatchGrid) -> Result<Array3<f32>> {
    check_dims(dims)?;
    let offsets = grid.offsets();
    if patches.len_of(Axis(0)) != offsets.len() {
        return Err(TransformError::shape(format!(
            "grid has {} patches, got {}",
            offsets.len(),
            patches.len_of(Axis(0))
        )));
    }
    let mut acc = PatchAccumulator::new(*grid, patches.len_of(Axis(1)));
    for (patch, &(r, c)) in patches.axis_iter(Axis(0)).zip(&offsets) {
        acc.add(patch, r, c)?;
    }
    Ok(acc.finish())
}
