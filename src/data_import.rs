use crate::error::{Result, TransformError};
use cfl::ndarray::ShapeBuilder;
use ndarray::{ArrayD, Axis, IxDyn};
use num_complex::Complex32;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `path` without a `.cfl` or `.hdr` extension
fn cfl_base(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("cfl") | Some("hdr") => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

fn require_file(path: PathBuf) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(TransformError::io(path, Error::from(ErrorKind::NotFound)))
    }
}

/// Reads a BART `.hdr`/`.cfl` pair into a complex array in standard layout. Trailing singleton
/// dimensions are dropped.
pub fn read_cfl(base: impl AsRef<Path>) -> Result<ArrayD<Complex32>> {
    let base = cfl_base(base.as_ref());
    require_file(base.with_extension("hdr"))?;
    require_file(base.with_extension("cfl"))?;

    let raw = cfl::to_array(&base, true).map_err(|e| TransformError::Parse(format!("{}: {e:?}", base.display())))?;
    let mut dims = raw.shape().to_vec();
    while dims.len() > 1 && dims.last() == Some(&1) {
        dims.pop();
    }
    let data: Vec<Complex32> = raw.iter().map(|z| Complex32::new(z.re, z.im)).collect();
    debug!("read {} with dimensions {:?}", base.display(), dims);
    Ok(ArrayD::from_shape_vec(IxDyn(&dims), data)?)
}

/// Writes a complex array as a BART `.hdr`/`.cfl` pair
pub fn write_cfl(base: impl AsRef<Path>, array: &ArrayD<Complex32>) -> Result<()> {
    let base = cfl_base(base.as_ref());
    // column-major order is the row-major order of the reversed axes
    let data: Vec<cfl::num_complex::Complex32> = array
        .view()
        .reversed_axes()
        .iter()
        .map(|z| cfl::num_complex::Complex32::new(z.re, z.im))
        .collect();
    let vol = cfl::ndarray::ArrayD::from_shape_vec(cfl::ndarray::IxDyn(array.shape()).f(), data)
        .map_err(|e| TransformError::shape(e.to_string()))?;
    cfl::from_array(&base, &vol).map_err(|e| TransformError::Parse(format!("{}: {e:?}", base.display())))?;
    debug!("wrote {}", base.display());
    Ok(())
}

/// Loads one k-space slice stored as `(H, W)` or `(H, W, Coil)` and returns `(Coil, H, W)`
pub fn load_kslice(base: impl AsRef<Path>) -> Result<ArrayD<Complex32>> {
    let k = read_cfl(base)?;
    match k.ndim() {
        2 => Ok(k.insert_axis(Axis(0))),
        3 => Ok(k.permuted_axes(IxDyn(&[2, 0, 1])).as_standard_layout().into_owned()),
        _ => Err(TransformError::shape(format!(
            "expected a (H, W) or (H, W, Coil) slice, got {:?}",
            k.shape()
        ))),
    }
}

/// Volume name and slice number of a slice file named `<volume>_<slice>.cfl`. Files without a
/// numeric suffix keep their whole stem as the volume name and take `fallback` as slice number.
pub fn slice_id(path: &Path, fallback: usize) -> (String, usize) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.rsplit_once('_') {
        Some((volume, slice)) if !volume.is_empty() => match slice.parse::<usize>() {
            Ok(slice_num) => (volume.to_string(), slice_num),
            Err(_) => (stem, fallback),
        },
        _ => (stem, fallback),
    }
}

/// sorted paths matching a glob pattern
pub fn find_slices(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern).map_err(|e| TransformError::Parse(format!("pattern {pattern}: {e}")))?;
    let mut paths = entries
        .map(|entry| {
            entry.map_err(|e| {
                let path = e.path().to_path_buf();
                TransformError::io(path, e.into())
            })
        })
        .collect::<Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}
