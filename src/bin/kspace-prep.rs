use clap::Parser;
use kspace_prep::data_import::{find_slices, load_kslice, slice_id, write_cfl};
use kspace_prep::fft::{complex_abs, root_sum_of_squares};
use kspace_prep::post_processing::OutputTransformK2C;
use kspace_prep::pre_processing::{InputConfig, InputSliceTransformK2C, SliceInput};
use kspace_prep::{Network, ReconParams, Result, TransformError};
use ndarray::{Array4, ArrayView4, Axis};
use num_complex::Complex32;
use rayon::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs every k-space slice matching a pattern through the k-space to complex image transforms
/// and writes the RSS reconstruction of each slice next to its mask metadata.
#[derive(Debug, Parser)]
struct Args {
    /// glob pattern matching the .cfl files of the slices, e.g. "data/*.cfl". Slices named
    /// `<volume>_<slice>.cfl` share the mask of their volume.
    pattern: String,
    /// recon parameters file written by recon-params
    params: PathBuf,
    /// output directory
    out_dir: PathBuf,
}

/// stand-in for a trained model
fn identity(x: ArrayView4<f32>) -> Result<Array4<f32>> {
    Ok(x.to_owned())
}

fn process_slice(path: &Path, index: usize, transform: &InputSliceTransformK2C, out_dir: &Path) -> Result<()> {
    let (volume, slice_num) = slice_id(path, index);
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{volume}_{slice_num}"));
    let input = SliceInput::new(load_kslice(path)?, volume.clone(), slice_num);

    let (x, _, params) = transform.transform(&input)?;
    let y = identity.forward(x.insert_axis(Axis(0)).view())?;
    let image = OutputTransformK2C::new(transform.log_amp_scale).transform(y.view(), &params)?;

    let magnitude = complex_abs(image.view())?;
    let rss = root_sum_of_squares(magnitude.view(), Axis(1))?.index_axis_move(Axis(0), 0);
    write_cfl(out_dir.join(format!("{name}_recon")), &rss.mapv(|v| Complex32::new(v, 0.)))?;

    let info_path = out_dir.join(format!("{name}_mask.json"));
    let info = serde_json::to_string_pretty(&params.kspace.info).map_err(|e| TransformError::Parse(e.to_string()))?;
    File::create(&info_path)
        .and_then(|mut f| f.write_all(info.as_bytes()))
        .map_err(|e| TransformError::io(&info_path, e))?;

    info!(
        acceleration = params.kspace.info.acceleration,
        "reconstructed {} slice {}",
        volume,
        slice_num
    );
    Ok(())
}

fn main() -> std::result::Result<(), TransformError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let params = ReconParams::from_file(&args.params)?;
    let config = InputConfig::from_params(&params)?;
    let transform = InputSliceTransformK2C::new(config, params.log_amp_scale);

    std::fs::create_dir_all(&args.out_dir).map_err(|e| TransformError::io(&args.out_dir, e))?;
    let slices = find_slices(&args.pattern)?;
    info!("found {} slices for {} on {}", slices.len(), params.challenge, params.device);

    if params.device.is_host() {
        slices
            .par_iter()
            .enumerate()
            .try_for_each(|(i, path)| process_slice(path, i, &transform, &args.out_dir))?;
    } else {
        // one slice at a time on an accelerator
        slices
            .iter()
            .enumerate()
            .try_for_each(|(i, path)| process_slice(path, i, &transform, &args.out_dir))?;
    }
    info!("done");
    Ok(())
}
