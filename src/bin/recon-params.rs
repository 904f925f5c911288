use clap::Parser;
use kspace_prep::ReconParams;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Args {
    /// path to recon parameters file to write
    parameter_file: PathBuf,
}

fn main() -> Result<(), kspace_prep::TransformError> {
    let args = Args::parse();
    let params = ReconParams::default();
    params.to_file(&args.parameter_file)?;
    println!(
        "wrote default parameter file to {}",
        args.parameter_file.with_extension("toml").display()
    );
    Ok(())
}
