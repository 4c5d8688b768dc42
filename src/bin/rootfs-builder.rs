use std::env;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Result};

use rootfs_builder::build;
use rootfs_builder::config::ImageSpec;
use rootfs_builder::FilesystemTable;

fn usage(program: &str) -> String {
    format!("usage: {} <spec.toml> <root-dir> <output-dir>", program)
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        bail!("{}", usage(args.first().map(String::as_str).unwrap_or("rootfs-builder")));
    }

    let spec = ImageSpec::load(Path::new(&args[1]))?;
    let table = FilesystemTable::with_defaults();
    let image = build::build_image(&spec, Path::new(&args[2]), Path::new(&args[3]), &table)?;
    println!("Image ready: {}", image.display());
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
