use anyhow::{Context, Result};
use bytes::Bytes;
use log::info;
use std::fs::File;
use std::path::PathBuf;

use crate::string_utils::size_to_str;
use diffar::SzipReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub input: PathBuf,
    pub output: PathBuf,
}

pub fn run(options: Options) -> Result<()> {
    let data = std::fs::read(&options.input)
        .with_context(|| format!("failed to read {}", options.input.display()))?;
    let mut reader = SzipReader::new(Bytes::from(data))
        .with_context(|| format!("failed to open {}", options.input.display()))?;

    let mut output = File::create(&options.output)
        .with_context(|| format!("failed to create {}", options.output.display()))?;
    let copied = std::io::copy(&mut reader, &mut output)
        .with_context(|| format!("failed to decompress {}", options.input.display()))?;
    info!(
        "wrote {} to {}",
        size_to_str(copied),
        options.output.display()
    );
    Ok(())
}
