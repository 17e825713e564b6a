use anyhow::{Context, Result};
use bytes::Bytes;
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::string_utils::size_to_str;
use diffar::{Differ, SoHandler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub input_a: PathBuf,
    pub input_b: PathBuf,
    pub symbols_a: Option<PathBuf>,
    pub symbols_b: Option<PathBuf>,
}

pub fn run(options: Options) -> Result<()> {
    let a = read_file(&options.input_a)?;
    let b = read_file(&options.input_b)?;

    let mut differ = Differ::new();
    if let (Some(symbols_a), Some(symbols_b)) = (&options.symbols_a, &options.symbols_b) {
        debug!(
            "diffing shared objects against {} and {}",
            symbols_a.display(),
            symbols_b.display()
        );
        let handler = SoHandler::new(read_file(symbols_a)?, read_file(symbols_b)?)
            .context("failed to open symbol archives")?;
        differ.register_handler("so", Box::new(handler));
    }

    let mut added = 0u64;
    let mut removed = 0u64;
    let deltas = differ
        .diff(a, b)
        .with_context(|| format!("failed to diff {}", options.input_b.display()))?;
    for delta in deltas {
        let delta = delta.context("diff failed")?;
        if delta.b_size >= delta.a_size {
            added += delta.b_size - delta.a_size;
        } else {
            removed += delta.a_size - delta.b_size;
        }
        println!("{}", delta);
    }
    info!("total added: {}", size_to_str(added));
    info!("total removed: {}", size_to_str(removed));
    Ok(())
}

fn read_file(path: &Path) -> Result<Bytes> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Bytes::from(data))
}
