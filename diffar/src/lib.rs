mod bcj;
pub mod breakpad;
mod delta;
pub mod dex;
mod differ;
pub mod elf;
mod error;
mod so;
mod szip;
mod util;
mod zip;

pub use bcj::BcjFilter;
pub use delta::{Delta, SizeMap};
pub use differ::{DeltaIter, DexHandler, Differ, Handler, NestedArchiveHandler};
pub use error::Error;
pub use so::SoHandler;
pub use szip::{SzipReader, SZIP_MAGIC};
pub use zip::{ZipArchive, ZipEntry};
