pub enum Error {
    NotAnArchive,
    CorruptArchive,
    EntryNotFound,
    UnsupportedCompression(u16),
    NotSzip,
    CorruptSzip,
    NotDex,
    CorruptDex,
    NotElf,
    UnsupportedElf,
    CorruptElf,
    CorruptSymbols,
    UnexpectedEnd,
    IO(std::io::Error),
    Inflate(flate2::DecompressError),
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IO(e)
    }
}

impl From<flate2::DecompressError> for Error {
    fn from(e: flate2::DecompressError) -> Self {
        Self::Inflate(e)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotAnArchive => write!(f, "NotAnArchive"),
            Error::CorruptArchive => write!(f, "CorruptArchive"),
            Error::EntryNotFound => write!(f, "EntryNotFound"),
            Error::UnsupportedCompression(m) => write!(f, "UnsupportedCompression({})", m),
            Error::NotSzip => write!(f, "NotSzip"),
            Error::CorruptSzip => write!(f, "CorruptSzip"),
            Error::NotDex => write!(f, "NotDex"),
            Error::CorruptDex => write!(f, "CorruptDex"),
            Error::NotElf => write!(f, "NotElf"),
            Error::UnsupportedElf => write!(f, "UnsupportedElf"),
            Error::CorruptElf => write!(f, "CorruptElf"),
            Error::CorruptSymbols => write!(f, "CorruptSymbols"),
            Error::UnexpectedEnd => write!(f, "UnexpectedEnd"),
            Error::IO(e) => write!(f, "IO({:?})", e),
            Error::Inflate(e) => write!(f, "Inflate({:?})", e),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotAnArchive => write!(f, "is not a zip archive"),
            Error::CorruptArchive => write!(f, "corrupt zip archive"),
            Error::EntryNotFound => write!(f, "archive entry not found"),
            Error::UnsupportedCompression(m) => {
                write!(f, "unsupported zip compression method {}", m)
            }
            Error::NotSzip => write!(f, "is not an szip stream"),
            Error::CorruptSzip => write!(f, "corrupt szip stream"),
            Error::NotDex => write!(f, "is not a dex file"),
            Error::CorruptDex => write!(f, "corrupt dex file"),
            Error::NotElf => write!(f, "is not an elf image"),
            Error::UnsupportedElf => write!(f, "unsupported elf image"),
            Error::CorruptElf => write!(f, "corrupt elf image"),
            Error::CorruptSymbols => write!(f, "corrupt symbol file"),
            Error::UnexpectedEnd => write!(f, "unexpected end"),
            Error::IO(e) => write!(f, "i/o error: {}", e),
            Error::Inflate(e) => write!(f, "inflate error: {}", e),
        }
    }
}
