use std::error;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// An Error enum used throughout this crate to communicate details of runtime errors
/// that have occurred.
///
/// Instances of [Error] are bubbled-up to the hosting application through the public
/// API methods.
#[derive(Debug)]
pub enum Error {
    /// The ROM file specified at start-up could not be opened
    RomNotFound { path: PathBuf, source: io::Error },
    /// The ROM file is too large to fit in the address space available after the font
    /// and program start address
    RomTooLarge { size: usize, max: usize },
    /// The executable code cache buffer could not be allocated
    CacheAllocationFailed { source: region::Error },
    /// The decoder reached an opcode outside the 35 supported by this crate
    UnimplementedOpcode { opcode: u16, pc: u16 },
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::RomNotFound { source, .. } => Some(source),
            Error::CacheAllocationFailed { source } => Some(source),
            Error::RomTooLarge { .. } | Error::UnimplementedOpcode { .. } => None,
        }
    }
}

impl fmt::Display for Error {
    /// Returns a textual description of each enum variant for display purposes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RomNotFound { path, source } => {
                write!(f, "could not open ROM file {}: {}", path.display(), source)
            }
            Error::RomTooLarge { size, max } => {
                write!(f, "ROM is {} bytes, which exceeds the maximum of {}", size, max)
            }
            Error::CacheAllocationFailed { source } => {
                write!(f, "failed to allocate executable code cache: {}", source)
            }
            Error::UnimplementedOpcode { opcode, pc } => {
                write!(
                    f,
                    "unimplemented opcode {:#06X} decoded at pc {:#06X}",
                    opcode, pc
                )
            }
        }
    }
}
