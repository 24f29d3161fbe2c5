use std::path::PathBuf;

/// The default CHIP-8 processor speed in hertz.
pub const DEFAULT_SPEED_HERTZ: u32 = 720;
/// The default CHIP-8 program start address within memory.
pub const DEFAULT_PROGRAM_ADDRESS: u16 = 0x200;

/// A struct to allow specification of start-up parameters.
///
/// This crate's only configurable options are the guest processor speed and the ROM to
/// load; there is no quirks/compatibility layer to configure. An instance of [Options]
/// is passed to [Executor::init](crate::executor::Executor::init) when constructing an
/// executor.
#[derive(Clone, Debug)]
pub struct Options {
    /// Guest cycles per second; the per-frame cycle quota is `speed / 60`.
    pub speed: u32,
    /// Path to the ROM file to load at `program_start_address`.
    pub rom_path: PathBuf,
    /// The memory address the ROM is loaded at and `pc` is initialised to.
    pub program_start_address: u16,
}

impl Default for Options {
    /// Constructor that returns an [Options] instance using typical default settings.
    /// `rom_path` is empty and must be set by the caller before use.
    fn default() -> Self {
        Options {
            speed: DEFAULT_SPEED_HERTZ,
            rom_path: PathBuf::new(),
            program_start_address: DEFAULT_PROGRAM_ADDRESS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.speed, DEFAULT_SPEED_HERTZ);
        assert_eq!(options.program_start_address, DEFAULT_PROGRAM_ADDRESS);
    }
}
