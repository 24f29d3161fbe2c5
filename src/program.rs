use crate::error::Error;
use std::fs;
use std::path::Path;

/// The maximum number of bytes a ROM may occupy, given the font occupies
/// `0x000..0x050` and the program is conventionally loaded at `0x200`.
pub const MAX_ROM_SIZE: usize = 4096 - 0x200;

/// An abstraction of a CHIP-8 ROM, ready for loading into [CoreState](crate::core_state::CoreState).
pub struct Program {
    /// A byte vector containing the program data as loaded from the ROM.
    program_data: Vec<u8>,
}

impl Program {
    /// Constructor that returns a [Program] instance representing the passed program data.
    pub fn new(data: Vec<u8>) -> Self {
        Program { program_data: data }
    }

    /// Reads a ROM file from disk and returns a [Program] wrapping its bytes.
    ///
    /// # Arguments
    ///
    /// * `path` - the path to the ROM file to load
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path).map_err(|source| Error::RomNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        if data.len() > MAX_ROM_SIZE {
            return Err(Error::RomTooLarge {
                size: data.len(),
                max: MAX_ROM_SIZE,
            });
        }
        Ok(Program::new(data))
    }

    /// Returns a reference to the program data held in this instance.
    pub fn program_data(&self) -> &[u8] {
        &self.program_data
    }

    /// Returns the size of the instance's program data (in bytes).
    pub fn program_data_size(&self) -> usize {
        self.program_data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_program() -> Vec<u8> {
        vec![0xA1, 0x14, 0x0C, 0xFD, 0xA3]
    }

    #[test]
    fn test_program_data() {
        let test_program: Vec<u8> = setup_test_program();
        let program = Program::new(test_program.clone());
        assert_eq!(program.program_data(), &test_program[..]);
    }

    #[test]
    fn test_program_data_size() {
        let test_program: Vec<u8> = setup_test_program();
        let program = Program::new(test_program.clone());
        assert_eq!(program.program_data_size(), test_program.len());
    }

    #[test]
    fn test_load_missing_file_is_rom_not_found() {
        let result = Program::load(Path::new("/nonexistent/path/to/rom.ch8"));
        assert!(matches!(result, Err(Error::RomNotFound { .. })));
    }
}
