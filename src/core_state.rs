use crate::error::Error;
use crate::font;
use crate::program::Program;

/// Total addressable CHIP-8 memory, in bytes.
pub const MEMORY_SIZE: usize = 4096;
/// Maximum depth of the call stack.
pub const STACK_DEPTH: usize = 16;
/// Display width, in pixels.
pub const DISPLAY_WIDTH: usize = 64;
/// Display height, in pixels (rows).
pub const DISPLAY_HEIGHT: usize = 32;
/// Number of keys on the CHIP-8 keypad.
pub const KEY_COUNT: usize = 16;
/// The memory address the built-in font is loaded at.
pub const FONT_BASE_ADDRESS: u16 = 0x000;

/// The complete architectural state of a CHIP-8 guest.
///
/// This is a flat, `#[repr(C)]` value type laid out at a stable address for the
/// lifetime of whichever executor owns it: the interpreter indexes its arrays with
/// ordinary bounds-checked slice indexing, while the recompiler addresses the same
/// fields directly through a base register plus the byte offsets in [offsets].
/// Neither tier goes through an intermediate wrapper type, so there is exactly one
/// source of truth for where each field lives.
#[repr(C)]
#[derive(Clone, Debug, PartialEq)]
pub struct CoreState {
    /// Byte-addressable memory. Addresses `0x000..0x050` hold the built-in font;
    /// ROMs conventionally load at `0x200`.
    pub ram: [u8; MEMORY_SIZE],
    /// Call-return address stack; the top of stack is `stack[sp - 1]`.
    pub stack: [u16; STACK_DEPTH],
    /// Program counter. Always even for unmodified code.
    pub pc: u16,
    /// Stack pointer; number of live entries in `stack` (0..=16).
    pub sp: u8,
    /// Index register, masked to 12 bits on write.
    pub index: u16,
    /// Delay timer; decremented by exactly one per frame when non-zero.
    pub delay: u8,
    /// Sound timer; decremented by exactly one per frame when non-zero. A tone
    /// sounds iff `sound > 0`.
    pub sound: u8,
    /// General purpose registers V0..=VF. `gpr[0xF]` is the flag register.
    pub gpr: [u8; 16],
    /// The 64x32 monochrome display, one `u64` per row, MSB = leftmost pixel.
    pub display: [u64; DISPLAY_HEIGHT],
    /// Key-down state for keys 0x0..=0xF. Owned by the presenter, read by the
    /// emulator via SKP/SKNP/LDVxK.
    pub key_state: [bool; KEY_COUNT],
}

impl CoreState {
    /// Constructs a [CoreState] with the built-in font loaded and all other state
    /// zeroed. `pc` is left at zero; call [CoreState::load_rom] to load a program
    /// and position `pc`.
    pub fn new() -> Self {
        let mut state = CoreState {
            ram: [0; MEMORY_SIZE],
            stack: [0; STACK_DEPTH],
            pc: 0,
            sp: 0,
            index: 0,
            delay: 0,
            sound: 0,
            gpr: [0; 16],
            display: [0; DISPLAY_HEIGHT],
            key_state: [false; KEY_COUNT],
        };
        state.load_font();
        state
    }

    /// Resets all architectural state back to the condition returned by [CoreState::new].
    pub fn reset(&mut self) {
        *self = CoreState::new();
    }

    /// Loads the built-in font into `ram[0x000..0x050]`.
    fn load_font(&mut self) {
        let base = FONT_BASE_ADDRESS as usize;
        self.ram[base..base + font::FONT_DATA.len()].copy_from_slice(&font::FONT_DATA);
    }

    /// Loads `program` at `start_address` and positions `pc` there.
    ///
    /// # Arguments
    ///
    /// * `program` - the ROM bytes to load
    /// * `start_address` - the memory address to load the ROM at and to set `pc` to
    pub fn load_rom(&mut self, program: &Program, start_address: u16) -> Result<(), Error> {
        let data = program.program_data();
        let start = start_address as usize;
        if start + data.len() > MEMORY_SIZE {
            return Err(Error::RomTooLarge {
                size: data.len(),
                max: MEMORY_SIZE - start,
            });
        }
        self.ram[start..start + data.len()].copy_from_slice(data);
        self.pc = start_address;
        Ok(())
    }

    /// Fetches the big-endian 16-bit opcode at `ram[pc]` without advancing `pc`.
    pub fn fetch_opcode(&self, pc: u16) -> u16 {
        let pc = pc as usize;
        u16::from_be_bytes([self.ram[pc], self.ram[pc + 1]])
    }

    /// Decrements `delay` and `sound` by one each, if non-zero. Called once per
    /// frame (60 Hz) by the frame driver, never by the emulator's cycle loop.
    pub fn step_timers(&mut self) {
        if self.delay > 0 {
            self.delay -= 1;
        }
        if self.sound > 0 {
            self.sound -= 1;
        }
    }

    /// Returns the index (0..=0xF) of the first currently-pressed key, if any.
    pub fn first_pressed_key(&self) -> Option<u8> {
        self.key_state
            .iter()
            .position(|&pressed| pressed)
            .map(|i| i as u8)
    }
}

impl Default for CoreState {
    fn default() -> Self {
        CoreState::new()
    }
}

/// Byte offsets of [CoreState] fields, computed once via `memoffset::offset_of!` so the
/// recompiler can address them through a base register without re-deriving layout.
pub mod offsets {
    use super::CoreState;
    use memoffset::offset_of;

    pub const RAM: usize = offset_of!(CoreState, ram);
    pub const STACK: usize = offset_of!(CoreState, stack);
    pub const PC: usize = offset_of!(CoreState, pc);
    pub const SP: usize = offset_of!(CoreState, sp);
    pub const INDEX: usize = offset_of!(CoreState, index);
    pub const DELAY: usize = offset_of!(CoreState, delay);
    pub const SOUND: usize = offset_of!(CoreState, sound);
    pub const GPR: usize = offset_of!(CoreState, gpr);
    pub const DISPLAY: usize = offset_of!(CoreState, display);
    pub const KEY_STATE: usize = offset_of!(CoreState, key_state);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_loads_font() {
        let state = CoreState::new();
        assert_eq!(&state.ram[0..5], &[0xF0, 0x90, 0x90, 0x90, 0xF0]);
    }

    #[test]
    fn test_new_zeroes_registers() {
        let state = CoreState::new();
        assert_eq!(state.pc, 0);
        assert_eq!(state.sp, 0);
        assert_eq!(state.index, 0);
        assert_eq!(state.gpr, [0; 16]);
        assert_eq!(state.display, [0; DISPLAY_HEIGHT]);
    }

    #[test]
    fn test_load_rom_positions_pc_and_copies_data() {
        let mut state = CoreState::new();
        let program = Program::new(vec![0xA2, 0x20, 0x60, 0x05]);
        state.load_rom(&program, 0x200).unwrap();
        assert_eq!(state.pc, 0x200);
        assert_eq!(&state.ram[0x200..0x204], &[0xA2, 0x20, 0x60, 0x05]);
    }

    #[test]
    fn test_load_rom_too_large_is_rejected() {
        let mut state = CoreState::new();
        let program = Program::new(vec![0u8; MEMORY_SIZE]);
        assert!(matches!(
            state.load_rom(&program, 0x200),
            Err(Error::RomTooLarge { .. })
        ));
    }

    #[test]
    fn test_fetch_opcode_is_big_endian() {
        let mut state = CoreState::new();
        state.ram[0x200] = 0x12;
        state.ram[0x201] = 0x34;
        assert_eq!(state.fetch_opcode(0x200), 0x1234);
    }

    #[test]
    fn test_step_timers_decrements_and_floors_at_zero() {
        let mut state = CoreState::new();
        state.delay = 1;
        state.sound = 0;
        state.step_timers();
        assert_eq!(state.delay, 0);
        assert_eq!(state.sound, 0);
        state.step_timers();
        assert_eq!(state.delay, 0);
    }

    #[test]
    fn test_first_pressed_key() {
        let mut state = CoreState::new();
        assert_eq!(state.first_pressed_key(), None);
        state.key_state[0xB] = true;
        assert_eq!(state.first_pressed_key(), Some(0xB));
    }

    #[test]
    fn test_offsets_are_distinct_and_in_declared_order() {
        use offsets::*;
        let ordered = [RAM, STACK, PC, SP, INDEX, DELAY, SOUND, GPR, DISPLAY, KEY_STATE];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
