//! Reference semantics for all opcodes, dispatched from [step]. This is the tier
//! every other tier (cached interpreter, recompiler) is checked against.

use crate::core_state::CoreState;
use crate::decode::Opcode;
use crate::error::Error;
use rand::Rng;

#[cfg(test)]
mod tests;

/// Fetches, decodes and executes one instruction on `state`, returning the number
/// of cycles consumed (always 1 for the pure interpreter).
pub fn step(state: &mut CoreState) -> Result<u32, Error> {
    let pc = state.pc;
    let op = state.fetch_opcode(pc);
    state.pc = pc.wrapping_add(2);
    let opcode = Opcode::decode(op, pc)?;
    execute(state, opcode);
    Ok(1)
}

fn execute(state: &mut CoreState, opcode: Opcode) {
    match opcode {
        Opcode::Cls => op_cls(state),
        Opcode::Ret => op_ret(state),
        Opcode::Jp { nnn } => op_jp(state, nnn),
        Opcode::Call { nnn } => op_call(state, nnn),
        Opcode::SeVxByte { x, kk } => op_se_vx_byte(state, x, kk),
        Opcode::SneVxByte { x, kk } => op_sne_vx_byte(state, x, kk),
        Opcode::SeVxVy { x, y } => op_se_vx_vy(state, x, y),
        Opcode::LdVxByte { x, kk } => op_ld_vx_byte(state, x, kk),
        Opcode::AddVxByte { x, kk } => op_add_vx_byte(state, x, kk),
        Opcode::LdVxVy { x, y } => op_ld_vx_vy(state, x, y),
        Opcode::OrVxVy { x, y } => op_or_vx_vy(state, x, y),
        Opcode::AndVxVy { x, y } => op_and_vx_vy(state, x, y),
        Opcode::XorVxVy { x, y } => op_xor_vx_vy(state, x, y),
        Opcode::AddVxVy { x, y } => op_add_vx_vy(state, x, y),
        Opcode::SubVxVy { x, y } => op_sub_vx_vy(state, x, y),
        Opcode::Shr { x, y } => op_shr(state, x, y),
        Opcode::Subn { x, y } => op_subn(state, x, y),
        Opcode::Shl { x, y } => op_shl(state, x, y),
        Opcode::SneVxVy { x, y } => op_sne_vx_vy(state, x, y),
        Opcode::LdIAddr { nnn } => op_ld_i_addr(state, nnn),
        Opcode::JpV0 { nnn } => op_jp_v0(state, nnn),
        Opcode::Rnd { x, kk } => op_rnd(state, x, kk),
        Opcode::Drw { x, y, n } => op_drw(state, x, y, n),
        Opcode::Skp { x } => op_skp(state, x),
        Opcode::Sknp { x } => op_sknp(state, x),
        Opcode::LdVxDt { x } => op_ld_vx_dt(state, x),
        Opcode::LdVxK { x } => op_ld_vx_k(state, x),
        Opcode::LdDtVx { x } => op_ld_dt_vx(state, x),
        Opcode::LdStVx { x } => op_ld_st_vx(state, x),
        Opcode::AddIVx { x } => op_add_i_vx(state, x),
        Opcode::LdFVx { x } => op_ld_f_vx(state, x),
        Opcode::LdBVx { x } => op_ld_b_vx(state, x),
        Opcode::LdIVx { x } => op_ld_i_vx(state, x),
        Opcode::LdVxI { x } => op_ld_vx_i(state, x),
    }
}

fn op_cls(state: &mut CoreState) {
    state.display = [0; crate::core_state::DISPLAY_HEIGHT];
}

fn op_ret(state: &mut CoreState) {
    debug_assert!(state.sp > 0, "RET with empty stack");
    state.sp = state.sp.wrapping_sub(1);
    state.pc = state.stack[state.sp as usize];
}

fn op_jp(state: &mut CoreState, nnn: u16) {
    state.pc = nnn;
}

fn op_call(state: &mut CoreState, nnn: u16) {
    debug_assert!((state.sp as usize) < crate::core_state::STACK_DEPTH, "CALL with full stack");
    state.stack[state.sp as usize] = state.pc;
    state.sp = state.sp.wrapping_add(1);
    state.pc = nnn;
}

fn op_se_vx_byte(state: &mut CoreState, x: u8, kk: u8) {
    if state.gpr[x as usize] == kk {
        state.pc = state.pc.wrapping_add(2);
    }
}

fn op_sne_vx_byte(state: &mut CoreState, x: u8, kk: u8) {
    if state.gpr[x as usize] != kk {
        state.pc = state.pc.wrapping_add(2);
    }
}

fn op_se_vx_vy(state: &mut CoreState, x: u8, y: u8) {
    if state.gpr[x as usize] == state.gpr[y as usize] {
        state.pc = state.pc.wrapping_add(2);
    }
}

fn op_ld_vx_byte(state: &mut CoreState, x: u8, kk: u8) {
    state.gpr[x as usize] = kk;
}

fn op_add_vx_byte(state: &mut CoreState, x: u8, kk: u8) {
    state.gpr[x as usize] = state.gpr[x as usize].wrapping_add(kk);
}

fn op_ld_vx_vy(state: &mut CoreState, x: u8, y: u8) {
    state.gpr[x as usize] = state.gpr[y as usize];
}

fn op_or_vx_vy(state: &mut CoreState, x: u8, y: u8) {
    state.gpr[x as usize] |= state.gpr[y as usize];
}

fn op_and_vx_vy(state: &mut CoreState, x: u8, y: u8) {
    state.gpr[x as usize] &= state.gpr[y as usize];
}

fn op_xor_vx_vy(state: &mut CoreState, x: u8, y: u8) {
    state.gpr[x as usize] ^= state.gpr[y as usize];
}

fn op_add_vx_vy(state: &mut CoreState, x: u8, y: u8) {
    let (sum, carry) = state.gpr[x as usize].overflowing_add(state.gpr[y as usize]);
    state.gpr[x as usize] = sum;
    state.gpr[0xF] = carry as u8;
}

fn op_sub_vx_vy(state: &mut CoreState, x: u8, y: u8) {
    let a = state.gpr[x as usize];
    let b = state.gpr[y as usize];
    state.gpr[x as usize] = a.wrapping_sub(b);
    state.gpr[0xF] = (a > b) as u8;
}

fn op_shr(state: &mut CoreState, x: u8, _y: u8) {
    let original = state.gpr[x as usize];
    state.gpr[x as usize] = original >> 1;
    state.gpr[0xF] = original & 0x1;
}

fn op_subn(state: &mut CoreState, x: u8, y: u8) {
    let a = state.gpr[x as usize];
    let b = state.gpr[y as usize];
    state.gpr[x as usize] = b.wrapping_sub(a);
    state.gpr[0xF] = (b > a) as u8;
}

fn op_shl(state: &mut CoreState, x: u8, _y: u8) {
    let original = state.gpr[x as usize];
    state.gpr[x as usize] = original << 1;
    state.gpr[0xF] = (original >> 7) & 0x1;
}

fn op_sne_vx_vy(state: &mut CoreState, x: u8, y: u8) {
    if state.gpr[x as usize] != state.gpr[y as usize] {
        state.pc = state.pc.wrapping_add(2);
    }
}

fn op_ld_i_addr(state: &mut CoreState, nnn: u16) {
    state.index = nnn & 0xFFF;
}

fn op_jp_v0(state: &mut CoreState, nnn: u16) {
    state.pc = (state.gpr[0] as u16).wrapping_add(nnn);
}

fn op_rnd(state: &mut CoreState, x: u8, kk: u8) {
    let byte: u8 = rand::thread_rng().gen();
    state.gpr[x as usize] = byte & kk;
}

/// The `DRW` reference semantics, also called directly by the recompiler's
/// thunk for this opcode so the two tiers can never disagree on the blit.
pub(crate) fn op_drw_for_recompiler(state: &mut CoreState, x: u8, y: u8, n: u8) {
    op_drw(state, x, y, n)
}

fn op_drw(state: &mut CoreState, x: u8, y: u8, n: u8) {
    let start_x = (state.gpr[x as usize] as u32) & 63;
    let start_y = (state.gpr[y as usize] as u32) & 31;
    let index = state.index as usize;
    let mut collision = false;
    for row in 0..(n as u32) {
        let y = start_y + row;
        if y >= crate::core_state::DISPLAY_HEIGHT as u32 {
            break;
        }
        let sprite_byte = state.ram[index + row as usize];
        let sprite_line = ((sprite_byte as u64) << 56) >> start_x;
        let display_row = &mut state.display[y as usize];
        if *display_row & sprite_line != 0 {
            collision = true;
        }
        *display_row ^= sprite_line;
    }
    state.gpr[0xF] = collision as u8;
}

fn op_skp(state: &mut CoreState, x: u8) {
    if state.key_state[(state.gpr[x as usize] & 0xF) as usize] {
        state.pc = state.pc.wrapping_add(2);
    }
}

fn op_sknp(state: &mut CoreState, x: u8) {
    if !state.key_state[(state.gpr[x as usize] & 0xF) as usize] {
        state.pc = state.pc.wrapping_add(2);
    }
}

fn op_ld_vx_dt(state: &mut CoreState, x: u8) {
    state.gpr[x as usize] = state.delay;
}

fn op_ld_vx_k(state: &mut CoreState, x: u8) {
    match state.first_pressed_key() {
        Some(key) => state.gpr[x as usize] = key,
        None => state.pc = state.pc.wrapping_sub(2),
    }
}

fn op_ld_dt_vx(state: &mut CoreState, x: u8) {
    state.delay = state.gpr[x as usize];
}

fn op_ld_st_vx(state: &mut CoreState, x: u8) {
    state.sound = state.gpr[x as usize];
}

fn op_add_i_vx(state: &mut CoreState, x: u8) {
    state.index = state.index.wrapping_add(state.gpr[x as usize] as u16);
}

fn op_ld_f_vx(state: &mut CoreState, x: u8) {
    state.index = state.gpr[x as usize] as u16 * crate::font::CHAR_SIZE as u16;
}

fn op_ld_b_vx(state: &mut CoreState, x: u8) {
    let value = state.gpr[x as usize];
    let index = state.index as usize;
    state.ram[index] = value / 100;
    state.ram[index + 1] = (value / 10) % 10;
    state.ram[index + 2] = value % 10;
}

fn op_ld_i_vx(state: &mut CoreState, x: u8) {
    let index = state.index as usize;
    for i in 0..=(x as usize) {
        state.ram[index + i] = state.gpr[i];
    }
}

fn op_ld_vx_i(state: &mut CoreState, x: u8) {
    let index = state.index as usize;
    for i in 0..=(x as usize) {
        state.gpr[i] = state.ram[index + i];
    }
}
