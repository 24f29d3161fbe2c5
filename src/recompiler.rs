//! Per-opcode host-code emitters, block assembly, and the self-modifying-code
//! invalidation emitter. This is the dominant component of the crate: every other
//! tier either interprets directly or falls back to this one.
//!
//! Simple register/memory arithmetic, loads and branchless skips are emitted as
//! native x86-64 straight-line code, addressed through a base register (`rbx`)
//! holding the [CoreState] pointer at known [offsets](crate::core_state::offsets).
//! A handful of opcodes with non-trivial control flow or memory-range effects —
//! `RND`, `DRW`, `LDB`, `LDIVx`, `LDVxK`, and the self-modifying-code invalidation
//! triggered by `LDIVx` — are emitted as calls into Rust callback thunks, which is
//! exactly what the block prologue's 40-byte scratch frame exists to support.

use crate::block_table::{BlockTable, PAGE_SIZE};
use crate::cache::CodeCache;
use crate::core_state::{offsets, CoreState, DISPLAY_HEIGHT, STACK_DEPTH};
use crate::decode::Opcode;
use crate::error::Error;
use dynasmrt::{dynasm, DynasmApi};


/// The signature every compiled block is entered with: a pointer to the live
/// [CoreState] and a pointer to the [BlockTable] it was compiled against (needed
/// only by the self-modifying-code invalidation path). Returns the number of
/// CHIP-8 cycles (instructions) the block represents.
pub type BlockFn = extern "sysv64" fn(core: *mut CoreState, block_table: *mut BlockTable) -> u32;

/// Compiles the block starting at `core.pc`, installing it in `cache`/`block_table`
/// and returning its entry point. Resets the cache (and clears the table) first if
/// headroom is low.
pub fn compile_block(
    core: &CoreState,
    cache: &mut CodeCache,
    block_table: &mut BlockTable,
) -> Result<*const u8, Error> {
    if cache.near_exhausted() {
        tracing::info!(bytes_used = cache.len(), "code cache near exhaustion, resetting");
        cache.reset();
        block_table.clear();
    }

    let entry_pc = core.pc;
    let mut ops = dynasmrt::x64::Assembler::new().expect("failed to allocate JIT scratch buffer");
    emit_prologue(&mut ops);

    let mut dynarec_pc = entry_pc;
    let mut cycles: u16 = 0;
    let mut terminated = false;
    loop {
        let op = core.fetch_opcode(dynarec_pc);
        let opcode = Opcode::decode(op, dynarec_pc)?;
        cycles += 1;
        let is_terminator = opcode.is_terminator();
        let pc_after = entry_pc.wrapping_add(cycles.wrapping_mul(2));
        emit_opcode(&mut ops, opcode, pc_after);
        dynarec_pc = dynarec_pc.wrapping_add(2);

        if is_terminator {
            terminated = true;
            break;
        }
        if (dynarec_pc as usize) & (PAGE_SIZE - 1) == 0 {
            break;
        }
    }

    if !terminated {
        let pc_after = entry_pc.wrapping_add(cycles.wrapping_mul(2));
        dynasm!(ops
            ; .arch x64
            ; mov WORD [rbx + offsets::PC as i32], pc_after as i16
        );
    }
    emit_epilogue(&mut ops, cycles as i32);

    let buf = ops
        .finalize()
        .unwrap_or_else(|_asm| panic!("JIT assembly failed"));

    let entry_ptr = cache.reserve();
    cache.emit(&buf);
    block_table.set(entry_pc, entry_ptr);
    Ok(entry_ptr)
}

fn emit_prologue(ops: &mut dynasmrt::x64::Assembler) {
    dynasm!(ops
        ; .arch x64
        ; push rbx
        ; push r12
        ; sub rsp, 40
        ; mov rbx, rdi   // rbx = CoreState*, held for the whole block
        ; mov r12, rsi   // r12 = BlockTable*, only consumed by the SMC thunk
    );
}

fn emit_epilogue(ops: &mut dynasmrt::x64::Assembler, cycles: i32) {
    dynasm!(ops
        ; .arch x64
        ; mov eax, cycles
        ; add rsp, 40
        ; pop r12
        ; pop rbx
        ; ret
    );
}

fn emit_opcode(ops: &mut dynasmrt::x64::Assembler, opcode: Opcode, pc_after: u16) {
    let skip_pc = pc_after.wrapping_add(2);
    match opcode {
        Opcode::Cls => emit_cls(ops),
        Opcode::Ret => emit_ret(ops),
        Opcode::Jp { nnn } => emit_jp(ops, nnn),
        Opcode::Call { nnn } => emit_call(ops, nnn, pc_after),
        Opcode::SeVxByte { x, kk } => emit_se_vx_byte(ops, x, kk, pc_after, skip_pc),
        Opcode::SneVxByte { x, kk } => emit_sne_vx_byte(ops, x, kk, pc_after, skip_pc),
        Opcode::SeVxVy { x, y } => emit_se_vx_vy(ops, x, y, pc_after, skip_pc),
        Opcode::SneVxVy { x, y } => emit_sne_vx_vy(ops, x, y, pc_after, skip_pc),
        Opcode::LdVxByte { x, kk } => emit_ld_vx_byte(ops, x, kk),
        Opcode::AddVxByte { x, kk } => emit_add_vx_byte(ops, x, kk),
        Opcode::LdVxVy { x, y } => emit_ld_vx_vy(ops, x, y),
        Opcode::OrVxVy { x, y } => emit_or_vx_vy(ops, x, y),
        Opcode::AndVxVy { x, y } => emit_and_vx_vy(ops, x, y),
        Opcode::XorVxVy { x, y } => emit_xor_vx_vy(ops, x, y),
        Opcode::AddVxVy { x, y } => emit_add_vx_vy(ops, x, y),
        Opcode::SubVxVy { x, y } => emit_sub_vx_vy(ops, x, y),
        Opcode::Shr { x, .. } => emit_shr(ops, x),
        Opcode::Subn { x, y } => emit_subn(ops, x, y),
        Opcode::Shl { x, .. } => emit_shl(ops, x),
        Opcode::LdIAddr { nnn } => emit_ld_i_addr(ops, nnn),
        Opcode::JpV0 { nnn } => emit_jp_v0(ops, nnn),
        Opcode::Rnd { x, kk } => emit_rnd(ops, x, kk),
        Opcode::Drw { x, y, n } => emit_drw(ops, x, y, n),
        Opcode::Skp { x } => emit_skp(ops, x, pc_after, skip_pc),
        Opcode::Sknp { x } => emit_sknp(ops, x, pc_after, skip_pc),
        Opcode::LdVxDt { x } => emit_ld_vx_dt(ops, x),
        Opcode::LdVxK { x } => emit_ld_vx_k(ops, x, pc_after),
        Opcode::LdDtVx { x } => emit_ld_dt_vx(ops, x),
        Opcode::LdStVx { x } => emit_ld_st_vx(ops, x),
        Opcode::AddIVx { x } => emit_add_i_vx(ops, x),
        Opcode::LdFVx { x } => emit_ld_f_vx(ops, x),
        Opcode::LdBVx { x } => emit_ld_b_vx(ops, x),
        Opcode::LdIVx { x } => emit_ld_i_vx(ops, x),
        Opcode::LdVxI { x } => emit_ld_vx_i(ops, x),
    }
}

fn gpr(x: u8) -> i32 {
    (offsets::GPR + x as usize) as i32
}

fn emit_cls(ops: &mut dynasmrt::x64::Assembler) {
    for row in 0..DISPLAY_HEIGHT {
        let off = (offsets::DISPLAY + row * 8) as i32;
        dynasm!(ops; .arch x64; mov QWORD [rbx + off], 0);
    }
}

fn emit_ret(ops: &mut dynasmrt::x64::Assembler) {
    dynasm!(ops
        ; .arch x64
        ; dec BYTE [rbx + offsets::SP as i32]
        ; movzx eax, BYTE [rbx + offsets::SP as i32]
        ; mov cx, WORD [rbx + rax * 2 + offsets::STACK as i32]
        ; mov WORD [rbx + offsets::PC as i32], cx
    );
}

fn emit_jp(ops: &mut dynasmrt::x64::Assembler, nnn: u16) {
    dynasm!(ops; .arch x64; mov WORD [rbx + offsets::PC as i32], nnn as i16);
}

fn emit_call(ops: &mut dynasmrt::x64::Assembler, nnn: u16, return_pc: u16) {
    dynasm!(ops
        ; .arch x64
        ; movzx eax, BYTE [rbx + offsets::SP as i32]
        ; mov WORD [rbx + rax * 2 + offsets::STACK as i32], return_pc as i16
        ; inc BYTE [rbx + offsets::SP as i32]
        ; mov WORD [rbx + offsets::PC as i32], nnn as i16
    );
}

fn emit_se_vx_byte(ops: &mut dynasmrt::x64::Assembler, x: u8, kk: u8, no_skip: u16, skip: u16) {
    dynasm!(ops
        ; .arch x64
        ; mov eax, no_skip as i32
        ; mov ecx, skip as i32
        ; cmp BYTE [rbx + gpr(x)], kk as i8
        ; cmove eax, ecx
        ; mov WORD [rbx + offsets::PC as i32], ax
    );
}

fn emit_sne_vx_byte(ops: &mut dynasmrt::x64::Assembler, x: u8, kk: u8, no_skip: u16, skip: u16) {
    dynasm!(ops
        ; .arch x64
        ; mov eax, no_skip as i32
        ; mov ecx, skip as i32
        ; cmp BYTE [rbx + gpr(x)], kk as i8
        ; cmovne eax, ecx
        ; mov WORD [rbx + offsets::PC as i32], ax
    );
}

fn emit_se_vx_vy(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8, no_skip: u16, skip: u16) {
    dynasm!(ops
        ; .arch x64
        ; mov eax, no_skip as i32
        ; mov ecx, skip as i32
        ; mov dl, BYTE [rbx + gpr(y)]
        ; cmp BYTE [rbx + gpr(x)], dl
        ; cmove eax, ecx
        ; mov WORD [rbx + offsets::PC as i32], ax
    );
}

fn emit_sne_vx_vy(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8, no_skip: u16, skip: u16) {
    dynasm!(ops
        ; .arch x64
        ; mov eax, no_skip as i32
        ; mov ecx, skip as i32
        ; mov dl, BYTE [rbx + gpr(y)]
        ; cmp BYTE [rbx + gpr(x)], dl
        ; cmovne eax, ecx
        ; mov WORD [rbx + offsets::PC as i32], ax
    );
}

fn emit_ld_vx_byte(ops: &mut dynasmrt::x64::Assembler, x: u8, kk: u8) {
    dynasm!(ops; .arch x64; mov BYTE [rbx + gpr(x)], kk as i8);
}

fn emit_add_vx_byte(ops: &mut dynasmrt::x64::Assembler, x: u8, kk: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; add al, kk as i8
        ; mov BYTE [rbx + gpr(x)], al
    );
}

fn emit_ld_vx_vy(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(y)]
        ; mov BYTE [rbx + gpr(x)], al
    );
}

fn emit_or_vx_vy(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; or al, BYTE [rbx + gpr(y)]
        ; mov BYTE [rbx + gpr(x)], al
    );
}

fn emit_and_vx_vy(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; and al, BYTE [rbx + gpr(y)]
        ; mov BYTE [rbx + gpr(x)], al
    );
}

fn emit_xor_vx_vy(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; xor al, BYTE [rbx + gpr(y)]
        ; mov BYTE [rbx + gpr(x)], al
    );
}

fn emit_add_vx_vy(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; add al, BYTE [rbx + gpr(y)]
        ; setc cl
        ; mov BYTE [rbx + gpr(x)], al
        ; mov BYTE [rbx + gpr(0xF)], cl
    );
}

fn emit_sub_vx_vy(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8) {
    // VF = 1 iff Vx > Vy (strictly), computed before the subtraction clobbers Vx.
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; mov dl, BYTE [rbx + gpr(y)]
        ; cmp al, dl
        ; seta cl
        ; sub al, dl
        ; mov BYTE [rbx + gpr(x)], al
        ; mov BYTE [rbx + gpr(0xF)], cl
    );
}

fn emit_shr(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; mov cl, al
        ; and cl, 1
        ; shr al, 1
        ; mov BYTE [rbx + gpr(x)], al
        ; mov BYTE [rbx + gpr(0xF)], cl
    );
}

fn emit_subn(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8) {
    // Vx = Vy - Vx; VF = 1 iff Vy > Vx (strictly), using the pre-subtraction values.
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; mov dl, BYTE [rbx + gpr(y)]
        ; cmp dl, al
        ; seta cl
        ; sub dl, al
        ; mov BYTE [rbx + gpr(x)], dl
        ; mov BYTE [rbx + gpr(0xF)], cl
    );
}

fn emit_shl(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; mov cl, al
        ; shr cl, 7
        ; shl al, 1
        ; mov BYTE [rbx + gpr(x)], al
        ; mov BYTE [rbx + gpr(0xF)], cl
    );
}

fn emit_ld_i_addr(ops: &mut dynasmrt::x64::Assembler, nnn: u16) {
    dynasm!(ops; .arch x64; mov WORD [rbx + offsets::INDEX as i32], nnn as i16);
}

fn emit_jp_v0(ops: &mut dynasmrt::x64::Assembler, nnn: u16) {
    dynasm!(ops
        ; .arch x64
        ; movzx eax, BYTE [rbx + gpr(0)]
        ; add ax, nnn as i16
        ; mov WORD [rbx + offsets::PC as i32], ax
    );
}

fn emit_skp(ops: &mut dynasmrt::x64::Assembler, x: u8, no_skip: u16, skip: u16) {
    dynasm!(ops
        ; .arch x64
        ; movzx eax, BYTE [rbx + gpr(x)]
        ; and eax, 0xF
        ; movzx ecx, BYTE [rbx + rax + offsets::KEY_STATE as i32]
        ; mov edx, no_skip as i32
        ; mov esi, skip as i32
        ; test cl, cl
        ; cmovnz edx, esi
        ; mov WORD [rbx + offsets::PC as i32], dx
    );
}

fn emit_sknp(ops: &mut dynasmrt::x64::Assembler, x: u8, no_skip: u16, skip: u16) {
    dynasm!(ops
        ; .arch x64
        ; movzx eax, BYTE [rbx + gpr(x)]
        ; and eax, 0xF
        ; movzx ecx, BYTE [rbx + rax + offsets::KEY_STATE as i32]
        ; mov edx, no_skip as i32
        ; mov esi, skip as i32
        ; test cl, cl
        ; cmovz edx, esi
        ; mov WORD [rbx + offsets::PC as i32], dx
    );
}

fn emit_ld_vx_dt(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + offsets::DELAY as i32]
        ; mov BYTE [rbx + gpr(x)], al
    );
}

fn emit_ld_dt_vx(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; mov BYTE [rbx + offsets::DELAY as i32], al
    );
}

fn emit_ld_st_vx(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov al, BYTE [rbx + gpr(x)]
        ; mov BYTE [rbx + offsets::SOUND as i32], al
    );
}

fn emit_add_i_vx(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; movzx eax, BYTE [rbx + gpr(x)]
        ; add WORD [rbx + offsets::INDEX as i32], ax
    );
}

fn emit_ld_f_vx(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; movzx eax, BYTE [rbx + gpr(x)]
        ; imul eax, eax, crate::font::CHAR_SIZE as i32
        ; mov WORD [rbx + offsets::INDEX as i32], ax
    );
}

// --- thunked opcodes --------------------------------------------------------
//
// These five opcodes either need a host RNG, perform a multi-byte memory blit,
// or (LDVxK) scan all sixteen keys and conditionally rewind `pc` - cheaper and
// far less error-prone to hand off to Rust than to inline. This is exactly what
// the block prologue's scratch frame exists for.

extern "sysv64" fn rnd_thunk(core: *mut CoreState, x: u8, kk: u8) {
    use rand::Rng;
    let core = unsafe { &mut *core };
    let byte: u8 = rand::thread_rng().gen();
    core.gpr[x as usize] = byte & kk;
}

extern "sysv64" fn drw_thunk(core: *mut CoreState, x: u8, y: u8, n: u8) {
    let core = unsafe { &mut *core };
    crate::interpreter::op_drw_for_recompiler(core, x, y, n);
}

extern "sysv64" fn ld_vx_k_thunk(core: *mut CoreState, x: u8, pc_after: u16) {
    let core = unsafe { &mut *core };
    match core.first_pressed_key() {
        Some(key) => {
            core.gpr[x as usize] = key;
            core.pc = pc_after;
        }
        None => core.pc = pc_after.wrapping_sub(2),
    }
}

extern "sysv64" fn ld_b_vx_thunk(core: *mut CoreState, block_table: *mut BlockTable, x: u8) {
    let core = unsafe { &mut *core };
    let table = unsafe { &mut *block_table };
    let value = core.gpr[x as usize];
    let index = core.index as usize;
    core.ram[index] = value / 100;
    core.ram[index + 1] = (value / 10) % 10;
    core.ram[index + 2] = value % 10;
    table.invalidate_range(core.index, 3);
}

extern "sysv64" fn ld_i_vx_thunk(core: *mut CoreState, block_table: *mut BlockTable, x: u8) {
    let core = unsafe { &mut *core };
    let table = unsafe { &mut *block_table };
    let index = core.index as usize;
    for i in 0..=(x as usize) {
        core.ram[index + i] = core.gpr[i];
    }
    table.invalidate_range(core.index, x as u16 + 1);
}

extern "sysv64" fn ld_vx_i_thunk(core: *mut CoreState, x: u8) {
    let core = unsafe { &mut *core };
    let index = core.index as usize;
    for i in 0..=(x as usize) {
        core.gpr[i] = core.ram[index + i];
    }
}

fn emit_rnd(ops: &mut dynasmrt::x64::Assembler, x: u8, kk: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov rdi, rbx
        ; mov esi, x as i32
        ; mov edx, kk as i32
        ; mov rax, QWORD rnd_thunk as i64
        ; call rax
    );
}

fn emit_drw(ops: &mut dynasmrt::x64::Assembler, x: u8, y: u8, n: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov rdi, rbx
        ; mov esi, x as i32
        ; mov edx, y as i32
        ; mov ecx, n as i32
        ; mov rax, QWORD drw_thunk as i64
        ; call rax
    );
}

fn emit_ld_vx_k(ops: &mut dynasmrt::x64::Assembler, x: u8, pc_after: u16) {
    dynasm!(ops
        ; .arch x64
        ; mov rdi, rbx
        ; mov esi, x as i32
        ; mov edx, pc_after as i32
        ; mov rax, QWORD ld_vx_k_thunk as i64
        ; call rax
    );
}

fn emit_ld_b_vx(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov rdi, rbx
        ; mov rsi, r12
        ; mov edx, x as i32
        ; mov rax, QWORD ld_b_vx_thunk as i64
        ; call rax
    );
}

fn emit_ld_i_vx(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov rdi, rbx
        ; mov rsi, r12
        ; mov edx, x as i32
        ; mov rax, QWORD ld_i_vx_thunk as i64
        ; call rax
    );
}

fn emit_ld_vx_i(ops: &mut dynasmrt::x64::Assembler, x: u8) {
    dynasm!(ops
        ; .arch x64
        ; mov rdi, rbx
        ; mov esi, x as i32
        ; mov rax, QWORD ld_vx_i_thunk as i64
        ; call rax
    );
}

#[allow(dead_code)]
const _ASSERT_STACK_DEPTH_FITS_BYTE_INDEX: () = assert!(STACK_DEPTH <= 256);
