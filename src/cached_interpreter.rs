//! The middle execution tier: blocks are discovered with exactly the same
//! page/terminator/SMC-store policy as the [recompiler](crate::recompiler), but
//! each opcode compiles to a native call back into the pure [interpreter], rather
//! than to inlined arithmetic. This shares the [CodeCache]/[BlockTable] design
//! with the full recompiler while falling back to the interpreter's reference
//! semantics for every opcode, which makes it a useful correctness oracle for the
//! recompiler's per-opcode emitters and a cheap tier to fall back to if codegen
//! for a new opcode hasn't landed yet.

use crate::block_table::{BlockTable, PAGE_SIZE};
use crate::cache::CodeCache;
use crate::core_state::CoreState;
use crate::decode::Opcode;
use crate::error::Error;
use crate::interpreter;
use dynasmrt::{dynasm, DynasmApi};

#[cfg(test)]
mod tests;

/// Signature every compiled cached-interpreter block is entered with, identical
/// to [recompiler::BlockFn](crate::recompiler::BlockFn).
pub type BlockFn = extern "sysv64" fn(core: *mut CoreState, block_table: *mut BlockTable) -> u32;

/// Compiles the block starting at `core.pc`, installing it in `cache`/`block_table`
/// and returning its entry point.
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
    loop {
        let op = core.fetch_opcode(dynarec_pc);
        let opcode = Opcode::decode(op, dynarec_pc)?;
        cycles += 1;
        let is_terminator = opcode.is_terminator();
        emit_step_call(&mut ops);
        if let Some(len) = smc_store_len(opcode) {
            emit_invalidate_call(&mut ops, len);
        }
        dynarec_pc = dynarec_pc.wrapping_add(2);

        if is_terminator {
            break;
        }
        if (dynarec_pc as usize) & (PAGE_SIZE - 1) == 0 {
            break;
        }
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

/// Returns the number of bytes a store opcode writes at `index`, for opcodes
/// whose store may overlap resident code.
fn smc_store_len(opcode: Opcode) -> Option<u16> {
    match opcode {
        Opcode::LdBVx { .. } => Some(3),
        Opcode::LdIVx { x } => Some(x as u16 + 1),
        _ => None,
    }
}

fn emit_prologue(ops: &mut dynasmrt::x64::Assembler) {
    dynasm!(ops
        ; .arch x64
        ; push rbx
        ; push r12
        ; sub rsp, 40
        ; mov rbx, rdi // rbx = CoreState*
        ; mov r12, rsi // r12 = BlockTable*
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

extern "sysv64" fn step_thunk(core: *mut CoreState) {
    let core = unsafe { &mut *core };
    // The opcode at `core.pc` was already validated by `Opcode::decode` at compile
    // time, so a decode failure here would mean the guest self-modified between
    // compile and run without going through the SMC invalidation path - a bug in
    // the caller, not a condition this tier retries on.
    interpreter::step(core).expect("opcode decoded at compile time but not at run time");
}

extern "sysv64" fn invalidate_thunk(core: *mut CoreState, block_table: *mut BlockTable, len: u16) {
    let core = unsafe { &*core };
    let table = unsafe { &mut *block_table };
    table.invalidate_range(core.index, len);
}

fn emit_step_call(ops: &mut dynasmrt::x64::Assembler) {
    dynasm!(ops
        ; .arch x64
        ; mov rdi, rbx
        ; mov rax, QWORD step_thunk as i64
        ; call rax
    );
}

fn emit_invalidate_call(ops: &mut dynasmrt::x64::Assembler, len: u16) {
    dynasm!(ops
        ; .arch x64
        ; mov rdi, rbx
        ; mov rsi, r12
        ; mov edx, len as i32
        ; mov rax, QWORD invalidate_thunk as i64
        ; call rax
    );
}
