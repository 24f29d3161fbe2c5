use super::*;
use crate::core_state::CoreState;
use std::mem;

fn compile_and_run(core: &mut CoreState) -> u32 {
    let mut cache = CodeCache::new().unwrap();
    let mut table = BlockTable::new();
    let entry = compile_block(core, &mut cache, &mut table).unwrap();
    let block: BlockFn = unsafe { mem::transmute(entry) };
    block(core as *mut CoreState, &mut table as *mut BlockTable)
}

#[test]
fn test_block_falls_through_to_page_boundary_via_interpreter_calls() {
    let mut core = CoreState::new();
    core.pc = 0x200;
    core.ram[0x200..0x208].copy_from_slice(&[
        0x60, 0x01, // LD V0, 0x01
        0x70, 0x02, // ADD V0, 0x02
        0x61, 0x03, // LD V1, 0x03
        0x71, 0x04, // ADD V1, 0x04
    ]);
    let cycles = compile_and_run(&mut core);
    assert_eq!(cycles, 4);
    assert_eq!(core.gpr[0], 0x03);
    assert_eq!(core.gpr[1], 0x07);
    assert_eq!(core.pc, 0x208);
}

#[test]
fn test_block_terminates_on_skip() {
    let mut core = CoreState::new();
    core.pc = 0x200;
    core.gpr[2] = 5;
    core.ram[0x200] = 0x32; // SE V2, 0x05
    core.ram[0x201] = 0x05;
    let cycles = compile_and_run(&mut core);
    assert_eq!(cycles, 1);
    assert_eq!(core.pc, 0x204);
}

#[test]
fn test_smc_via_ld_b_vx_invalidates_resident_page() {
    let mut core = CoreState::new();
    core.pc = 0x200;
    core.index = 0x200; // BCD digits land right on top of this block's own page
    core.gpr[0] = 234;
    core.ram[0x200] = 0xF0; // LD B, V0
    core.ram[0x201] = 0x33;
    core.ram[0x202] = 0x12; // JP 0x202 - terminates the block right after the store
    core.ram[0x203] = 0x02;

    let mut cache = CodeCache::new().unwrap();
    let mut table = BlockTable::new();
    let entry = compile_block(&mut core, &mut cache, &mut table).unwrap();
    let block: BlockFn = unsafe { mem::transmute(entry) };
    block(&mut core as *mut CoreState, &mut table as *mut BlockTable);

    assert_eq!(&core.ram[0x200..0x203], &[2, 3, 4]);
    assert_eq!(table.get(0x200), None);
}

#[test]
fn test_ld_vx_k_blocks_by_rewinding_pc_like_the_interpreter() {
    let mut core = CoreState::new();
    core.pc = 0x200;
    core.ram[0x200] = 0xF0;
    core.ram[0x201] = 0x0A; // LD V0, K
    compile_and_run(&mut core);
    assert_eq!(core.pc, 0x200);

    core.key_state[0x3] = true;
    compile_and_run(&mut core);
    assert_eq!(core.gpr[0], 0x3);
    assert_eq!(core.pc, 0x202);
}
