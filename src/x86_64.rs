//! The x86-64 ELF backend. Relocation handling is out of scope for the core,
//! so this is just the architecture's constants.

use crate::arch::TargetBackend;

pub struct X86_64;

impl TargetBackend for X86_64 {
    fn name(&self) -> &'static str {
        "elf_x86_64"
    }

    fn bitclass(&self) -> u32 {
        64
    }

    fn pagesize(&self) -> u64 {
        0x1000
    }

    fn machine(&self) -> u16 {
        object::elf::EM_X86_64
    }
}
