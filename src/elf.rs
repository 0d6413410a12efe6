//! On-disk ELF records for both bit-classes, plus size helpers. Host and
//! target endianness are assumed equal (LSB output on LSB hosts), so records
//! are written in native byte order.

use bytemuck::Pod;
use bytemuck::Zeroable;

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct FileHeader64 {
    pub(crate) ident: [u8; 16],
    pub(crate) ty: u16,
    pub(crate) machine: u16,
    pub(crate) version: u32,
    pub(crate) entry: u64,
    pub(crate) phoff: u64,
    pub(crate) shoff: u64,
    pub(crate) flags: u32,
    pub(crate) ehsize: u16,
    pub(crate) phentsize: u16,
    pub(crate) phnum: u16,
    pub(crate) shentsize: u16,
    pub(crate) shnum: u16,
    pub(crate) shstrndx: u16,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct FileHeader32 {
    pub(crate) ident: [u8; 16],
    pub(crate) ty: u16,
    pub(crate) machine: u16,
    pub(crate) version: u32,
    pub(crate) entry: u32,
    pub(crate) phoff: u32,
    pub(crate) shoff: u32,
    pub(crate) flags: u32,
    pub(crate) ehsize: u16,
    pub(crate) phentsize: u16,
    pub(crate) phnum: u16,
    pub(crate) shentsize: u16,
    pub(crate) shnum: u16,
    pub(crate) shstrndx: u16,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct ProgramHeader64 {
    pub(crate) ty: u32,
    pub(crate) flags: u32,
    pub(crate) offset: u64,
    pub(crate) vaddr: u64,
    pub(crate) paddr: u64,
    pub(crate) filesz: u64,
    pub(crate) memsz: u64,
    pub(crate) align: u64,
}

/// Note the different field order relative to the 64-bit record.
#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct ProgramHeader32 {
    pub(crate) ty: u32,
    pub(crate) offset: u32,
    pub(crate) vaddr: u32,
    pub(crate) paddr: u32,
    pub(crate) filesz: u32,
    pub(crate) memsz: u32,
    pub(crate) flags: u32,
    pub(crate) align: u32,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct SectionHeader64 {
    pub(crate) name: u32,
    pub(crate) ty: u32,
    pub(crate) flags: u64,
    pub(crate) addr: u64,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) link: u32,
    pub(crate) info: u32,
    pub(crate) addralign: u64,
    pub(crate) entsize: u64,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct SectionHeader32 {
    pub(crate) name: u32,
    pub(crate) ty: u32,
    pub(crate) flags: u32,
    pub(crate) addr: u32,
    pub(crate) offset: u32,
    pub(crate) size: u32,
    pub(crate) link: u32,
    pub(crate) info: u32,
    pub(crate) addralign: u32,
    pub(crate) entsize: u32,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct SymtabEntry64 {
    pub(crate) name: u32,
    pub(crate) info: u8,
    pub(crate) other: u8,
    pub(crate) shndx: u16,
    pub(crate) value: u64,
    pub(crate) size: u64,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct SymtabEntry32 {
    pub(crate) name: u32,
    pub(crate) value: u32,
    pub(crate) size: u32,
    pub(crate) info: u8,
    pub(crate) other: u8,
    pub(crate) shndx: u16,
}

pub(crate) fn ehdr_size(bitclass: u32) -> u64 {
    if bitclass == 32 {
        core::mem::size_of::<FileHeader32>() as u64
    } else {
        core::mem::size_of::<FileHeader64>() as u64
    }
}

pub(crate) fn phdr_size(bitclass: u32) -> u64 {
    if bitclass == 32 {
        core::mem::size_of::<ProgramHeader32>() as u64
    } else {
        core::mem::size_of::<ProgramHeader64>() as u64
    }
}

pub(crate) fn shdr_size(bitclass: u32) -> u64 {
    if bitclass == 32 {
        core::mem::size_of::<SectionHeader32>() as u64
    } else {
        core::mem::size_of::<SectionHeader64>() as u64
    }
}

pub(crate) fn sym_size(bitclass: u32) -> u64 {
    if bitclass == 32 {
        core::mem::size_of::<SymtabEntry32>() as u64
    } else {
        core::mem::size_of::<SymtabEntry64>() as u64
    }
}

pub(crate) fn dyn_size(bitclass: u32) -> u64 {
    if bitclass == 32 {
        8
    } else {
        16
    }
}

/// Copies a record into an output buffer at the given offset.
pub(crate) fn write_pod<T: Pod>(out: &mut [u8], offset: usize, value: &T) {
    let bytes = bytemuck::bytes_of(value);
    out[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Appends one Elf{32,64}_Dyn record.
pub(crate) fn push_dyn(out: &mut Vec<u8>, bitclass: u32, tag: u32, value: u64) {
    if bitclass == 32 {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&u64::from(tag).to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
}
