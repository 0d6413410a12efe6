//! Reservation and emission of the `.dynamic` section. Entries are reserved
//! while sizing (so the section size is final before layout), given values
//! once addresses exist, and emitted last. Order is fixed entries first, then
//! DT_NEEDED, then the terminating DT_NULL.

use crate::args::LinkerConfig;
use crate::args::OutputKind;
use crate::elf;
use crate::error::Result;
use anyhow::bail;
use object::elf::{DT_HASH, DT_NEEDED, DT_NULL, DT_SONAME, DT_STRSZ, DT_STRTAB, DT_SYMENT, DT_SYMTAB};

#[derive(Clone, Copy, Debug)]
struct DynEntry {
    tag: u32,
    value: u64,
    applied: bool,
}

#[derive(Default)]
pub(crate) struct ElfDynamic {
    fixed: Vec<DynEntry>,
    reserved_needed: usize,
    /// dynstr offsets of the DT_NEEDED entries, in input order.
    needed: Vec<u64>,
}

impl ElfDynamic {
    pub(crate) fn new() -> ElfDynamic {
        Default::default()
    }

    /// Reserves the fixed entries. DT_SONAME only exists for shared objects;
    /// architecture-requested tags go after the standard block.
    pub(crate) fn reserve_entries(&mut self, config: &LinkerConfig, arch_tags: &[u32]) {
        for tag in [DT_HASH, DT_STRTAB, DT_SYMTAB, DT_STRSZ, DT_SYMENT] {
            self.reserve(tag);
        }
        if config.output_kind == OutputKind::DynObj {
            self.reserve(DT_SONAME);
        }
        for &tag in arch_tags {
            self.reserve(tag);
        }
    }

    fn reserve(&mut self, tag: u32) {
        self.fixed.push(DynEntry {
            tag,
            value: 0,
            applied: false,
        });
    }

    pub(crate) fn reserve_need_entry(&mut self) {
        self.reserved_needed += 1;
    }

    pub(crate) fn num_needed_reserved(&self) -> usize {
        self.reserved_needed
    }

    /// Sets the value of a reserved fixed entry.
    pub(crate) fn apply(&mut self, tag: u32, value: u64) -> Result {
        match self.fixed.iter_mut().find(|e| e.tag == tag && !e.applied) {
            Some(entry) => {
                entry.value = value;
                entry.applied = true;
                Ok(())
            }
            None => bail!("no reserved .dynamic entry for tag {tag:#x}"),
        }
    }

    pub(crate) fn apply_soname(&mut self, dynstr_offset: u64) -> Result {
        self.apply(DT_SONAME, dynstr_offset)
    }

    pub(crate) fn add_needed(&mut self, dynstr_offset: u64) -> Result {
        if self.needed.len() == self.reserved_needed {
            bail!("DT_NEEDED entries exceed the reserved count");
        }
        self.needed.push(dynstr_offset);
        Ok(())
    }

    /// Entry count including the DT_NULL terminator.
    pub(crate) fn num_entries(&self) -> usize {
        self.fixed.len() + self.reserved_needed + 1
    }

    pub(crate) fn num_bytes(&self, bitclass: u32) -> u64 {
        self.num_entries() as u64 * elf::dyn_size(bitclass)
    }

    /// Emits the section bytes. Every reserved slot must be accounted for:
    /// the byte count always matches what was reserved.
    pub(crate) fn emit(&self, bitclass: u32) -> Result<Vec<u8>> {
        if self.needed.len() != self.reserved_needed {
            bail!(
                "reserved {} DT_NEEDED entries but {} were added",
                self.reserved_needed,
                self.needed.len()
            );
        }
        let mut out = Vec::with_capacity(self.num_bytes(bitclass) as usize);
        for entry in &self.fixed {
            elf::push_dyn(&mut out, bitclass, entry.tag, entry.value);
        }
        for &offset in &self.needed {
            elf::push_dyn(&mut out, bitclass, DT_NEEDED, offset);
        }
        elf::push_dyn(&mut out, bitclass, DT_NULL, 0);
        debug_assert_eq!(out.len() as u64, self.num_bytes(bitclass));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynobj_config() -> LinkerConfig {
        LinkerConfig {
            output_kind: OutputKind::DynObj,
            ..Default::default()
        }
    }

    #[test]
    fn reserved_entries_round_trip() {
        let mut dynamic = ElfDynamic::new();
        dynamic.reserve_entries(&dynobj_config(), &[object::elf::DT_PLTGOT]);
        dynamic.reserve_need_entry();
        dynamic.apply(DT_HASH, 0x1000).unwrap();
        dynamic.apply(DT_STRTAB, 0x2000).unwrap();
        dynamic.apply(DT_SYMTAB, 0x3000).unwrap();
        dynamic.apply(DT_STRSZ, 0x55).unwrap();
        dynamic.apply(DT_SYMENT, 24).unwrap();
        dynamic.apply_soname(17).unwrap();
        dynamic.apply(object::elf::DT_PLTGOT, 0x4000).unwrap();
        dynamic.add_needed(1).unwrap();

        let bytes = dynamic.emit(64).unwrap();
        assert_eq!(bytes.len() as u64, dynamic.num_bytes(64));
        // 5 standard + soname + pltgot + 1 needed + null.
        assert_eq!(dynamic.num_entries(), 9);

        let tags: Vec<u64> = bytes
            .chunks_exact(16)
            .map(|c| u64::from_le_bytes(c[..8].try_into().unwrap()))
            .collect();
        let expected: Vec<u64> = [
            DT_HASH,
            DT_STRTAB,
            DT_SYMTAB,
            DT_STRSZ,
            DT_SYMENT,
            DT_SONAME,
            object::elf::DT_PLTGOT,
            DT_NEEDED,
            DT_NULL,
        ]
        .iter()
        .map(|&t| u64::from(t))
        .collect();
        assert_eq!(tags, expected);
        // Each reserved entry appears exactly once.
        for tag in &expected[..expected.len() - 1] {
            assert_eq!(tags.iter().filter(|&t| t == tag).count(), 1);
        }
    }

    #[test]
    fn needed_shortfall_is_rejected() {
        let mut dynamic = ElfDynamic::new();
        dynamic.reserve_entries(&dynobj_config(), &[]);
        dynamic.reserve_need_entry();
        for tag in [DT_HASH, DT_STRTAB, DT_SYMTAB, DT_STRSZ, DT_SYMENT] {
            dynamic.apply(tag, 0).unwrap();
        }
        dynamic.apply_soname(0).unwrap();
        assert!(dynamic.emit(64).is_err());
        dynamic.add_needed(5).unwrap();
        assert!(dynamic.add_needed(6).is_err());
        assert!(dynamic.emit(64).is_ok());
    }

    #[test]
    fn exec_output_has_no_soname() {
        let mut dynamic = ElfDynamic::new();
        dynamic.reserve_entries(&LinkerConfig::default(), &[]);
        assert!(dynamic.apply_soname(0).is_err());
        assert_eq!(dynamic.num_entries(), 6);
    }
}
