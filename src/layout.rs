//! Orders output sections and pins their file offsets. The order is a fixed
//! bucket ladder; within a bucket, first-created wins. Offsets start after a
//! fixed reservation for the file header and ten program-header slots.

use crate::arch::TargetBackend;
use crate::context::LDSection;
use crate::context::OutSectionId;
use crate::context::OutputContext;
use crate::context::SectionKind;
use crate::elf;
use crate::error::Result;
use itertools::Itertools;

pub(crate) const SHO_NULL: u32 = 0;
pub(crate) const SHO_INTERP: u32 = 1;
pub(crate) const SHO_INIT: u32 = 2;
pub(crate) const SHO_TEXT: u32 = 3;
pub(crate) const SHO_FINI: u32 = 4;
pub(crate) const SHO_RO: u32 = 5;
pub(crate) const SHO_RELRO: u32 = 6;
pub(crate) const SHO_DATA: u32 = 7;
pub(crate) const SHO_BSS: u32 = 8;
pub(crate) const SHO_NAMEPOOL: u32 = 9;
pub(crate) const SHO_REL_PLT: u32 = 10;
pub(crate) const SHO_RELOCATION: u32 = 11;
pub(crate) const SHO_TARGET: u32 = 12;
pub(crate) const SHO_UNDEFINED: u32 = u32::MAX;

/// Number of program-header slots reserved between the file header and the
/// first section, whether or not they're all used.
pub(crate) const PHDR_RESERVATION_SLOTS: u64 = 10;

pub(crate) struct Layout {
    /// Retained output sections in placement order. Sections not listed here
    /// were empty and are not emitted.
    pub(crate) order: Vec<OutSectionId>,
    /// `.shstrtab` offsets, indexed by raw output-section id.
    pub(crate) sh_name_offsets: Vec<u32>,
    pub(crate) shstrtab_bytes: Vec<u8>,
    /// File offset where section content begins: Ehdr plus the 10-slot
    /// program-header reservation.
    pub(crate) header_reservation: u64,
    /// File offset of the section-header table.
    pub(crate) shoff: u64,
    pub(crate) file_size: u64,
}

/// The placement bucket for one section.
pub(crate) fn section_order(section: &LDSection, backend: &dyn TargetBackend) -> u32 {
    if section.kind == SectionKind::Null {
        return SHO_NULL;
    }
    // Sections that don't go into memory are laid out at the last possible
    // moment.
    if !section.is_alloc() {
        return SHO_UNDEFINED;
    }

    match section.kind {
        SectionKind::Regular => {
            if section.flags & u64::from(object::elf::SHF_EXECINSTR) != 0 {
                match section.name.as_str() {
                    ".init" => SHO_INIT,
                    ".fini" => SHO_FINI,
                    _ => SHO_TEXT,
                }
            } else if !section.is_writable() {
                SHO_RO
            } else if matches!(
                section.ty,
                object::elf::SHT_PREINIT_ARRAY
                    | object::elf::SHT_INIT_ARRAY
                    | object::elf::SHT_FINI_ARRAY
            ) || section.name == ".ctors"
                || section.name == ".dtors"
            {
                SHO_RELRO
            } else {
                SHO_DATA
            }
        }
        SectionKind::Bss => SHO_BSS,
        SectionKind::NamePool => {
            if section.name == ".dynamic" {
                SHO_RELRO
            } else {
                SHO_NAMEPOOL
            }
        }
        SectionKind::Relocation => {
            if section.name.contains("plt") {
                SHO_REL_PLT
            } else {
                SHO_RELOCATION
            }
        }
        SectionKind::Target => backend.target_section_order(section),
        // .interp arrives as an allocated note.
        SectionKind::Note => SHO_INTERP,
        SectionKind::Null | SectionKind::MetaData | SectionKind::Debug => SHO_UNDEFINED,
    }
}

pub(crate) fn align_to(value: u64, align: u64) -> u64 {
    let align = align.max(1);
    value.div_ceil(align) * align
}

/// Orders sections, builds `.shstrtab`, assigns file offsets and output
/// indices, and picks the section-header table location.
pub(crate) fn compute(ctx: &mut OutputContext, backend: &dyn TargetBackend) -> Result<Layout> {
    let bitclass = backend.bitclass();
    let header_reservation =
        elf::ehdr_size(bitclass) + PHDR_RESERVATION_SLOTS * elf::phdr_size(bitclass);

    // Empty sections are dropped, except the null header which anchors the
    // section table.
    let retained: Vec<OutSectionId> = ctx
        .section_ids()
        .filter(|&id| {
            let section = ctx.section(id);
            section.kind == SectionKind::Null
                || section.size > 0
                || section.name == ".shstrtab"
        })
        .collect();

    let order: Vec<OutSectionId> = retained
        .iter()
        .copied()
        .sorted_by_key(|&id| section_order(ctx.section(id), backend))
        .collect();

    // Section names, leading NUL first. Offsets are recorded for every raw id
    // so lookups don't have to go through the order list.
    let mut shstrtab_bytes = vec![0u8];
    let mut sh_name_offsets = vec![0u32; ctx.sections.len()];
    for &id in &order {
        let section = ctx.section(id);
        if section.name.is_empty() {
            continue;
        }
        sh_name_offsets[id.as_usize()] = shstrtab_bytes.len() as u32;
        shstrtab_bytes.extend_from_slice(section.name.as_bytes());
        shstrtab_bytes.push(0);
    }
    {
        let shstrtab = ctx
            .find_section(".shstrtab")
            .expect("file format init always creates .shstrtab");
        ctx.section_mut(shstrtab).size = shstrtab_bytes.len() as u64;
    }

    let mut cursor = header_reservation;
    for (position, &id) in order.iter().enumerate() {
        let section = ctx.section_mut(id);
        section.index = position as u32;
        if section.kind == SectionKind::Null {
            continue;
        }
        let offset = align_to(cursor, section.align);
        section.offset = offset;
        if section.has_file_data() {
            cursor = offset + section.size;
        }
    }

    let shoff = align_to(cursor, 8);
    let file_size = shoff + order.len() as u64 * elf::shdr_size(bitclass);
    Ok(Layout {
        order,
        sh_name_offsets,
        shstrtab_bytes,
        header_reservation,
        shoff,
        file_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::LinkerConfig;
    use crate::file_format::FileFormat;
    use crate::x86_64::X86_64;
    use object::elf as oelf;

    fn section(name: &str, kind: SectionKind, ty: u32, flags: u64) -> LDSection {
        LDSection::new(name, kind, ty, flags).with_size(0x10, 8)
    }

    #[test]
    fn bucket_ladder_orders_sections() {
        let backend = X86_64;
        let aw = u64::from(oelf::SHF_ALLOC | oelf::SHF_WRITE);
        let ax = u64::from(oelf::SHF_ALLOC | oelf::SHF_EXECINSTR);
        let a = u64::from(oelf::SHF_ALLOC);
        let cases = [
            (section(".text", SectionKind::Regular, oelf::SHT_PROGBITS, ax), SHO_TEXT),
            (section(".init", SectionKind::Regular, oelf::SHT_PROGBITS, ax), SHO_INIT),
            (section(".rodata", SectionKind::Regular, oelf::SHT_PROGBITS, a), SHO_RO),
            (section(".ctors", SectionKind::Regular, oelf::SHT_PROGBITS, aw), SHO_RELRO),
            (
                section(".init_array", SectionKind::Regular, oelf::SHT_INIT_ARRAY, aw),
                SHO_RELRO,
            ),
            (section(".dynamic", SectionKind::NamePool, oelf::SHT_DYNAMIC, aw), SHO_RELRO),
            (section(".data", SectionKind::Regular, oelf::SHT_PROGBITS, aw), SHO_DATA),
            (section(".bss", SectionKind::Bss, oelf::SHT_NOBITS, aw), SHO_BSS),
            (section(".dynsym", SectionKind::NamePool, oelf::SHT_DYNSYM, a), SHO_NAMEPOOL),
            (section(".rela.plt", SectionKind::Relocation, oelf::SHT_RELA, a), SHO_REL_PLT),
            (section(".rela.dyn", SectionKind::Relocation, oelf::SHT_RELA, a), SHO_RELOCATION),
            (section(".interp", SectionKind::Note, oelf::SHT_PROGBITS, a), SHO_INTERP),
            // Non-alloc sinks regardless of kind.
            (section(".symtab", SectionKind::NamePool, oelf::SHT_SYMTAB, 0), SHO_UNDEFINED),
            (section(".debug_info", SectionKind::Debug, oelf::SHT_PROGBITS, 0), SHO_UNDEFINED),
        ];
        for (section, expected) in cases {
            assert_eq!(section_order(&section, &backend), expected, "{}", section.name);
        }
    }

    #[test]
    fn offsets_start_after_header_reservation() {
        let mut ctx = OutputContext::new();
        let config = LinkerConfig::default();
        FileFormat::init(&mut ctx, &config, false).unwrap();
        let text = ctx.add_section(
            LDSection::new(".text", SectionKind::Regular, oelf::SHT_PROGBITS,
                u64::from(oelf::SHF_ALLOC | oelf::SHF_EXECINSTR))
            .with_data(vec![0x90; 32], 16),
        );
        // Give the name pools a size so they're retained.
        let symtab = ctx.find_section(".symtab").unwrap();
        ctx.section_mut(symtab).size = 24;
        let strtab = ctx.find_section(".strtab").unwrap();
        ctx.section_mut(strtab).size = 1;

        let mut backend = X86_64;
        let layout = compute(&mut ctx, &mut backend).unwrap();
        // 64-bit: 64-byte Ehdr + 10 * 56-byte Phdr slots.
        assert_eq!(layout.header_reservation, 64 + 10 * 56);
        assert_eq!(ctx.section(text).offset, 64 + 10 * 56);
        // .text sorts before the non-alloc name pools.
        assert!(ctx.section(text).index < ctx.section(symtab).index);
        assert_eq!(layout.order[0].as_usize(), 0);
        assert!(layout.shoff >= layout.header_reservation);
        assert_eq!(
            layout.file_size,
            layout.shoff + layout.order.len() as u64 * 64
        );
    }

    #[test]
    fn empty_sections_are_dropped() {
        let mut ctx = OutputContext::new();
        let config = LinkerConfig::default();
        FileFormat::init(&mut ctx, &config, false).unwrap();
        let empty_bss = ctx.add_section(LDSection::new(
            ".bss",
            SectionKind::Bss,
            oelf::SHT_NOBITS,
            u64::from(oelf::SHF_ALLOC | oelf::SHF_WRITE),
        ));
        let symtab = ctx.find_section(".symtab").unwrap();
        ctx.section_mut(symtab).size = 24;
        let strtab = ctx.find_section(".strtab").unwrap();
        ctx.section_mut(strtab).size = 1;
        let mut backend = X86_64;
        let layout = compute(&mut ctx, &mut backend).unwrap();
        assert!(!layout.order.contains(&empty_bss));
        let names: Vec<u8> = layout.shstrtab_bytes.clone();
        assert!(!String::from_utf8_lossy(&names).contains(".bss"));
    }
}
