//! Creation of the generated output sections: the static and dynamic name
//! pools, the hash table, `.dynamic` and `.interp`. Backends call in here from
//! their init hooks; creation is single-shot.

use crate::args::LinkerConfig;
use crate::args::OutputKind;
use crate::context::LDSection;
use crate::context::OutSectionId;
use crate::context::OutputContext;
use crate::context::SectionKind;
use crate::error::Result;
use object::elf;

/// Handles to the generated sections of the output file. The dynamic family is
/// absent when the output has no dynamic behavior.
pub struct FileFormat {
    pub(crate) symtab: OutSectionId,
    pub(crate) strtab: OutSectionId,
    pub(crate) shstrtab: OutSectionId,
    pub(crate) dynsym: Option<OutSectionId>,
    pub(crate) dynstr: Option<OutSectionId>,
    pub(crate) hash: Option<OutSectionId>,
    pub(crate) dynamic: Option<OutSectionId>,
}

fn get_or_add(
    ctx: &mut OutputContext,
    name: &str,
    kind: SectionKind,
    ty: u32,
    flags: u64,
) -> OutSectionId {
    match ctx.find_section(name) {
        Some(existing) => existing,
        None => ctx.add_section(LDSection::new(name, kind, ty, flags)),
    }
}

impl FileFormat {
    pub(crate) fn init(
        ctx: &mut OutputContext,
        config: &LinkerConfig,
        needs_dynamic: bool,
    ) -> Result<FileFormat> {
        let alloc = u64::from(elf::SHF_ALLOC);
        let symtab = get_or_add(ctx, ".symtab", SectionKind::NamePool, elf::SHT_SYMTAB, 0);
        let strtab = get_or_add(ctx, ".strtab", SectionKind::NamePool, elf::SHT_STRTAB, 0);
        let shstrtab = get_or_add(ctx, ".shstrtab", SectionKind::NamePool, elf::SHT_STRTAB, 0);

        let mut format = FileFormat {
            symtab,
            strtab,
            shstrtab,
            dynsym: None,
            dynstr: None,
            hash: None,
            dynamic: None,
        };
        if !needs_dynamic {
            return Ok(format);
        }

        format.dynsym = Some(get_or_add(
            ctx,
            ".dynsym",
            SectionKind::NamePool,
            elf::SHT_DYNSYM,
            alloc,
        ));
        format.dynstr = Some(get_or_add(
            ctx,
            ".dynstr",
            SectionKind::NamePool,
            elf::SHT_STRTAB,
            alloc,
        ));
        format.hash = Some(get_or_add(
            ctx,
            ".hash",
            SectionKind::NamePool,
            elf::SHT_HASH,
            alloc,
        ));
        format.dynamic = Some(get_or_add(
            ctx,
            ".dynamic",
            SectionKind::NamePool,
            elf::SHT_DYNAMIC,
            u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
        ));

        // A dynamically-linked executable names its interpreter. The section
        // is looked up by name downstream, as the program-header pass does.
        if config.output_kind == OutputKind::Exec {
            if let Some(interpreter) = &config.dynamic_linker {
                let id = get_or_add(ctx, ".interp", SectionKind::Note, elf::SHT_PROGBITS, alloc);
                let section = ctx.section_mut(id);
                if section.data.is_none() {
                    let mut bytes = interpreter.to_string_lossy().into_owned().into_bytes();
                    bytes.push(0);
                    section.size = bytes.len() as u64;
                    section.data = Some(bytes);
                }
            }
        }
        Ok(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let mut ctx = OutputContext::new();
        let config = LinkerConfig {
            output_kind: OutputKind::DynObj,
            ..Default::default()
        };
        let first = FileFormat::init(&mut ctx, &config, true).unwrap();
        let num_sections = ctx.sections.len();
        let second = FileFormat::init(&mut ctx, &config, true).unwrap();
        assert_eq!(ctx.sections.len(), num_sections);
        assert_eq!(first.symtab, second.symtab);
        assert_eq!(first.dynsym, second.dynsym);
        assert!(ctx.find_section(".interp").is_none());
    }

    #[test]
    fn static_output_has_no_dynamic_family() {
        let mut ctx = OutputContext::new();
        let config = LinkerConfig::default();
        let format = FileFormat::init(&mut ctx, &config, false).unwrap();
        assert!(format.dynsym.is_none());
        assert!(format.dynamic.is_none());
        assert!(ctx.find_section(".symtab").is_some());
        assert!(ctx.find_section(".hash").is_none());
    }
}
