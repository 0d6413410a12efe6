//! Maps input section names to output sections. Matching is by name prefix,
//! earliest mapping wins, so the pre-configured table stays authoritative over
//! mappings learned from inputs.

use crate::context::LDSection;
use crate::context::OutSectionId;
use crate::context::OutputContext;
use crate::context::SectionKind;
use crate::error::ErrorKind;
use crate::error::LinkError;
use crate::error::Result;
use ahash::AHashMap;
use anyhow::bail;
use object::elf;

struct NameSectPair {
    input_prefix: String,
    output: OutSectionId,
}

pub(crate) struct SectionMerger {
    mappings: Vec<NameSectPair>,
    /// Exact prefixes already mapped, for duplicate detection.
    seen: AHashMap<String, OutSectionId>,
}

const SHF_A: u64 = elf::SHF_ALLOC as u64;
const SHF_AW: u64 = (elf::SHF_ALLOC | elf::SHF_WRITE) as u64;
const SHF_AX: u64 = (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64;
const SHF_AWT: u64 = (elf::SHF_ALLOC | elf::SHF_WRITE | elf::SHF_TLS) as u64;

/// The standard input-prefix to output-section table. Order matters: a prefix
/// must come before any of its own prefixes (".init_array" before ".init").
const STD_SECTION_MAP: &[(&str, &str, SectionKind, u32, u64)] = &[
    (".text", ".text", SectionKind::Regular, elf::SHT_PROGBITS, SHF_AX),
    (".rodata", ".rodata", SectionKind::Regular, elf::SHT_PROGBITS, SHF_A),
    (".data.rel.ro", ".data.rel.ro", SectionKind::Regular, elf::SHT_PROGBITS, SHF_AW),
    (".data", ".data", SectionKind::Regular, elf::SHT_PROGBITS, SHF_AW),
    (".bss", ".bss", SectionKind::Bss, elf::SHT_NOBITS, SHF_AW),
    (".tdata", ".tdata", SectionKind::Regular, elf::SHT_PROGBITS, SHF_AWT),
    (".tbss", ".tbss", SectionKind::Bss, elf::SHT_NOBITS, SHF_AWT),
    (".preinit_array", ".preinit_array", SectionKind::Regular, elf::SHT_PREINIT_ARRAY, SHF_AW),
    (".init_array", ".init_array", SectionKind::Regular, elf::SHT_INIT_ARRAY, SHF_AW),
    (".fini_array", ".fini_array", SectionKind::Regular, elf::SHT_FINI_ARRAY, SHF_AW),
    (".ctors", ".ctors", SectionKind::Regular, elf::SHT_PROGBITS, SHF_AW),
    (".dtors", ".dtors", SectionKind::Regular, elf::SHT_PROGBITS, SHF_AW),
    (".init", ".init", SectionKind::Regular, elf::SHT_PROGBITS, SHF_AX),
    (".fini", ".fini", SectionKind::Regular, elf::SHT_PROGBITS, SHF_AX),
    (".eh_frame", ".eh_frame", SectionKind::Regular, elf::SHT_PROGBITS, SHF_A),
    (".gcc_except_table", ".gcc_except_table", SectionKind::Regular, elf::SHT_PROGBITS, SHF_A),
    (".note", ".note", SectionKind::Note, elf::SHT_NOTE, 0),
    (".debug", ".debug", SectionKind::Debug, elf::SHT_PROGBITS, 0),
    (".comment", ".comment", SectionKind::MetaData, elf::SHT_PROGBITS, 0),
];

impl SectionMerger {
    pub(crate) fn new() -> SectionMerger {
        SectionMerger {
            mappings: Vec::new(),
            seen: AHashMap::new(),
        }
    }

    /// Seeds the standard map, creating one (initially empty) output section
    /// per entry. Empty sections are discarded again at layout time.
    pub(crate) fn with_std_map(ctx: &mut OutputContext) -> Result<SectionMerger> {
        let mut merger = SectionMerger::new();
        for &(prefix, out_name, kind, ty, flags) in STD_SECTION_MAP {
            let out = match ctx.find_section(out_name) {
                Some(existing) => existing,
                None => ctx.add_section(LDSection::new(out_name, kind, ty, flags)),
            };
            merger.add_mapping(prefix, out)?;
        }
        Ok(merger)
    }

    /// Returns the output section for an input section name: the first mapping
    /// whose prefix matches, in insertion order.
    pub(crate) fn find(&self, name: &str) -> Option<OutSectionId> {
        self.mappings
            .iter()
            .find(|pair| name.starts_with(pair.input_prefix.as_str()))
            .map(|pair| pair.output)
    }

    /// Appends a mapping at the end of the list, so pre-configured prefixes
    /// keep priority. Adding the exact same substring twice is an error.
    pub(crate) fn add_mapping(&mut self, prefix: &str, output: OutSectionId) -> Result {
        if self.seen.contains_key(prefix) {
            bail!(LinkError::new(
                ErrorKind::DuplicateSectionMapping,
                format!("section mapping for `{prefix}` added twice"),
                prefix,
            ));
        }
        self.seen.insert(prefix.to_owned(), output);
        self.mappings.push(NameSectPair {
            input_prefix: prefix.to_owned(),
            output,
        });
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.mappings.len()
    }
}
