//! Sizing and emission of the output file: the static and dynamic name pools,
//! the SVR4 hash table, `.dynamic`, file/program/section headers and input
//! payload bytes. Sizing runs before layout so section sizes are final when
//! offsets are assigned; emission runs after addresses exist.

use crate::arch::TargetBackend;
use crate::args::LinkerConfig;
use crate::args::OutputKind;
use crate::attributes::AttributeFactory;
use crate::context::OutSectionId;
use crate::context::OutputContext;
use crate::context::SectionKind;
use crate::dynamic::ElfDynamic;
use crate::elf;
use crate::error::Result;
use crate::file_format::FileFormat;
use crate::hash::elf_hash;
use crate::input::InputId;
use crate::input::InputKind;
use crate::input::InputTree;
use crate::layout::Layout;
use crate::layout::PHDR_RESERVATION_SLOTS;
use crate::memory_area::MemoryArea;
use crate::program_segments::SegmentFactory;
use crate::symbol::ResolveInfo;
use crate::symbol::SymbolDesc;
use crate::symbol::SymbolType;
use crate::symbol::Visibility;
use crate::symbol_db::SymbolDb;
use anyhow::bail;
use object::elf as oelf;

/// Where an input section's bytes land in the output: which output section,
/// and at what offset within it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    pub(crate) input: InputId,
    pub(crate) section_index: u32,
    pub(crate) out: OutSectionId,
    pub(crate) offset: u64,
}

/// The SVR4 hash bucket ladder (from gold's dynobj.cc).
const HASH_BUCKETS: [u32; 19] = [
    1, 3, 17, 37, 67, 97, 131, 197, 263, 521, 1031, 2053, 4099, 8209, 16411, 32771, 65537, 131101,
    262147,
];

/// Largest ladder entry not exceeding the symbol count, floor of 1. GNU-style
/// hashing wants a minimum of 2 but is not emitted yet.
pub(crate) fn hash_bucket_count(num_symbols: u64, gnu_style: bool) -> u32 {
    let mut result = 1;
    for &bucket in &HASH_BUCKETS {
        if num_symbols < u64::from(bucket) {
            break;
        }
        result = bucket;
    }
    if gnu_style && result < 2 {
        result = 2;
    }
    result
}

/// Whether a symbol goes into `.dynsym`.
pub(crate) fn is_dynamic_symbol(info: &ResolveInfo, output_kind: OutputKind) -> bool {
    // The backend demands it, usually for a dynamic relocation.
    if info.reserved != 0 {
        return true;
    }
    if info.is_local() {
        return false;
    }
    match output_kind {
        // A shared object exports everything externally visible.
        OutputKind::DynObj => matches!(
            info.visibility,
            Visibility::Default | Visibility::Protected
        ),
        // An executable only exports what some shared object refers to.
        OutputKind::Exec => info.dyn_referenced,
        OutputKind::Object | OutputKind::Unknown => false,
    }
}

pub(crate) struct ElfWriter {
    dynamic: ElfDynamic,
    /// DynObj inputs that get a DT_NEEDED entry, decided during sizing and
    /// replayed verbatim during emission.
    needed_inputs: Vec<InputId>,
    /// Total `.dynsym` entries including the reserved null entry.
    dynsym_total: u64,
}

impl ElfWriter {
    pub(crate) fn new() -> ElfWriter {
        ElfWriter {
            dynamic: ElfDynamic::new(),
            needed_inputs: Vec::new(),
            dynsym_total: 0,
        }
    }

    /// Sizes `.symtab`, `.strtab` and, when the output is dynamic, `.dynsym`,
    /// `.dynstr`, `.hash` and `.dynamic`. Must run before layout.
    #[tracing::instrument(skip_all, name = "Size name pools")]
    pub(crate) fn size_name_pools(
        &mut self,
        config: &LinkerConfig,
        inputs: &InputTree,
        attrs: &AttributeFactory,
        db: &SymbolDb,
        ctx: &mut OutputContext,
        format: &FileFormat,
        backend: &dyn TargetBackend,
    ) -> Result {
        let bitclass = backend.bitclass();
        let word_align = u64::from(bitclass / 8);

        let mut symtab = 0u64;
        let mut strtab = 0u64;
        let mut dynsym = 1u64;
        let mut dynstr = 1u64;
        for &sym in &ctx.symbols {
            let info = db.info(sym);
            let str_size = info.name.len() as u64 + 1;
            if format.dynsym.is_some() && is_dynamic_symbol(info, config.output_kind) {
                dynsym += 1;
                dynstr += str_size;
            }
            symtab += 1;
            strtab += str_size;
        }

        {
            let section = ctx.section_mut(format.symtab);
            section.size = symtab * elf::sym_size(bitclass);
            section.entsize = elf::sym_size(bitclass);
            section.align = word_align;
        }
        ctx.section_mut(format.strtab).size = strtab;

        let (Some(dynsym_id), Some(dynstr_id), Some(hash_id), Some(dynamic_id)) =
            (format.dynsym, format.dynstr, format.hash, format.dynamic)
        else {
            return Ok(());
        };

        // DT_NEEDED strings. Rules, in order: --no-add-needed skips the input
        // entirely; --no-as-needed always counts it; --as-needed counts it
        // only if one of its symbols was actually resolved.
        for (input_id, attr_id) in inputs.leaves() {
            let input = inputs.get(input_id);
            if input.kind() != InputKind::DynObj {
                continue;
            }
            let attr = attrs.get(attr_id);
            if !attr.add_needed {
                continue;
            }
            if !attr.as_needed || input.is_needed() {
                dynstr += input.name.len() as u64 + 1;
                self.dynamic.reserve_need_entry();
                self.needed_inputs.push(input_id);
            }
        }

        // Both Elf32_Word and Elf64_Word are 4 bytes.
        let nchain = dynsym;
        let nbucket = u64::from(hash_bucket_count(dynsym - 1, false));
        let hash = (2 + nbucket + nchain) * 4;

        dynstr += config.soname().len() as u64 + 1;

        {
            let section = ctx.section_mut(dynsym_id);
            section.size = dynsym * elf::sym_size(bitclass);
            section.entsize = elf::sym_size(bitclass);
            section.align = word_align;
        }
        ctx.section_mut(dynstr_id).size = dynstr;
        {
            let section = ctx.section_mut(hash_id);
            section.size = hash;
            section.entsize = 4;
            section.align = word_align;
        }

        self.dynamic.reserve_entries(config, backend.dynamic_tags());
        debug_assert_eq!(self.needed_inputs.len(), self.dynamic.num_needed_reserved());
        {
            let section = ctx.section_mut(dynamic_id);
            section.size = self.dynamic.num_bytes(bitclass);
            section.entsize = elf::dyn_size(bitclass);
            section.align = word_align;
        }
        self.dynsym_total = dynsym;
        Ok(())
    }

    /// Emits everything. Layout and segment creation must have run.
    #[tracing::instrument(skip_all, name = "Write output")]
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn emit(
        &mut self,
        config: &LinkerConfig,
        inputs: &InputTree,
        db: &SymbolDb,
        ctx: &OutputContext,
        format: &FileFormat,
        layout: &Layout,
        segments: &SegmentFactory,
        backend: &dyn TargetBackend,
        placements: &[Placement],
        entry_value: u64,
        area: &mut MemoryArea,
    ) -> Result {
        let bitclass = backend.bitclass();
        let phdr_end = elf::ehdr_size(bitclass)
            + segments.num_segments() as u64 * elf::phdr_size(bitclass);
        if phdr_end > layout.header_reservation {
            bail!(
                "{} program headers exceed the fixed {PHDR_RESERVATION_SLOTS}-slot reservation",
                segments.num_segments()
            );
        }
        self.write_file_header(config, ctx, format, layout, segments, backend, entry_value, area)?;
        self.write_program_headers(segments, backend, area)?;
        write_section_payloads(inputs, ctx, layout, placements, area)?;
        self.emit_reg_name_pools(ctx, format, db, backend, area)?;
        self.emit_dyn_name_pools(config, inputs, ctx, format, db, backend, area)?;
        self.write_shstrtab(ctx, format, layout, area)?;
        self.write_section_headers(ctx, format, db, layout, backend, area)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_file_header(
        &self,
        config: &LinkerConfig,
        ctx: &OutputContext,
        format: &FileFormat,
        layout: &Layout,
        segments: &SegmentFactory,
        backend: &dyn TargetBackend,
        entry_value: u64,
        area: &mut MemoryArea,
    ) -> Result {
        let bitclass = backend.bitclass();
        let mut ident = [0u8; 16];
        ident[..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        ident[4] = if bitclass == 32 {
            oelf::ELFCLASS32
        } else {
            oelf::ELFCLASS64
        };
        ident[5] = oelf::ELFDATA2LSB;
        ident[6] = oelf::EV_CURRENT as u8;
        let ty = match config.output_kind {
            OutputKind::DynObj => oelf::ET_DYN,
            _ => oelf::ET_EXEC,
        };
        let shstrndx = ctx.section(format.shstrtab).index as u16;
        let mut region = area.request(0, elf::ehdr_size(bitclass), true)?;
        if bitclass == 32 {
            let header = elf::FileHeader32 {
                ident,
                ty,
                machine: backend.machine(),
                version: oelf::EV_CURRENT.into(),
                entry: entry_value as u32,
                phoff: elf::ehdr_size(32) as u32,
                shoff: layout.shoff as u32,
                flags: 0,
                ehsize: elf::ehdr_size(32) as u16,
                phentsize: elf::phdr_size(32) as u16,
                phnum: segments.num_segments() as u16,
                shentsize: elf::shdr_size(32) as u16,
                shnum: layout.order.len() as u16,
                shstrndx,
            };
            elf::write_pod(&mut region, 0, &header);
        } else {
            let header = elf::FileHeader64 {
                ident,
                ty,
                machine: backend.machine(),
                version: oelf::EV_CURRENT.into(),
                entry: entry_value,
                phoff: elf::ehdr_size(64),
                shoff: layout.shoff,
                flags: 0,
                ehsize: elf::ehdr_size(64) as u16,
                phentsize: elf::phdr_size(64) as u16,
                phnum: segments.num_segments() as u16,
                shentsize: elf::shdr_size(64) as u16,
                shnum: layout.order.len() as u16,
                shstrndx,
            };
            elf::write_pod(&mut region, 0, &header);
        }
        area.sync(region)
    }

    fn write_program_headers(
        &self,
        segments: &SegmentFactory,
        backend: &dyn TargetBackend,
        area: &mut MemoryArea,
    ) -> Result {
        let bitclass = backend.bitclass();
        let entry_size = elf::phdr_size(bitclass);
        let mut region = area.request(
            elf::ehdr_size(bitclass),
            segments.num_segments() as u64 * entry_size,
            true,
        )?;
        for (index, segment) in segments.segments().iter().enumerate() {
            let offset = index * entry_size as usize;
            if bitclass == 32 {
                let phdr = elf::ProgramHeader32 {
                    ty: segment.seg_type,
                    offset: segment.offset as u32,
                    vaddr: segment.vaddr as u32,
                    paddr: segment.paddr as u32,
                    filesz: segment.filesz as u32,
                    memsz: segment.memsz as u32,
                    flags: segment.flags,
                    align: segment.align as u32,
                };
                elf::write_pod(&mut region, offset, &phdr);
            } else {
                let phdr = elf::ProgramHeader64 {
                    ty: segment.seg_type,
                    flags: segment.flags,
                    offset: segment.offset,
                    vaddr: segment.vaddr,
                    paddr: segment.paddr,
                    filesz: segment.filesz,
                    memsz: segment.memsz,
                    align: segment.align,
                };
                elf::write_pod(&mut region, offset, &phdr);
            }
        }
        area.sync(region)
    }

    /// `.symtab` and `.strtab`: every output symbol, strings NUL-terminated
    /// from offset zero (the null symbol's empty name claims the leading NUL).
    fn emit_reg_name_pools(
        &self,
        ctx: &OutputContext,
        format: &FileFormat,
        db: &SymbolDb,
        backend: &dyn TargetBackend,
        area: &mut MemoryArea,
    ) -> Result {
        let bitclass = backend.bitclass();
        let symtab_sect = ctx.section(format.symtab);
        let strtab_sect = ctx.section(format.strtab);
        let mut symtab = area.request(symtab_sect.offset, symtab_sect.size, true)?;
        let mut strtab = area.request(strtab_sect.offset, strtab_sect.size, true)?;

        let mut symtab_idx = 0usize;
        let mut strtabsize = 0usize;
        for &sym in &ctx.symbols {
            let info = db.info(sym);
            write_symbol(
                &mut symtab,
                symtab_idx * elf::sym_size(bitclass) as usize,
                bitclass,
                strtabsize as u32,
                info,
                symbol_shndx(info, ctx, backend),
                backend,
            );
            let name = info.name.bytes();
            strtab[strtabsize..strtabsize + name.len()].copy_from_slice(name);
            symtab_idx += 1;
            strtabsize += name.len() + 1;
        }
        area.sync(symtab)?;
        area.sync(strtab)
    }

    /// `.dynsym`, `.dynstr`, `.hash` and `.dynamic`. The reserved null entry
    /// sits at index 0 and string offsets start at 1.
    fn emit_dyn_name_pools(
        &mut self,
        config: &LinkerConfig,
        inputs: &InputTree,
        ctx: &OutputContext,
        format: &FileFormat,
        db: &SymbolDb,
        backend: &dyn TargetBackend,
        area: &mut MemoryArea,
    ) -> Result {
        let (Some(dynsym_id), Some(dynstr_id), Some(hash_id), Some(dynamic_id)) =
            (format.dynsym, format.dynstr, format.hash, format.dynamic)
        else {
            return Ok(());
        };
        let bitclass = backend.bitclass();
        let dynsym_sect = ctx.section(dynsym_id);
        let dynstr_sect = ctx.section(dynstr_id);
        let hash_sect = ctx.section(hash_id);
        let dynamic_sect = ctx.section(dynamic_id);

        let mut dynsym = area.request(dynsym_sect.offset, dynsym_sect.size, true)?;
        let mut dynstr = area.request(dynstr_sect.offset, dynstr_sect.size, true)?;

        // Index 0 is the all-zero reserved entry; the region starts zeroed.
        let mut symtab_idx = 1usize;
        let mut strtabsize = 1usize;
        let mut dyn_names: Vec<&[u8]> = vec![b""];
        for &sym in &ctx.symbols {
            let info = db.info(sym);
            if !is_dynamic_symbol(info, config.output_kind) {
                continue;
            }
            write_symbol(
                &mut dynsym,
                symtab_idx * elf::sym_size(bitclass) as usize,
                bitclass,
                strtabsize as u32,
                info,
                symbol_shndx(info, ctx, backend),
                backend,
            );
            let name = info.name.bytes();
            dynstr[strtabsize..strtabsize + name.len()].copy_from_slice(name);
            dyn_names.push(name);
            symtab_idx += 1;
            strtabsize += name.len() + 1;
        }
        debug_assert_eq!(symtab_idx as u64, self.dynsym_total);

        // DT_NEEDED names, in the order sizing reserved them.
        for &input_id in &self.needed_inputs {
            let name = inputs.get(input_id).name.as_bytes();
            dynstr[strtabsize..strtabsize + name.len()].copy_from_slice(name);
            self.dynamic.add_needed(strtabsize as u64)?;
            strtabsize += name.len() + 1;
        }

        // The output's own name backs DT_SONAME.
        if config.output_kind == OutputKind::DynObj {
            self.dynamic.apply_soname(strtabsize as u64)?;
        }
        let soname = config.soname();
        dynstr[strtabsize..strtabsize + soname.len()].copy_from_slice(soname.as_bytes());

        self.dynamic.apply(oelf::DT_HASH, hash_sect.addr)?;
        self.dynamic.apply(oelf::DT_STRTAB, dynstr_sect.addr)?;
        self.dynamic.apply(oelf::DT_SYMTAB, dynsym_sect.addr)?;
        self.dynamic.apply(oelf::DT_STRSZ, dynstr_sect.size)?;
        self.dynamic.apply(oelf::DT_SYMENT, elf::sym_size(bitclass))?;
        let dynamic_bytes = self.dynamic.emit(bitclass)?;
        let mut dynamic = area.request(dynamic_sect.offset, dynamic_sect.size, true)?;
        dynamic[..dynamic_bytes.len()].copy_from_slice(&dynamic_bytes);

        // SVR4 hash: [nbucket][nchain][buckets][chains], all 32-bit words.
        let mut hash = area.request(hash_sect.offset, hash_sect.size, true)?;
        let nchain = symtab_idx as u32;
        let nbucket = hash_bucket_count(symtab_idx as u64 - 1, false);
        let word =
            |buf: &[u8], i: usize| u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        let set_word = |buf: &mut [u8], i: usize, value: u32| {
            buf[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        };
        set_word(&mut hash, 0, nbucket);
        set_word(&mut hash, 1, nchain);
        // The bucket array must be fully zeroed before insertion; the region
        // starts that way. Insert every dynsym index, null entry included.
        let bucket_base = 2usize;
        let chain_base = bucket_base + nbucket as usize;
        for (index, name) in dyn_names.iter().enumerate() {
            let pos = (elf_hash(name) % nbucket) as usize;
            let previous = word(&hash, bucket_base + pos);
            set_word(&mut hash, chain_base + index, previous);
            set_word(&mut hash, bucket_base + pos, index as u32);
        }

        area.sync(dynsym)?;
        area.sync(dynstr)?;
        area.sync(hash)?;
        area.sync(dynamic)
    }

    fn write_shstrtab(
        &self,
        ctx: &OutputContext,
        format: &FileFormat,
        layout: &Layout,
        area: &mut MemoryArea,
    ) -> Result {
        let section = ctx.section(format.shstrtab);
        let mut region = area.request(section.offset, section.size, true)?;
        region[..layout.shstrtab_bytes.len()].copy_from_slice(&layout.shstrtab_bytes);
        area.sync(region)
    }

    fn write_section_headers(
        &self,
        ctx: &OutputContext,
        format: &FileFormat,
        db: &SymbolDb,
        layout: &Layout,
        backend: &dyn TargetBackend,
        area: &mut MemoryArea,
    ) -> Result {
        let bitclass = backend.bitclass();
        let entry_size = elf::shdr_size(bitclass);
        let mut region = area.request(
            layout.shoff,
            layout.order.len() as u64 * entry_size,
            true,
        )?;
        let index_of = |id: Option<OutSectionId>| -> u32 {
            id.map(|id| ctx.section(id).index).unwrap_or(0)
        };
        let first_global = ctx
            .symbols
            .iter()
            .take_while(|&&sym| db.info(sym).is_local())
            .count() as u32;

        for (position, &id) in layout.order.iter().enumerate() {
            let section = ctx.section(id);
            if section.kind == SectionKind::Null {
                continue; // all-zero entry
            }
            let (link, info) = if id == format.symtab {
                (index_of(Some(format.strtab)), first_global)
            } else if Some(id) == format.dynsym {
                (index_of(format.dynstr), 1)
            } else if Some(id) == format.hash {
                (index_of(format.dynsym), 0)
            } else if Some(id) == format.dynamic {
                (index_of(format.dynstr), 0)
            } else {
                (0, 0)
            };
            let offset = position * entry_size as usize;
            if bitclass == 32 {
                let shdr = elf::SectionHeader32 {
                    name: layout.sh_name_offsets[id.as_usize()],
                    ty: section.ty,
                    flags: section.flags as u32,
                    addr: section.addr as u32,
                    offset: section.offset as u32,
                    size: section.size as u32,
                    link,
                    info,
                    addralign: section.align as u32,
                    entsize: section.entsize as u32,
                };
                elf::write_pod(&mut region, offset, &shdr);
            } else {
                let shdr = elf::SectionHeader64 {
                    name: layout.sh_name_offsets[id.as_usize()],
                    ty: section.ty,
                    flags: section.flags,
                    addr: section.addr,
                    offset: section.offset,
                    size: section.size,
                    link,
                    info,
                    addralign: section.align,
                    entsize: section.entsize,
                };
                elf::write_pod(&mut region, offset, &shdr);
            }
        }
        area.sync(region)
    }
}

/// Copies input section payloads into their placed output ranges. Name pools
/// are written by their own emitters; BSS has no file bytes.
fn write_section_payloads(
    inputs: &InputTree,
    ctx: &OutputContext,
    layout: &Layout,
    placements: &[Placement],
    area: &mut MemoryArea,
) -> Result {
    for &id in &layout.order {
        let section = ctx.section(id);
        if !section.has_file_data() || section.size == 0 || section.kind == SectionKind::NamePool {
            continue;
        }
        if let Some(data) = &section.data {
            // Generated content (e.g. .interp).
            let mut region = area.request(section.offset, section.size, true)?;
            region[..data.len()].copy_from_slice(data);
            area.sync(region)?;
            continue;
        }
        let mut relevant = placements.iter().filter(|p| p.out == id).peekable();
        if relevant.peek().is_none() {
            continue;
        }
        let mut region = area.request(section.offset, section.size, true)?;
        for placement in relevant {
            let input = inputs.get(placement.input);
            let Some(input_ctx) = &input.context else {
                continue;
            };
            let input_section = &input_ctx.sections[placement.section_index as usize];
            if let Some(bytes) = &input_section.data {
                let start = placement.offset as usize;
                region[start..start + bytes.len()].copy_from_slice(bytes);
            }
        }
        area.sync(region)?;
    }
    Ok(())
}

fn write_symbol(
    out: &mut [u8],
    offset: usize,
    bitclass: u32,
    st_name: u32,
    info: &ResolveInfo,
    shndx: u16,
    backend: &dyn TargetBackend,
) {
    // Symbols the link is importing keep a zero value in the output tables.
    let value = if info.is_dyn() { 0 } else { info.value };
    if bitclass == 32 {
        let entry = elf::SymtabEntry32 {
            name: st_name,
            value: value as u32,
            size: info.size as u32,
            info: backend.symbol_info(info),
            other: info.visibility.st_other(),
            shndx,
        };
        elf::write_pod(out, offset, &entry);
    } else {
        let entry = elf::SymtabEntry64 {
            name: st_name,
            info: backend.symbol_info(info),
            other: info.visibility.st_other(),
            shndx,
            value,
            size: info.size,
        };
        elf::write_pod(out, offset, &entry);
    }
}

fn symbol_shndx(info: &ResolveInfo, ctx: &OutputContext, backend: &dyn TargetBackend) -> u16 {
    if let Some(shndx) = backend.symbol_shndx(info) {
        return shndx;
    }
    if info.is_dyn() {
        return oelf::SHN_UNDEF;
    }
    if info.binding == crate::symbol::Binding::Absolute {
        return oelf::SHN_ABS;
    }
    match info.desc {
        SymbolDesc::Undefined | SymbolDesc::IndirectWeak => oelf::SHN_UNDEF,
        SymbolDesc::Common => oelf::SHN_COMMON,
        SymbolDesc::Define => {
            if info.is_local()
                && matches!(info.sym_type, SymbolType::NoType | SymbolType::File)
                && info.out_section.is_none()
            {
                return oelf::SHN_ABS;
            }
            info.out_section
                .map(|id| ctx.section(id).index as u16)
                .unwrap_or(oelf::SHN_ABS)
        }
    }
}
