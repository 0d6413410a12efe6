//! weld is the back-end of an ELF static/dynamic linker. It consumes a
//! finished `LinkerConfig` plus an input tree whose objects and shared
//! objects have already been parsed into `LDContext`s, and produces a single
//! ELF executable or shared object.

// It's not always desirable to use if-let instead of a match, especially if
// you might later end up adding more branches to the match.
#![allow(clippy::single_match)]
// Pipeline phases pass the same handful of link-wide structures around;
// bundling them into one context struct would just rename the problem.
#![allow(clippy::too_many_arguments)]

pub mod aarch64;
pub mod arch;
pub mod args;
pub mod attributes;
pub mod context;
pub(crate) mod dynamic;
pub(crate) mod elf;
pub(crate) mod elf_writer;
pub mod error;
pub(crate) mod file_format;
pub(crate) mod hash;
pub mod input;
pub(crate) mod layout;
pub mod linker_script;
pub mod memory_area;
pub(crate) mod program_segments;
pub(crate) mod resolver;
pub(crate) mod section_merger;
pub(crate) mod string_pool;
pub mod symbol;
pub(crate) mod symbol_db;
pub mod x86_64;

use crate::arch::TargetBackend;
use crate::args::LinkerConfig;
use crate::args::OutputKind;
use crate::attributes::AttributeFactory;
use crate::context::LDSection;
use crate::context::OutSectionId;
use crate::context::OutputContext;
use crate::context::SectionKind;
use crate::elf_writer::ElfWriter;
use crate::elf_writer::Placement;
use crate::error::warning;
use crate::error::ErrorKind;
use crate::error::LinkError;
use crate::error::Result;
use crate::input::Input;
use crate::input::InputId;
use crate::input::InputKind;
use crate::input::InputTree;
use crate::input::ScanUnit;
use crate::memory_area::MemoryArea;
use crate::resolver::GnuLdResolver;
use crate::resolver::LinkerScriptResolver;
use crate::resolver::Resolver;
use crate::symbol::Binding;
use crate::symbol::SymbolDesc;
use crate::symbol::SymbolId;
use crate::symbol::SymbolType;
use crate::symbol::Visibility;
use crate::symbol_db::SymbolDb;
use ahash::AHashMap;
use anyhow::bail;
use bumpalo::Bump;

#[derive(Debug)]
pub struct LinkOutcome {
    /// Recoverable diagnostics collected during the link, already printed.
    pub warnings: Vec<LinkError>,
    pub file_size: u64,
    pub entry: u64,
}

enum OutputTarget {
    File,
    Memory,
}

/// Links and writes the output file named by the config. On failure no output
/// is left behind.
pub fn link(
    config: &LinkerConfig,
    inputs: &mut InputTree,
    attrs: &AttributeFactory,
    backend: &mut dyn TargetBackend,
) -> Result<LinkOutcome> {
    match run_link(config, inputs, attrs, backend, OutputTarget::File) {
        Ok((area, outcome)) => {
            area.finish(config.output_kind == OutputKind::Exec)?;
            Ok(outcome)
        }
        Err(error) => {
            let _ = std::fs::remove_file(&config.output);
            Err(error)
        }
    }
}

/// Links into memory and returns the output bytes. Used for embedding and
/// tests; the file system is never touched.
pub fn link_in_memory(
    config: &LinkerConfig,
    inputs: &mut InputTree,
    attrs: &AttributeFactory,
    backend: &mut dyn TargetBackend,
) -> Result<(Vec<u8>, LinkOutcome)> {
    let (area, outcome) = run_link(config, inputs, attrs, backend, OutputTarget::Memory)?;
    Ok((area.into_bytes()?, outcome))
}

#[tracing::instrument(skip_all, name = "Link")]
fn run_link(
    config: &LinkerConfig,
    inputs: &mut InputTree,
    attrs: &AttributeFactory,
    backend: &mut dyn TargetBackend,
    target: OutputTarget,
) -> Result<(MemoryArea, LinkOutcome)> {
    match config.output_kind {
        OutputKind::Exec | OutputKind::DynObj => {}
        other => bail!(LinkError::new(
            ErrorKind::UnsupportedOutputType,
            format!("cannot produce {other:?} output"),
            config.output.display().to_string(),
        )),
    }
    let bitclass = backend.bitclass();
    if bitclass != 32 && bitclass != 64 {
        bail!(LinkError::new(
            ErrorKind::UnsupportedBitclass,
            format!("backend reports unsupported bitclass {bitclass}"),
            backend.name(),
        ));
    }
    inputs.finish()?;

    let arena = Bump::new();
    let resolver: Box<dyn Resolver> = if config.defsyms.is_empty() {
        Box::new(GnuLdResolver)
    } else {
        Box::new(LinkerScriptResolver)
    };
    let mut db = SymbolDb::new(&arena, resolver);

    define_script_symbols(config, &mut db)?;
    let locals = resolve_inputs(&mut db, inputs, attrs)?;
    audit_unresolved(config, inputs, &db)?;

    let mut ctx = OutputContext::new();
    let (placements, mut pending_addr) = merge_sections(inputs, &mut db, &mut ctx, &locals)?;
    allocate_commons(&mut db, &mut ctx, &mut pending_addr);

    // The output symbol list: the reserved null entry, then locals in input
    // order, then globals in first-insertion order. Names only ever seen in
    // shared objects stay out.
    let null_sym = db.create_symbol(
        b"",
        false,
        SymbolDesc::Undefined,
        Binding::Local,
        0,
        0,
        Visibility::Default,
    )?;
    ctx.symbols.push(null_sym);
    ctx.symbols.extend_from_slice(&locals);
    let globals: Vec<SymbolId> = db
        .pooled_symbols()
        .filter(|&id| db.info(id).regular_referenced)
        .collect();
    ctx.symbols.extend(globals);

    let needs_dynamic = config.output_kind == OutputKind::DynObj
        || inputs
            .leaves()
            .any(|(id, _)| inputs.get(id).kind() == InputKind::DynObj);
    let format = match config.output_kind {
        OutputKind::DynObj => backend.init_dynobj_sections(&mut ctx, config)?,
        _ => backend.init_exec_sections(&mut ctx, config, needs_dynamic)?,
    };
    backend.do_pre_layout(config, &mut ctx)?;

    let mut writer = ElfWriter::new();
    writer.size_name_pools(config, inputs, attrs, &db, &mut ctx, &format, &*backend)?;
    let layout = layout::compute(&mut ctx, &*backend)?;
    let segments = program_segments::create_segments(&mut ctx, &layout, &*backend)?;

    // Section addresses exist now; land them in the symbol values.
    for (sym, out) in pending_addr {
        db.info_mut(sym).value += ctx.section(out).addr;
    }
    backend.do_post_layout(config, &mut ctx)?;

    let mut warnings = Vec::new();
    let entry_value = entry_address(config, &db, &mut warnings);

    let mut area = match target {
        OutputTarget::File => MemoryArea::create_file(&config.output, layout.file_size)?,
        OutputTarget::Memory => MemoryArea::in_memory(layout.file_size),
    };
    writer.emit(
        config,
        inputs,
        &db,
        &ctx,
        &format,
        &layout,
        &segments,
        &*backend,
        &placements,
        entry_value,
        &mut area,
    )?;

    warnings.extend(std::mem::take(&mut db.warnings));
    let outcome = LinkOutcome {
        warnings,
        file_size: layout.file_size,
        entry: entry_value,
    };
    Ok((area, outcome))
}

/// `--defsym` assignments enter the pool as absolute symbols before any input
/// is scanned. Later assignments may refer to earlier ones.
fn define_script_symbols(config: &LinkerConfig, db: &mut SymbolDb) -> Result {
    for (name, expr) in &config.defsyms {
        let value = expr.eval(&|sym| {
            db.lookup(sym.as_bytes())
                .filter(|info| info.is_defined())
                .map(|info| info.value)
        })?;
        db.insert_symbol(
            name.as_bytes(),
            false,
            SymbolDesc::Define,
            Binding::Absolute,
            value,
            0,
            Visibility::Default,
            SymbolType::NoType,
            None,
            None,
        )?;
    }
    Ok(())
}

#[tracing::instrument(skip_all, name = "Symbol resolution")]
fn resolve_inputs<'data>(
    db: &mut SymbolDb<'data>,
    inputs: &mut InputTree,
    attrs: &AttributeFactory,
) -> Result<Vec<SymbolId>> {
    let mut locals = Vec::new();
    for unit in inputs.scan_units() {
        match unit {
            ScanUnit::Single(id) => {
                process_input(db, inputs, attrs, id, &mut locals)?;
            }
            // Group bodies re-scan until no further references resolve.
            ScanUnit::Group(members) => loop {
                let before = db.undef_resolved();
                let mut progress = false;
                for &member in &members {
                    progress |= process_input(db, inputs, attrs, member, &mut locals)?;
                }
                if db.undef_resolved() == before && !progress {
                    break;
                }
            },
        }
    }
    Ok(locals)
}

fn probe_kind(input: &Input) -> InputKind {
    if !input.members.is_empty() {
        InputKind::Archive
    } else if input.context.is_some() {
        InputKind::Object
    } else {
        InputKind::Script
    }
}

/// Feeds one input's symbols into the pool. Returns whether anything new was
/// loaded, which drives group fixed-point iteration.
fn process_input<'data>(
    db: &mut SymbolDb<'data>,
    inputs: &mut InputTree,
    attrs: &AttributeFactory,
    id: InputId,
    locals: &mut Vec<SymbolId>,
) -> Result<bool> {
    if !inputs.get(id).is_recognized() {
        let probed = probe_kind(inputs.get(id));
        inputs.get_mut(id).set_kind(probed)?;
    }
    let progress = match inputs.get(id).kind() {
        InputKind::Script | InputKind::Unknown => {
            tracing::debug!(name = %inputs.get(id).name, "skipping non-object input");
            false
        }
        InputKind::Object => {
            if inputs.get(id).loaded {
                false
            } else {
                insert_context_symbols(db, inputs, id, false, locals)?;
                inputs.get_mut(id).loaded = true;
                true
            }
        }
        InputKind::DynObj => {
            if inputs.get(id).loaded {
                false
            } else {
                insert_context_symbols(db, inputs, id, true, locals)?;
                inputs.get_mut(id).loaded = true;
                true
            }
        }
        InputKind::Archive => scan_archive(db, inputs, attrs, id, locals)?,
    };
    for needed in db.take_newly_needed() {
        inputs.get_mut(needed).needed = true;
    }
    Ok(progress)
}

/// Pulls archive members. `--whole-archive` loads everything; otherwise a
/// member is only pulled when it defines a name the pool still has undefined,
/// repeated until no member qualifies.
fn scan_archive<'data>(
    db: &mut SymbolDb<'data>,
    inputs: &mut InputTree,
    attrs: &AttributeFactory,
    id: InputId,
    locals: &mut Vec<SymbolId>,
) -> Result<bool> {
    let members = inputs.get(id).members.clone();
    let whole_archive = attrs.get(inputs.get(id).attr).whole_archive;
    let mut progress = false;
    if whole_archive {
        for member in members {
            if !inputs.get(member).loaded {
                insert_context_symbols(db, inputs, member, false, locals)?;
                inputs.get_mut(member).loaded = true;
                progress = true;
            }
        }
        return Ok(progress);
    }
    loop {
        let mut pulled = false;
        for &member in &members {
            if inputs.get(member).loaded {
                continue;
            }
            if member_satisfies_undef(db, inputs.get(member)) {
                insert_context_symbols(db, inputs, member, false, locals)?;
                inputs.get_mut(member).loaded = true;
                pulled = true;
                progress = true;
            }
        }
        if !pulled {
            break;
        }
    }
    Ok(progress)
}

fn member_satisfies_undef(db: &SymbolDb, member: &Input) -> bool {
    let Some(ctx) = &member.context else {
        return false;
    };
    ctx.symbols.iter().any(|sym| {
        sym.binding != Binding::Local
            && matches!(sym.desc, SymbolDesc::Define | SymbolDesc::Common)
            && db
                .lookup(sym.name.as_bytes())
                .is_some_and(|info| info.desc == SymbolDesc::Undefined)
    })
}

fn insert_context_symbols<'data>(
    db: &mut SymbolDb<'data>,
    inputs: &InputTree,
    id: InputId,
    is_dyn: bool,
    locals: &mut Vec<SymbolId>,
) -> Result {
    let input = inputs.get(id);
    let Some(input_ctx) = &input.context else {
        return Ok(());
    };
    for sym in &input_ctx.symbols {
        if sym.binding == Binding::Local {
            // A shared object's locals are its own business.
            if is_dyn {
                continue;
            }
            let local = db.create_symbol(
                sym.name.as_bytes(),
                false,
                sym.desc,
                sym.binding,
                sym.value,
                sym.size,
                sym.visibility,
            )?;
            let info = db.info_mut(local);
            info.sym_type = sym.sym_type;
            info.owner = Some(id);
            info.origin = sym.section.map(|section| (id, section));
            locals.push(local);
            continue;
        }
        db.insert_symbol(
            sym.name.as_bytes(),
            is_dyn,
            sym.desc,
            sym.binding,
            sym.value,
            sym.size,
            sym.visibility,
            sym.sym_type,
            Some(id),
            sym.section.map(|section| (id, section)),
        )?;
    }
    Ok(())
}

/// A strong reference that survived every input and can't be satisfied by a
/// shared object fails an executable link.
fn audit_unresolved(config: &LinkerConfig, inputs: &InputTree, db: &SymbolDb) -> Result {
    if config.output_kind == OutputKind::DynObj {
        return Ok(());
    }
    for id in db.pooled_symbols() {
        let info = db.info(id);
        if info.desc == SymbolDesc::Undefined
            && info.binding == Binding::Global
            && info.regular_referenced
        {
            let location = info
                .owner
                .map(|owner| inputs.get(owner).name.clone())
                .unwrap_or_default();
            bail!(LinkError::new(
                ErrorKind::UnresolvedSymbol,
                format!("undefined reference to `{}`", info.name),
                location,
            ));
        }
    }
    Ok(())
}

/// Routes every loaded input section to an output section, accumulating size,
/// alignment and flags, and rebases symbol values onto the output sections.
#[tracing::instrument(skip_all, name = "Merge sections")]
fn merge_sections(
    inputs: &InputTree,
    db: &mut SymbolDb,
    ctx: &mut OutputContext,
    locals: &[SymbolId],
) -> Result<(Vec<Placement>, Vec<(SymbolId, OutSectionId)>)> {
    let mut merger = section_merger::SectionMerger::with_std_map(ctx)?;
    let mut placements: Vec<Placement> = Vec::new();
    let mut by_origin: AHashMap<(InputId, u32), usize> = AHashMap::new();

    let mut ordered: Vec<InputId> = Vec::new();
    for (id, _) in inputs.leaves() {
        let input = inputs.get(id);
        match input.kind() {
            InputKind::Object => {
                if input.loaded {
                    ordered.push(id);
                }
            }
            InputKind::Archive => {
                ordered.extend(
                    input
                        .members
                        .iter()
                        .copied()
                        .filter(|&member| inputs.get(member).loaded),
                );
            }
            _ => {}
        }
    }

    for id in ordered {
        let Some(input_ctx) = &inputs.get(id).context else {
            continue;
        };
        for (section_index, section) in input_ctx.sections.iter().enumerate() {
            if section.name.is_empty()
                || matches!(section.kind, SectionKind::Null | SectionKind::Relocation)
            {
                continue;
            }
            let out = match merger.find(&section.name) {
                Some(out) => out,
                None => {
                    let out = ctx.add_section(LDSection::new(
                        section.name.clone(),
                        section.kind,
                        section.ty,
                        section.flags,
                    ));
                    merger.add_mapping(&section.name, out)?;
                    out
                }
            };
            let out_section = ctx.section_mut(out);
            let offset = layout::align_to(out_section.size, section.align);
            out_section.size = offset + section.size;
            out_section.align = out_section.align.max(section.align);
            out_section.flags |= section.flags;
            by_origin.insert((id, section_index as u32), placements.len());
            placements.push(Placement {
                input: id,
                section_index: section_index as u32,
                out,
                offset,
            });
        }
    }

    // Symbol values become output-section-relative here; the section's
    // virtual address is added once segments assign it.
    let mut pending_addr = Vec::new();
    let pooled: Vec<SymbolId> = db.pooled_symbols().collect();
    for sym in pooled.into_iter().chain(locals.iter().copied()) {
        let info = db.info(sym);
        if info.is_dyn() {
            continue;
        }
        let Some(origin) = info.origin else {
            continue;
        };
        let Some(&placement_index) = by_origin.get(&origin) else {
            continue;
        };
        let placement = placements[placement_index];
        let info = db.info_mut(sym);
        info.out_section = Some(placement.out);
        info.value += placement.offset;
        pending_addr.push((sym, placement.out));
    }
    Ok((placements, pending_addr))
}

/// Tentative definitions that survived resolution get storage in `.bss`. The
/// common's value slot carried its alignment until now.
fn allocate_commons(
    db: &mut SymbolDb,
    ctx: &mut OutputContext,
    pending_addr: &mut Vec<(SymbolId, OutSectionId)>,
) {
    let pooled: Vec<SymbolId> = db.pooled_symbols().collect();
    for sym in pooled {
        let info = db.info(sym);
        if info.desc != SymbolDesc::Common || info.is_dyn() {
            continue;
        }
        let align = info.value.max(1);
        let size = info.size;
        let bss = match ctx.find_section(".bss") {
            Some(existing) => existing,
            None => ctx.add_section(LDSection::new(
                ".bss",
                SectionKind::Bss,
                object::elf::SHT_NOBITS,
                u64::from(object::elf::SHF_ALLOC | object::elf::SHF_WRITE),
            )),
        };
        let section = ctx.section_mut(bss);
        let offset = layout::align_to(section.size, align);
        section.size = offset + size;
        section.align = section.align.max(align);
        let info = db.info_mut(sym);
        info.desc = SymbolDesc::Define;
        info.sym_type = SymbolType::Object;
        info.value = offset;
        info.out_section = Some(bss);
        pending_addr.push((sym, bss));
    }
}

fn entry_address(config: &LinkerConfig, db: &SymbolDb, warnings: &mut Vec<LinkError>) -> u64 {
    if config.output_kind != OutputKind::Exec {
        return 0;
    }
    let name = config.entry_symbol();
    match db.lookup(name.as_bytes()) {
        Some(info) if info.is_defined() && !info.is_dyn() => info.value,
        _ => {
            let message = format!("cannot find entry symbol `{name}`; defaulting to 0");
            warning(&message);
            warnings.push(LinkError::new(
                ErrorKind::UnresolvedSymbol,
                message,
                name.to_owned(),
            ));
            0
        }
    }
}
