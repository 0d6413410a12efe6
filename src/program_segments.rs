//! Builds the program-header table from the laid-out output sections:
//! PT_PHDR, PT_INTERP, the PT_LOAD covers, and PT_DYNAMIC. Section virtual
//! addresses are assigned here, during the PT_LOAD walk.

use crate::arch::TargetBackend;
use crate::context::OutSectionId;
use crate::context::OutputContext;
use crate::context::SectionKind;
use crate::elf;
use crate::error::Result;
use crate::layout::Layout;
use anyhow::bail;

pub(crate) struct ElfSegment {
    pub(crate) seg_type: u32,
    pub(crate) flags: u32,
    pub(crate) offset: u64,
    pub(crate) vaddr: u64,
    pub(crate) paddr: u64,
    pub(crate) filesz: u64,
    pub(crate) memsz: u64,
    pub(crate) align: u64,
    pub(crate) sections: Vec<OutSectionId>,
}

impl ElfSegment {
    fn new(seg_type: u32, flags: u32) -> ElfSegment {
        ElfSegment {
            seg_type,
            flags,
            offset: 0,
            vaddr: 0,
            paddr: 0,
            filesz: 0,
            memsz: 0,
            align: 1,
            sections: Vec::new(),
        }
    }
}

/// Owns every segment for one link. Append-only.
#[derive(Default)]
pub(crate) struct SegmentFactory {
    segments: Vec<ElfSegment>,
}

impl SegmentFactory {
    pub(crate) fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn segments(&self) -> &[ElfSegment] {
        &self.segments
    }
}

/// Populates the segment table and assigns section virtual addresses.
pub(crate) fn create_segments(
    ctx: &mut OutputContext,
    layout: &Layout,
    backend: &dyn TargetBackend,
) -> Result<SegmentFactory> {
    let bitclass = backend.bitclass();
    let mut factory = SegmentFactory::default();

    factory
        .segments
        .push(ElfSegment::new(object::elf::PT_PHDR, object::elf::PF_R));

    if let Some(interp) = find_in_order(ctx, layout, ".interp") {
        let mut seg = ElfSegment::new(object::elf::PT_INTERP, object::elf::PF_R);
        seg.sections.push(interp);
        seg.align = u64::from(bitclass / 8);
        factory.segments.push(seg);
    }

    // PT_LOAD covers. A new one starts whenever the write bit flips or the
    // null header section is seen, which guarantees the first load exists and
    // spans the file headers.
    let mut prev_flags = backend.segment_flag(0);
    let mut padding = 0u64;
    let mut current_load: Option<usize> = None;
    for &id in &layout.order {
        let is_null = ctx.section(id).kind == SectionKind::Null;
        if !ctx.section(id).is_alloc() && !is_null {
            continue;
        }
        let cur_flags = backend.segment_flag(ctx.section(id).flags);
        if (prev_flags & object::elf::PF_W) != (cur_flags & object::elf::PF_W) || is_null {
            let mut seg = ElfSegment::new(object::elf::PT_LOAD, 0);
            seg.align = backend.pagesize();
            padding = if ctx.section(id).offset % seg.align != 0 {
                seg.align
            } else {
                0
            };
            factory.segments.push(seg);
            current_load = Some(factory.segments.len() - 1);
        }
        let Some(load_index) = current_load else {
            bail!("allocated section `{}` precedes the null header", ctx.section(id).name);
        };
        let load = &mut factory.segments[load_index];
        load.sections.push(id);
        load.flags |= cur_flags;
        let section = ctx.section_mut(id);
        section.addr = section.offset + padding;
        prev_flags = cur_flags;
    }

    if let Some(dynamic) = find_in_order(ctx, layout, ".dynamic") {
        let mut seg = ElfSegment::new(
            object::elf::PT_DYNAMIC,
            object::elf::PF_R | object::elf::PF_W,
        );
        seg.sections.push(dynamic);
        seg.align = u64::from(bitclass / 8);
        factory.segments.push(seg);
    }

    update_segments(ctx, &mut factory, bitclass);
    Ok(factory)
}

fn find_in_order(ctx: &OutputContext, layout: &Layout, name: &str) -> Option<OutSectionId> {
    layout
        .order
        .iter()
        .copied()
        .find(|&id| ctx.section(id).name == name)
}

fn update_segments(ctx: &OutputContext, factory: &mut SegmentFactory, bitclass: u32) {
    let num_segments = factory.segments.len() as u64;
    let mut is_first_pt_load = true;
    for segment in &mut factory.segments {
        if segment.seg_type == object::elf::PT_PHDR {
            let offset = elf::ehdr_size(bitclass);
            segment.offset = offset;
            segment.vaddr = offset;
            segment.paddr = offset;
            segment.filesz = num_segments * elf::phdr_size(bitclass);
            segment.memsz = segment.filesz;
            segment.align = u64::from(bitclass / 8);
            continue;
        }

        let first = ctx.section(segment.sections[0]);
        segment.offset = first.offset;
        segment.vaddr = first.addr;
        segment.paddr = segment.vaddr;

        let last = ctx.section(*segment.sections.last().expect("segment has sections"));
        if segment.seg_type == object::elf::PT_LOAD && is_first_pt_load {
            // The first load covers the ELF header and program headers too.
            segment.filesz = last.addr + last.size - segment.vaddr;
            is_first_pt_load = false;
        } else {
            segment.filesz = segment
                .sections
                .iter()
                .map(|&id| ctx.section(id))
                .filter(|s| s.kind != SectionKind::Bss)
                .map(|s| s.size)
                .sum();
        }
        segment.memsz = last.addr + last.size - segment.vaddr;
    }
}
