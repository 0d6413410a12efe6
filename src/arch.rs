//! The capability set the core consumes from an architecture backend.
//! Relocation application and GOT/PLT construction live behind this trait;
//! nothing else in the crate depends on a concrete architecture type.

use crate::args::LinkerConfig;
use crate::context::LDSection;
use crate::context::OutputContext;
use crate::error::Result;
use crate::file_format::FileFormat;
use crate::layout;
use crate::symbol::ResolveInfo;

pub trait TargetBackend {
    fn name(&self) -> &'static str;

    /// 32 or 64, selecting Elf32_* vs Elf64_* on-disk records.
    fn bitclass(&self) -> u32;

    fn pagesize(&self) -> u64;

    /// The e_machine value for the output header.
    fn machine(&self) -> u16;

    /// Maps section flags onto program-header flags.
    fn segment_flag(&self, section_flags: u64) -> u32 {
        let mut flags = object::elf::PF_R;
        if section_flags & u64::from(object::elf::SHF_WRITE) != 0 {
            flags |= object::elf::PF_W;
        }
        if section_flags & u64::from(object::elf::SHF_EXECINSTR) != 0 {
            flags |= object::elf::PF_X;
        }
        flags
    }

    /// Placement bucket for Target-kind sections.
    fn target_section_order(&self, _section: &LDSection) -> u32 {
        layout::SHO_TARGET
    }

    /// st_info fallback. The core computes binding and type itself; a backend
    /// can override for architecture-private symbol classes.
    fn symbol_info(&self, info: &ResolveInfo) -> u8 {
        (info.st_bind() << 4) | info.sym_type.st_type()
    }

    /// st_shndx override hook; `None` defers to the core's rules.
    fn symbol_shndx(&self, _info: &ResolveInfo) -> Option<u16> {
        None
    }

    /// Per-architecture `.dynamic` tags to reserve (DT_PLTGOT and friends)
    /// ahead of the DT_NEEDED block.
    fn dynamic_tags(&self) -> &'static [u32] {
        &[]
    }

    /// Creates the standard output sections for an executable. Idempotent;
    /// sections that already exist are reused.
    fn init_exec_sections(
        &mut self,
        ctx: &mut OutputContext,
        config: &LinkerConfig,
        needs_dynamic: bool,
    ) -> Result<FileFormat> {
        FileFormat::init(ctx, config, needs_dynamic)
    }

    /// Creates the standard output sections for a shared object. Idempotent.
    fn init_dynobj_sections(
        &mut self,
        ctx: &mut OutputContext,
        config: &LinkerConfig,
    ) -> Result<FileFormat> {
        FileFormat::init(ctx, config, true)
    }

    fn do_pre_layout(&mut self, _config: &LinkerConfig, _ctx: &mut OutputContext) -> Result {
        Ok(())
    }

    fn do_post_layout(&mut self, _config: &LinkerConfig, _ctx: &mut OutputContext) -> Result {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86_64::X86_64;

    #[test]
    fn default_segment_flag_mapping() {
        let backend = X86_64;
        assert_eq!(backend.segment_flag(0), object::elf::PF_R);
        assert_eq!(
            backend.segment_flag(u64::from(object::elf::SHF_ALLOC | object::elf::SHF_WRITE)),
            object::elf::PF_R | object::elf::PF_W
        );
        assert_eq!(
            backend.segment_flag(u64::from(object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR)),
            object::elf::PF_R | object::elf::PF_X
        );
    }
}
