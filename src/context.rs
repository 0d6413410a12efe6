//! Section and symbol lists for inputs and for the output being built. Each
//! input arrives with a populated `LDContext`; the output owns its own.

use crate::symbol::Binding;
use crate::symbol::SymbolDesc;
use crate::symbol::SymbolId;
use crate::symbol::SymbolType;
use crate::symbol::Visibility;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Null,
    Regular,
    Bss,
    NamePool,
    Relocation,
    Target,
    Debug,
    Note,
    MetaData,
}

/// A section header, input or output. Output sections get `addr`, `offset`
/// and `index` assigned during layout.
#[derive(Debug)]
pub struct LDSection {
    pub name: String,
    pub kind: SectionKind,
    pub ty: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub align: u64,
    pub entsize: u64,
    pub index: u32,
    /// Payload bytes for input sections. Output sections other than the name
    /// pools get their payload copied in from input placements.
    pub data: Option<Vec<u8>>,
}

impl LDSection {
    pub fn new(name: impl Into<String>, kind: SectionKind, ty: u32, flags: u64) -> LDSection {
        LDSection {
            name: name.into(),
            kind,
            ty,
            flags,
            addr: 0,
            offset: 0,
            size: 0,
            align: 1,
            entsize: 0,
            index: 0,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Vec<u8>, align: u64) -> LDSection {
        self.size = data.len() as u64;
        self.data = Some(data);
        self.align = align.max(1);
        self
    }

    pub fn with_size(mut self, size: u64, align: u64) -> LDSection {
        self.size = size;
        self.align = align.max(1);
        self
    }

    pub fn is_alloc(&self) -> bool {
        self.flags & u64::from(object::elf::SHF_ALLOC) != 0
    }

    pub fn is_writable(&self) -> bool {
        self.flags & u64::from(object::elf::SHF_WRITE) != 0
    }

    /// BSS-like sections occupy memory but no file bytes.
    pub fn has_file_data(&self) -> bool {
        !matches!(self.kind, SectionKind::Bss | SectionKind::Null)
    }
}

/// A symbol as provided by an input's parser.
#[derive(Debug, Clone)]
pub struct LDSymbol {
    pub name: String,
    pub desc: SymbolDesc,
    pub binding: Binding,
    pub visibility: Visibility,
    pub sym_type: SymbolType,
    pub value: u64,
    pub size: u64,
    /// Index into the owning context's section list, for defined symbols.
    pub section: Option<u32>,
}

impl LDSymbol {
    pub fn defined(name: impl Into<String>, binding: Binding, section: u32) -> LDSymbol {
        LDSymbol {
            name: name.into(),
            desc: SymbolDesc::Define,
            binding,
            visibility: Visibility::Default,
            sym_type: SymbolType::Func,
            value: 0,
            size: 0,
            section: Some(section),
        }
    }

    pub fn undefined(name: impl Into<String>) -> LDSymbol {
        LDSymbol {
            name: name.into(),
            desc: SymbolDesc::Undefined,
            binding: Binding::Global,
            visibility: Visibility::Default,
            sym_type: SymbolType::NoType,
            value: 0,
            size: 0,
            section: None,
        }
    }
}

/// An input's view of its own sections and symbols, in file order.
#[derive(Debug, Default)]
pub struct LDContext {
    pub sections: Vec<LDSection>,
    pub symbols: Vec<LDSymbol>,
}

impl LDContext {
    pub fn get_section(&self, name: &str) -> Option<&LDSection> {
        self.sections.iter().find(|s| s.name == name)
    }
}

/// Identifies an output section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutSectionId(u32);

impl OutSectionId {
    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The output's sections plus the final symbol list (ids into the symbol
/// pool's arena, null symbol first, then locals, then globals).
pub(crate) struct OutputContext {
    pub(crate) sections: Vec<LDSection>,
    pub(crate) symbols: Vec<SymbolId>,
}

impl OutputContext {
    pub(crate) fn new() -> OutputContext {
        // Index 0 is always the null section header.
        let null = LDSection::new("", SectionKind::Null, object::elf::SHT_NULL, 0);
        OutputContext {
            sections: vec![null],
            symbols: Vec::new(),
        }
    }

    pub(crate) fn add_section(&mut self, section: LDSection) -> OutSectionId {
        let id = OutSectionId(self.sections.len() as u32);
        self.sections.push(section);
        id
    }

    pub(crate) fn section(&self, id: OutSectionId) -> &LDSection {
        &self.sections[id.as_usize()]
    }

    pub(crate) fn section_mut(&mut self, id: OutSectionId) -> &mut LDSection {
        &mut self.sections[id.as_usize()]
    }

    pub(crate) fn find_section(&self, name: &str) -> Option<OutSectionId> {
        self.sections
            .iter()
            .position(|s| s.name == name)
            .map(|raw| OutSectionId(raw as u32))
    }

    pub(crate) fn section_ids(&self) -> impl Iterator<Item = OutSectionId> {
        (0..self.sections.len() as u32).map(OutSectionId)
    }
}
