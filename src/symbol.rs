//! The canonical per-name symbol record (`ResolveInfo`) and the enums that
//! drive resolution.

use crate::context::OutSectionId;
use crate::input::InputId;
use crate::string_pool::InternedStr;
use anyhow::Context;
use std::num::NonZeroU32;

/// An index into the symbol pool's arena. This is as opposed to a symbol index
/// within an input file's own symbol list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(NonZeroU32);

impl SymbolId {
    pub(crate) fn as_usize(self) -> usize {
        self.0.get() as usize
    }
}

impl TryFrom<usize> for SymbolId {
    type Error = crate::error::Error;

    fn try_from(value: usize) -> std::result::Result<Self, Self::Error> {
        Ok(SymbolId(
            NonZeroU32::new(u32::try_from(value).context("Too many symbols")?)
                .context("Attempt to create SymbolId with ID 0")?,
        ))
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.get().fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolDesc {
    Undefined,
    Define,
    Common,
    /// A weak reference that forwards to another symbol; produced when a weak
    /// definition is demoted during common promotion.
    IndirectWeak,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    Local,
    Global,
    Weak,
    Absolute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Default,
    Internal,
    Hidden,
    Protected,
}

impl Visibility {
    /// Restrictiveness rank: Default < Protected < Hidden < Internal. The most
    /// restrictive of two merged symbols always survives.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Visibility::Default => 0,
            Visibility::Protected => 1,
            Visibility::Hidden => 2,
            Visibility::Internal => 3,
        }
    }

    pub(crate) fn most_restrictive(self, other: Visibility) -> Visibility {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    pub(crate) fn st_other(self) -> u8 {
        match self {
            Visibility::Default => object::elf::STV_DEFAULT,
            Visibility::Internal => object::elf::STV_INTERNAL,
            Visibility::Hidden => object::elf::STV_HIDDEN,
            Visibility::Protected => object::elf::STV_PROTECTED,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolSource {
    Regular,
    Dynamic,
}

/// The ELF symbol class (STT_*). Carried through so `st_info` can be emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SymbolType {
    #[default]
    NoType,
    Object,
    Func,
    Section,
    File,
    Tls,
}

impl SymbolType {
    pub(crate) fn st_type(self) -> u8 {
        match self {
            SymbolType::NoType => object::elf::STT_NOTYPE,
            SymbolType::Object => object::elf::STT_OBJECT,
            SymbolType::Func => object::elf::STT_FUNC,
            SymbolType::Section => object::elf::STT_SECTION,
            SymbolType::File => object::elf::STT_FILE,
            SymbolType::Tls => object::elf::STT_TLS,
        }
    }
}

/// Canonical resolved state of one symbol name. At most one non-undefined
/// regular record exists per name in the global pool.
#[derive(Clone, Debug)]
pub struct ResolveInfo<'data> {
    pub name: InternedStr<'data>,
    pub desc: SymbolDesc,
    pub binding: Binding,
    pub visibility: Visibility,
    pub source: SymbolSource,
    pub sym_type: SymbolType,
    /// For common symbols this holds the required alignment until the symbol
    /// is allocated; afterwards it is the address like any other definition.
    pub value: u64,
    pub size: u64,
    /// Backend-private bits. Non-zero forces the symbol into `.dynsym`.
    pub reserved: u64,
    /// The input currently providing the winning definition or reference.
    pub owner: Option<InputId>,
    /// Where the definition physically lives: (input, index into that input's
    /// section list). Used to finalize the value once output addresses exist.
    pub origin: Option<(InputId, u32)>,
    /// The output section the definition landed in.
    pub out_section: Option<OutSectionId>,
    /// True once any dynamic object has defined or referenced this name.
    pub dyn_referenced: bool,
    /// True once any regular input has defined or referenced this name.
    /// Names only ever seen in shared objects stay out of the output tables.
    pub regular_referenced: bool,
}

impl<'data> ResolveInfo<'data> {
    pub(crate) fn undefined(name: InternedStr<'data>) -> ResolveInfo<'data> {
        ResolveInfo {
            name,
            desc: SymbolDesc::Undefined,
            binding: Binding::Global,
            visibility: Visibility::Default,
            source: SymbolSource::Regular,
            sym_type: SymbolType::NoType,
            value: 0,
            size: 0,
            reserved: 0,
            owner: None,
            origin: None,
            out_section: None,
            dyn_referenced: false,
            regular_referenced: false,
        }
    }

    pub(crate) fn is_defined(&self) -> bool {
        matches!(self.desc, SymbolDesc::Define | SymbolDesc::Common)
    }

    pub(crate) fn is_weak(&self) -> bool {
        self.binding == Binding::Weak
    }

    pub(crate) fn is_local(&self) -> bool {
        self.binding == Binding::Local
    }

    pub(crate) fn is_dyn(&self) -> bool {
        self.source == SymbolSource::Dynamic
    }

    /// Adopts everything from `new` except visibility, which only ever
    /// tightens and is merged separately by the resolver.
    pub(crate) fn override_with(&mut self, new: &ResolveInfo<'data>) {
        self.desc = new.desc;
        self.binding = new.binding;
        self.source = new.source;
        self.sym_type = new.sym_type;
        self.value = new.value;
        self.size = new.size;
        self.owner = new.owner;
        self.origin = new.origin;
        self.out_section = new.out_section;
    }

    pub(crate) fn st_bind(&self) -> u8 {
        match self.binding {
            Binding::Local => object::elf::STB_LOCAL,
            Binding::Weak => object::elf::STB_WEAK,
            Binding::Global | Binding::Absolute => object::elf::STB_GLOBAL,
        }
    }
}
