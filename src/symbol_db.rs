//! The global symbol pool: a hash table from interned names to `ResolveInfo`
//! records, plus the entry point that funnels every non-local symbol through
//! the resolver.

use crate::error::warning;
use crate::error::ErrorKind;
use crate::error::LinkError;
use crate::error::Result;
use crate::hash::PassThroughHashMap;
use crate::input::InputId;
use crate::resolver::Action;
use crate::resolver::Resolver;
use crate::string_pool::InternedStr;
use crate::string_pool::StringPool;
use crate::symbol::Binding;
use crate::symbol::ResolveInfo;
use crate::symbol::SymbolDesc;
use crate::symbol::SymbolId;
use crate::symbol::SymbolSource;
use crate::symbol::SymbolType;
use crate::symbol::Visibility;
use anyhow::bail;
use bumpalo::Bump;

pub(crate) struct SymbolDb<'data> {
    strings: StringPool<'data>,
    /// Global (non-local) symbols by name. Local symbols never enter this map.
    map: PassThroughHashMap<InternedStr<'data>, SymbolId>,
    /// Arena of every `ResolveInfo`, pooled or not. Index 0 is a placeholder
    /// so ids fit in a `NonZeroU32`.
    infos: Vec<ResolveInfo<'data>>,
    resolver: Box<dyn Resolver>,
    pub(crate) warnings: Vec<LinkError>,
    /// Monotonic count of undefined-to-defined transitions; group re-scans
    /// repeat until this stops moving.
    undef_resolved: u64,
    /// Dynamic objects whose definitions satisfied a regular reference since
    /// the driver last drained this.
    newly_needed: Vec<InputId>,
}

impl<'data> SymbolDb<'data> {
    pub(crate) fn new(arena: &'data Bump, resolver: Box<dyn Resolver>) -> SymbolDb<'data> {
        let mut strings = StringPool::new(arena);
        let placeholder = ResolveInfo::undefined(strings.intern(b""));
        SymbolDb {
            strings,
            map: Default::default(),
            infos: vec![placeholder],
            resolver,
            warnings: Vec::new(),
            undef_resolved: 0,
            newly_needed: Vec::new(),
        }
    }

    pub(crate) fn intern_string(&mut self, bytes: &[u8]) -> InternedStr<'data> {
        self.strings.intern(bytes)
    }

    /// Allocates a `ResolveInfo` without entering it into the global pool.
    /// Used for local symbols, which go straight to the output symbol list.
    pub(crate) fn create_symbol(
        &mut self,
        name: &[u8],
        is_dyn: bool,
        desc: SymbolDesc,
        binding: Binding,
        value: u64,
        size: u64,
        visibility: Visibility,
    ) -> Result<SymbolId> {
        let name = self.strings.intern(name);
        let mut info = ResolveInfo::undefined(name);
        info.desc = desc;
        info.binding = binding;
        info.visibility = visibility;
        info.source = if is_dyn {
            SymbolSource::Dynamic
        } else {
            SymbolSource::Regular
        };
        info.value = value;
        info.size = size;
        self.push_info(info)
    }

    /// Inserts a symbol and resolves it against any existing entry of the same
    /// name. Local symbols bypass the pool entirely and come back as `None`.
    /// The second element reports whether the name already existed.
    pub(crate) fn insert_symbol(
        &mut self,
        name: &[u8],
        is_dyn: bool,
        desc: SymbolDesc,
        binding: Binding,
        value: u64,
        size: u64,
        visibility: Visibility,
        sym_type: SymbolType,
        owner: Option<InputId>,
        origin: Option<(InputId, u32)>,
    ) -> Result<(Option<SymbolId>, bool)> {
        if binding == Binding::Local {
            return Ok((None, false));
        }
        let name = self.strings.intern(name);
        let new_info = ResolveInfo {
            name,
            desc,
            binding,
            visibility,
            source: if is_dyn {
                SymbolSource::Dynamic
            } else {
                SymbolSource::Regular
            },
            sym_type,
            value,
            size,
            reserved: 0,
            owner,
            origin,
            out_section: None,
            dyn_referenced: is_dyn,
            regular_referenced: !is_dyn,
        };

        let Some(&id) = self.map.get(&name) else {
            // First sighting of this name. Defining a fresh name isn't
            // resolution progress; only satisfying an outstanding reference is.
            let id = self.push_info(new_info)?;
            self.map.insert(name, id);
            return Ok((Some(id), false));
        };

        let idx = id.as_usize();
        let old_was_defined = self.infos[idx].is_defined();
        let old_dyn_definer = if self.infos[idx].is_defined() && self.infos[idx].is_dyn() {
            self.infos[idx].owner
        } else {
            None
        };
        self.infos[idx].dyn_referenced |= is_dyn;
        self.infos[idx].regular_referenced |= !is_dyn;

        let mut did_override = false;
        let action = {
            let resolver = &self.resolver;
            let old = &mut self.infos[idx];
            loop {
                match resolver.resolve(old, &new_info, &mut did_override) {
                    Action::Again(_) => continue,
                    terminal => break terminal,
                }
            }
        };
        match action {
            Action::Success => {}
            Action::Warning(message) => {
                warning(&message);
                self.warnings.push(LinkError::new(
                    ErrorKind::WeakResolutionConflict,
                    message,
                    name.to_string(),
                ));
            }
            Action::Abort(message) => {
                bail!(LinkError::new(
                    ErrorKind::MultipleDefinition,
                    message,
                    name.to_string(),
                ));
            }
            Action::Again(_) => unreachable!("Again is re-dispatched above"),
        }

        let now = &self.infos[idx];
        if !old_was_defined && now.is_defined() {
            self.undef_resolved += 1;
            if now.is_dyn() {
                if let Some(provider) = now.owner {
                    self.newly_needed.push(provider);
                }
            }
        }
        // A regular reference satisfied by a shared object marks that object
        // as needed.
        if desc == SymbolDesc::Undefined && !is_dyn {
            if let Some(provider) = old_dyn_definer {
                self.newly_needed.push(provider);
            }
        }
        Ok((Some(id), true))
    }

    fn push_info(&mut self, info: ResolveInfo<'data>) -> Result<SymbolId> {
        let id = SymbolId::try_from(self.infos.len())?;
        self.infos.push(info);
        Ok(id)
    }

    pub(crate) fn get(&self, name: InternedStr<'data>) -> Option<SymbolId> {
        self.map.get(&name).copied()
    }

    /// Pool lookup by raw name, without interning.
    pub(crate) fn lookup(&self, name: &[u8]) -> Option<&ResolveInfo<'data>> {
        let interned = self.strings.find(name)?;
        self.map.get(&interned).map(|&id| self.info(id))
    }

    pub(crate) fn info(&self, id: SymbolId) -> &ResolveInfo<'data> {
        &self.infos[id.as_usize()]
    }

    pub(crate) fn info_mut(&mut self, id: SymbolId) -> &mut ResolveInfo<'data> {
        &mut self.infos[id.as_usize()]
    }

    /// Every pooled (global) symbol, in first-insertion order.
    pub(crate) fn pooled_symbols(&self) -> impl Iterator<Item = SymbolId> + use<'_, 'data> {
        // Pool membership can't be read off the arena, so filter through the
        // name map.
        (1..self.infos.len()).filter_map(|raw| {
            let id = SymbolId::try_from(raw).ok()?;
            (self.get(self.infos[raw].name) == Some(id)).then_some(id)
        })
    }

    pub(crate) fn undef_resolved(&self) -> u64 {
        self.undef_resolved
    }

    pub(crate) fn take_newly_needed(&mut self) -> Vec<InputId> {
        std::mem::take(&mut self.newly_needed)
    }

    pub(crate) fn num_symbols(&self) -> usize {
        self.infos.len() - 1
    }
}
