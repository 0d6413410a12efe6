//! Position-dependent input attributes. The command line mutates one current
//! attribute record; each file argument snapshots it. Value-equal snapshots
//! share a single interned record.

use ahash::AHashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Attribute {
    /// Pull every member of an archive regardless of reference.
    pub whole_archive: bool,
    /// Emit DT_NEEDED for a dynamic object only if it resolved a symbol.
    pub as_needed: bool,
    /// Emit DT_NEEDED entries for dynamic-object inputs at all.
    pub add_needed: bool,
    /// Prefer archives over shared objects when resolving -l namespecs.
    pub is_static: bool,
}

impl Default for Attribute {
    fn default() -> Self {
        Self {
            whole_archive: false,
            as_needed: false,
            add_needed: true,
            is_static: false,
        }
    }
}

/// Identity of an interned attribute record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttrId(u32);

impl AttrId {
    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub struct AttributeFactory {
    records: Vec<Attribute>,
    interned: AHashMap<Attribute, AttrId>,
    current: Attribute,
}

impl Default for AttributeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeFactory {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            interned: AHashMap::new(),
            current: Attribute::default(),
        }
    }

    /// The mutable attribute that flag arguments update.
    pub fn current_mut(&mut self) -> &mut Attribute {
        &mut self.current
    }

    pub fn current(&self) -> Attribute {
        self.current
    }

    /// Freezes the current attribute into a shared record and returns its
    /// identity. Equal snapshots always return the same id.
    pub fn snapshot(&mut self) -> AttrId {
        let value = self.current;
        self.record(value)
    }

    pub fn record(&mut self, value: Attribute) -> AttrId {
        if let Some(&id) = self.interned.get(&value) {
            return id;
        }
        let id = AttrId(self.records.len() as u32);
        self.records.push(value);
        self.interned.insert(value, id);
        id
    }

    pub fn get(&self, id: AttrId) -> &Attribute {
        &self.records[id.as_usize()]
    }

    pub(crate) fn num_records(&self) -> usize {
        self.records.len()
    }
}
