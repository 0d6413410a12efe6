//! Decides the winner when two symbols of the same name meet. The policy is
//! the standard ELF static-linker rule set; a variant relaxes it for
//! script-defined symbols.

use crate::symbol::Binding;
use crate::symbol::ResolveInfo;
use crate::symbol::SymbolDesc;

/// Outcome of one resolution step. `Again` means the resolver transformed one
/// side and the caller must re-dispatch until a terminal action comes back.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Action {
    Success,
    Warning(String),
    Abort(String),
    Again(AgainTag),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AgainTag {
    /// A weak definition met a common; the weak side was demoted to an
    /// indirect reference so common arbitration can run.
    WeakToCommon,
}

pub(crate) trait Resolver {
    /// Applies the outcome to `old` (the pool entry). `did_override` reports
    /// whether the incoming symbol became the winner.
    fn resolve<'data>(
        &self,
        old: &mut ResolveInfo<'data>,
        new: &ResolveInfo<'data>,
        did_override: &mut bool,
    ) -> Action;
}

/// The GNU ld rule set.
pub(crate) struct GnuLdResolver;

/// Like GNU ld, except that absolute symbols assigned by a linker script are
/// treated as defaults: a real object definition replaces them silently
/// instead of being a duplicate-definition error.
pub(crate) struct LinkerScriptResolver;

impl Resolver for GnuLdResolver {
    fn resolve<'data>(
        &self,
        old: &mut ResolveInfo<'data>,
        new: &ResolveInfo<'data>,
        did_override: &mut bool,
    ) -> Action {
        resolve_with_policy(old, new, did_override, false)
    }
}

impl Resolver for LinkerScriptResolver {
    fn resolve<'data>(
        &self,
        old: &mut ResolveInfo<'data>,
        new: &ResolveInfo<'data>,
        did_override: &mut bool,
    ) -> Action {
        resolve_with_policy(old, new, did_override, true)
    }
}

fn is_reference(info: &ResolveInfo) -> bool {
    matches!(info.desc, SymbolDesc::Undefined | SymbolDesc::IndirectWeak)
}

fn resolve_with_policy<'data>(
    old: &mut ResolveInfo<'data>,
    new: &ResolveInfo<'data>,
    did_override: &mut bool,
    script_absolutes_yield: bool,
) -> Action {
    // Visibility tightens monotonically regardless of which side wins.
    old.visibility = old.visibility.most_restrictive(new.visibility);

    // A reference never displaces anything; it can only strengthen an
    // existing reference.
    if is_reference(new) {
        if is_reference(old) && old.is_weak() && new.binding == Binding::Global {
            old.binding = Binding::Global;
        }
        return Action::Success;
    }

    if is_reference(old) {
        *did_override = true;
        old.override_with(new);
        return Action::Success;
    }

    // Both sides carry a definition or a common from here on.

    // A symbol first seen in a dynamic object is provisional: any regular
    // definition replaces it, and a dynamic definition never replaces a
    // regular one.
    match (old.is_dyn(), new.is_dyn()) {
        (true, false) => {
            *did_override = true;
            old.override_with(new);
            return Action::Success;
        }
        (false, true) | (true, true) => return Action::Success,
        (false, false) => {}
    }

    match (old.desc, new.desc) {
        (SymbolDesc::Common, SymbolDesc::Common) => {
            // Larger tentative definition wins; alignment (carried in the
            // value slot) is the max of both either way.
            let alignment = old.value.max(new.value);
            if new.size > old.size {
                *did_override = true;
                old.override_with(new);
            }
            old.value = alignment;
            Action::Success
        }
        (SymbolDesc::Common, SymbolDesc::Define) => {
            if new.is_weak() {
                // A common outranks a weak definition.
                return Action::Success;
            }
            let common_size = old.size;
            *did_override = true;
            old.override_with(new);
            if common_size > new.size {
                Action::Warning(format!(
                    "definition of `{}` ({} bytes) overrides larger common ({} bytes)",
                    new.name, new.size, common_size
                ))
            } else {
                Action::Success
            }
        }
        (SymbolDesc::Define, SymbolDesc::Common) => {
            if old.is_weak() {
                // Demote the weak definition and re-enter so the common
                // arbitration above decides.
                old.desc = SymbolDesc::IndirectWeak;
                return Action::Again(AgainTag::WeakToCommon);
            }
            Action::Success
        }
        (SymbolDesc::Define, SymbolDesc::Define) => {
            match (old.is_weak(), new.is_weak()) {
                // Global overrides weak, silently in both directions.
                (true, false) => {
                    *did_override = true;
                    old.override_with(new);
                    Action::Success
                }
                (false, true) | (true, true) => Action::Success,
                (false, false) => {
                    if script_absolutes_yield {
                        if old.binding == Binding::Absolute {
                            *did_override = true;
                            old.override_with(new);
                            return Action::Success;
                        }
                        if new.binding == Binding::Absolute {
                            return Action::Success;
                        }
                    }
                    Action::Abort(format!("multiple definition of `{}`", new.name))
                }
            }
        }
        // `is_reference` filtered Undefined and IndirectWeak out above.
        _ => unreachable!("reference descriptors handled earlier"),
    }
}
