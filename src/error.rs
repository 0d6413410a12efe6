pub use anyhow::Error;
use std::fmt::Display;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// The tagged error record that crosses our public boundary. Fatal kinds
/// travel inside `anyhow::Error`; recoverable kinds are collected as warnings
/// and reported after the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkError {
    pub kind: ErrorKind,
    pub message: String,
    /// Where the error was detected, e.g. an input name or a symbol name.
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MultipleDefinition,
    UnresolvedSymbol,
    UnsupportedOutputType,
    UnsupportedBitclass,
    DuplicateSectionMapping,
    WeakResolutionConflict,
    IOFault,
}

impl LinkError {
    pub(crate) fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> LinkError {
        LinkError {
            kind,
            message: message.into(),
            location: location.into(),
        }
    }
}

impl Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if !self.location.is_empty() {
            write!(f, " ({})", self.location)?;
        }
        Ok(())
    }
}

impl std::error::Error for LinkError {}

/// Prints a warning. By using our own function for this, it'll be easier to
/// find places that issue warnings if we want to say have a flag to suppress
/// them.
pub(crate) fn warning(message: &str) {
    eprintln!("WARNING: weld: {message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_error_is_a_tagged_variant() {
        let err = LinkError::new(ErrorKind::MultipleDefinition, "multiple definition", "main");
        let through_anyhow: Error = err.clone().into();
        let back = through_anyhow.downcast_ref::<LinkError>().unwrap();
        assert_eq!(back.kind, ErrorKind::MultipleDefinition);
        assert_eq!(back.location, "main");
    }
}
