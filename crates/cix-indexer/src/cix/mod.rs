//! CIX (Code Intelligence eXchange) codec.
//!
//! The textual symbol-tree format used both as the wire payload of scan
//! responses and as the on-disk cache unit. One element per node, tag = kind,
//! attributes = scalar fields, nested elements = detail records followed by
//! children.

mod reader;
mod writer;

pub use reader::from_cix;
pub use writer::to_cix;

/// Format version written in the `<codeintel>` header.
pub const CIX_VERSION: &str = "3.0";

pub(crate) const ROOT_TAG: &str = "codeintel";

pub(crate) const DOC_TAG: &str = "doc";
pub(crate) const IMPORT_TAG: &str = "import";
pub(crate) const VAR_TAG: &str = "var";
pub(crate) const CLASSREF_TAG: &str = "classref";
pub(crate) const ARG_TAG: &str = "arg";

/// Introduces a character XML cannot carry, written as four hex digits.
/// The marker itself is escaped the same way.
pub(crate) const RAW_CHAR_ESCAPE: char = '\u{E000}';

/// Characters XML 1.0 forbids even as character references.
pub(crate) fn is_unrepresentable(c: char) -> bool {
    matches!(
        c,
        '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}'
    )
}
