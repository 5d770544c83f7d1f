use crate::address::Width;

/// Every fatal usage error this crate can report.
///
/// Each variant carries the context a caller needs to locate the mistake
/// without re-deriving it (label name, item index, the widths involved).
/// There is no recoverable-error path here: all of these indicate a bug in
/// the caller (an unresolved label, a width mismatch, arithmetic that left
/// the representable range) rather than a condition a well-formed caller
/// would routinely need to handle.
#[derive(thiserror::Error, Debug)]
pub enum AssemblerError {
    #[error("label {0:?} was referenced but never placed with `gen_label()`")]
    UnresolvedLabel(crate::item::Label),

    #[error("label {0:?} was placed more than once")]
    LabelRedefinition(crate::item::Label),

    #[error(
        "deferred item at index {index} has no alternative whose check accepted \
         the final layout"
    )]
    UnresolvedDeferred { index: usize },

    #[error("`origin` target address lies behind the block's current position (deferred item at index {index})")]
    OriginBackwards { index: usize },

    #[error(
        "deferred item at index {index} declared a size of {expected} byte(s) but its \
         selected alternative produced {produced}"
    )]
    DeferredSizeMismatch {
        index: usize,
        expected: u32,
        produced: usize,
    },

    #[error("address width mismatch: expected {expected} bits, found {found} bits")]
    AddressWidthMismatch { expected: Width, found: Width },

    #[error("address arithmetic overflowed the representable range of {width} bits")]
    AddressOverflow { width: Width },

    #[error("address arithmetic underflowed below zero for a {width}-bit address")]
    AddressUnderflow { width: Width },

    #[error("address byte representation must be 4 or 8 bytes long, found {0}")]
    InvalidAddressByteLength(usize),

    #[error("width {0} bits is not one of the supported widths (8, 16, 32, 64)")]
    InvalidWidth(u32),

    #[error(
        "link object reported a width of {0} bits, which is not a whole number of bytes"
    )]
    InvalidLinkObjectWidth(u32),

    #[error(
        "link object at byte offset {offset} produced {produced} bytes, expected {expected}"
    )]
    LinkValueLengthMismatch {
        offset: u32,
        expected: u32,
        produced: usize,
    },

    #[error("write of {len} bytes at offset {offset} would run past the end of the block ({block_len} bytes)")]
    OutOfBoundsWrite {
        offset: u32,
        len: usize,
        block_len: usize,
    },

    #[error("`align` was given a non power-of-two alignment: {0}")]
    InvalidAlignment(u32),
}
