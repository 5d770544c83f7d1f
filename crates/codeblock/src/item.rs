//! The symbolic item stream: the sequence of [`Item`]s a [`crate::CodeBlock`]
//! accumulates before assembly resolves it to concrete bytes.
//!
//! Labels and deferred items are referenced by small arena indices rather
//! than by pointer, following the same arena+index idiom `cranelift-entity`
//! uses throughout Cranelift's IR to avoid self-referential/cyclic borrows
//! (a label's definition site and its use sites live in the same `CodeBlock`,
//! so a real reference would alias).

use cranelift_entity::entity_impl;

/// A symbolic reference to a position in a [`crate::CodeBlock`], created by
/// [`crate::CodeBlock::label`] and pinned to a byte offset by
/// [`crate::CodeBlock::gen_label`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);
entity_impl!(Label, "label");

/// A symbolic reference to a deferred item, created by
/// [`crate::CodeBlock::gen_deferred`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deferred(u32);
entity_impl!(Deferred, "deferred");

/// Read-only access to the current, possibly-partial layout during
/// relaxation: the only thing an alternative's `check`/`produce` callback is
/// allowed to observe about the block besides the position it is being asked
/// about.
pub trait LabelSource {
    /// The byte offset of `label`, if it has been placed yet.
    fn label_pos(&self, label: Label) -> Option<u32>;
}

/// One candidate encoding for a deferred item: a predicate over the
/// tentative layout (`check`) and the byte-producing closure used once the
/// layout has converged (`produce`).
///
/// Alternatives for a single deferred item must be supplied narrowest first;
/// [`crate::relax`] never revisits an earlier (smaller) alternative once a
/// later one has been selected, so ordering them any other way can make
/// relaxation fail to converge on the true minimum encoding.
pub struct Alternative {
    /// Given read access to currently-known label positions and this item's
    /// own tentative byte offset, returns the size in bytes this alternative
    /// would occupy if selected, or `None` if it cannot be selected at this
    /// position (e.g. a displacement that does not fit in the alternative's
    /// field width).
    pub check: Box<dyn Fn(&dyn LabelSource, u32) -> Option<u32>>,
    /// Appends this alternative's bytes to `out`, given the same context
    /// `check` was last evaluated with. Called exactly once, after the final
    /// pass has fixed every label's position.
    pub produce: Box<dyn FnMut(&mut Vec<u8>, &dyn LabelSource, u32)>,
}

pub(crate) struct LabelData {
    /// Always populated: either the caller's own name, or an auto-generated
    /// `L<seq>` assigned by [`crate::CodeBlock::gen_label`] at creation time.
    pub name: String,
    pub pos: Option<u32>,
}

pub(crate) struct DeferredData {
    pub alternatives: Vec<Alternative>,
    /// Index of the currently-selected alternative. Strictly monotonic
    /// across relaxation passes — see [`crate::relax`].
    pub current: usize,
    /// Size in bytes of the currently-selected alternative, as last reported
    /// by its `check`.
    pub size: u32,
}

/// One element of a [`crate::CodeBlock`]'s symbolic item stream.
pub enum Item {
    Byte(u8),
    Label(Label),
    Deferred(Deferred),
    /// A human-readable annotation carried alongside the byte stream purely
    /// for [`crate::listing::listing_string`]; contributes no bytes.
    Listing(String),
}
