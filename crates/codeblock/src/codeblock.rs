//! [`CodeBlock`]: the symbolic item stream, its primitive emitters, and
//! assembly to concrete bytes.
//!
//! The overall shape — accumulate a symbolic stream, then walk it once to
//! produce bytes via a sink — follows `cranelift-codegen`'s `CodeSink`/
//! `MemoryCodeSink` split (`binemit/memorysink.rs`): there, a `TargetIsa`
//! pushes `put1`/`put2`/`put4`/`put8` calls at a live `CodeSink`; here, a
//! caller pushes bytes, labels and deferred items onto a `CodeBlock`, which
//! plays the sink's role of tracking the running offset (`self.cursor`,
//! matching `MemoryCodeSink::offset`) until the whole stream is resolved.

use crate::address::Address;
use crate::error::AssemblerError;
use crate::item::{Alternative, Deferred, DeferredData, Item, Label, LabelData};
use crate::linker::{Linker, ProvidedLinkObject, RequiredLinkObject, RequiredSite};
use crate::listing;
use crate::relax::{self, LabelsView};
use cranelift_entity::PrimaryMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Construction-time configuration for a [`CodeBlock`], in the same spirit
/// as `cranelift_jit::JITBuilder`'s defaulted builder struct.
#[derive(Clone, Debug)]
pub struct CodeBlockConfig {
    /// The byte offset the first item in the block is considered to start
    /// at. Most callers leave this at `0`; it matters when a block's final
    /// bytes will be placed somewhere other than offset zero of whatever it
    /// is copied into and downstream displacement calculations need to
    /// account for that from the very first `check` call.
    pub start_pos: u32,
    /// Byte order used by `gen16`/`gen32`/`gen64`/`gen_number` and by
    /// `Address::bytes` calls that don't specify an explicit endianness.
    pub big_endian: bool,
    /// Whether `Item::Listing` annotations inserted via
    /// [`CodeBlock::gen_listing`] are retained. When `false`, they are
    /// dropped immediately instead of being stored, saving the allocation
    /// for callers who never call `listing_string`.
    pub use_listing: bool,
}

impl Default for CodeBlockConfig {
    fn default() -> CodeBlockConfig {
        CodeBlockConfig {
            start_pos: 0,
            big_endian: false,
            use_listing: false,
        }
    }
}

/// The result of [`CodeBlock::assemble`]: concrete bytes plus the required
/// link sites still pending resolution by a [`Linker`].
///
/// Provided sites have already had `set_addr` invoked by the time this is
/// returned, since `assemble_to_machine_code_block` is given the base
/// address up front; only required sites, whose value may depend on other
/// blocks not yet assembled, are left outstanding.
pub struct MachineCodeBlock {
    pub base_addr: Address,
    pub bytes: Vec<u8>,
    pub required: Vec<RequiredSite>,
}

impl crate::linker::Patchable for MachineCodeBlock {
    fn base_addr(&self) -> Address {
        self.base_addr.copy()
    }

    fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> Result<(), AssemblerError> {
        let offset = offset as usize;
        if offset + bytes.len() > self.bytes.len() {
            return Err(AssemblerError::OutOfBoundsWrite {
                offset: offset as u32,
                len: bytes.len(),
                block_len: self.bytes.len(),
            });
        }
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// A symbolic, ISA-agnostic code-item stream.
///
/// Bytes, labels, deferred (relaxable) items and listing annotations
/// accumulate in emission order; [`CodeBlock::assemble`] runs the fixed
/// point relaxation pass described in [`crate::relax`] and produces the
/// final byte sequence.
pub struct CodeBlock {
    config: CodeBlockConfig,
    items: Vec<Item>,
    labels: PrimaryMap<Label, LabelData>,
    deferreds: PrimaryMap<Deferred, DeferredData>,
    required: Vec<(Label, u32, Rc<RefCell<dyn RequiredLinkObject>>)>,
    provided: Vec<(Label, Box<dyn ProvidedLinkObject>)>,
    cursor: u32,
    /// Counter backing auto-generated `L<seq>` label names. Owned per-block
    /// (unlike a process-wide counter) so distinct blocks produce
    /// reproducible listings independent of creation order elsewhere.
    label_seq: u32,
    /// Deferred items created by `origin`, so `assemble` can report the more
    /// specific `OriginBackwards` error instead of the generic
    /// `UnresolvedDeferred` any other exhausted deferred would raise.
    origin_deferreds: std::collections::HashSet<Deferred>,
}

impl CodeBlock {
    pub fn new(config: CodeBlockConfig) -> CodeBlock {
        let cursor = config.start_pos;
        CodeBlock {
            config,
            items: Vec::new(),
            labels: PrimaryMap::new(),
            deferreds: PrimaryMap::new(),
            required: Vec::new(),
            provided: Vec::new(),
            cursor,
            label_seq: 0,
            origin_deferreds: std::collections::HashSet::new(),
        }
    }

    pub fn config(&self) -> &CodeBlockConfig {
        &self.config
    }

    /// The running byte position after everything emitted so far, using
    /// each deferred item's currently-selected alternative size as an
    /// optimistic estimate. This matches what `assemble` will produce only
    /// once relaxation has converged; before that, it is a lower bound,
    /// exactly as `MemoryCodeSink::offset` is only meaningful once a whole
    /// function's encodings have been finalized.
    pub fn byte_count(&self) -> u32 {
        self.cursor
    }

    pub fn gen8(&mut self, byte: u8) -> &mut Self {
        self.items.push(Item::Byte(byte));
        self.cursor += 1;
        self
    }

    pub fn gen16(&mut self, value: u16) -> &mut Self {
        self.emit_bytes(value as u64, 2)
    }

    pub fn gen32(&mut self, value: u32) -> &mut Self {
        self.emit_bytes(value as u64, 4)
    }

    pub fn gen64(&mut self, value: u64) -> &mut Self {
        self.emit_bytes(value, 8)
    }

    /// Dispatches to the emitter matching `width` (one of 8, 16, 32, 64),
    /// appending the low `width` bits of `value` in the block's configured
    /// endianness. Any other width is a fatal usage error.
    pub fn gen_number(&mut self, width: u32, value: u64) -> Result<&mut Self, AssemblerError> {
        let nbytes = match width {
            8 => 1,
            16 => 2,
            32 => 4,
            64 => 8,
            other => return Err(AssemblerError::InvalidWidth(other)),
        };
        Ok(self.emit_bytes(value, nbytes))
    }

    fn emit_bytes(&mut self, value: u64, nbytes: u32) -> &mut Self {
        if self.config.big_endian {
            for i in (0..nbytes).rev() {
                self.gen8(((value >> (8 * i)) & 0xff) as u8);
            }
        } else {
            for i in 0..nbytes {
                self.gen8(((value >> (8 * i)) & 0xff) as u8);
            }
        }
        self
    }

    /// Inserts a read-only annotation at the current position, retained
    /// only if `config.use_listing` is set.
    pub fn gen_listing(&mut self, text: impl Into<String>) -> &mut Self {
        if self.config.use_listing {
            self.items.push(Item::Listing(text.into()));
        }
        self
    }

    /// Creates a new, as-yet-unplaced label. `name` is used only for
    /// diagnostics (`listing_string`); when omitted, a sequential `L<seq>`
    /// name is assigned from this block's own counter, so listings stay
    /// reproducible independent of any other block's label creation order.
    pub fn label(&mut self, name: Option<String>) -> Label {
        let name = name.unwrap_or_else(|| {
            let seq = self.label_seq;
            self.label_seq += 1;
            format!("L{}", seq)
        });
        self.labels.push(LabelData { name, pos: None })
    }

    /// Places `label` at the current position. A label may only be placed
    /// once.
    pub fn gen_label(&mut self, label: Label) -> Result<&mut Self, AssemblerError> {
        if self.labels[label].pos.is_some() {
            return Err(AssemblerError::LabelRedefinition(label));
        }
        // Marked placed immediately so a second `gen_label()` call is
        // rejected even before the first relaxation pass has run; `relax`
        // will overwrite `pos` with the converged value.
        self.labels[label].pos = Some(self.cursor);
        self.items.push(Item::Label(label));
        Ok(self)
    }

    /// Convenience combining `label` and `gen_label` for the common case of
    /// a label that is placed exactly where it is declared.
    pub fn gen_label_here(&mut self, name: Option<String>) -> Result<Label, AssemblerError> {
        let label = self.label(name);
        self.gen_label(label)?;
        Ok(label)
    }

    /// Inserts a deferred item with the given alternatives, narrowest
    /// first, and an initial size estimate used for `byte_count` until
    /// relaxation runs. See [`crate::item::Alternative`] for the ordering
    /// requirement.
    pub fn gen_deferred(&mut self, initial_size: u32, alternatives: Vec<Alternative>) -> Deferred {
        let d = self.deferreds.push(DeferredData {
            alternatives,
            current: 0,
            size: initial_size,
        });
        self.items.push(Item::Deferred(d));
        self.cursor += initial_size;
        d
    }

    /// Pads with `fill_byte` until the position `p` satisfies
    /// `p % alignment == offset % alignment`, where `alignment` must be a
    /// nonzero power of two.
    pub fn align(
        &mut self,
        alignment: u32,
        offset: u32,
        fill_byte: u8,
    ) -> Result<&mut Self, AssemblerError> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(AssemblerError::InvalidAlignment(alignment));
        }
        let mask = alignment - 1;
        let target_phase = offset & mask;
        let pad_for = move |pos: u32| (target_phase.wrapping_sub(pos & mask)) & mask;
        let check: Box<dyn Fn(&dyn crate::item::LabelSource, u32) -> Option<u32>> =
            Box::new(move |_src, pos| Some(pad_for(pos)));
        let produce: Box<dyn FnMut(&mut Vec<u8>, &dyn crate::item::LabelSource, u32)> =
            Box::new(move |out, _src, pos| {
                out.extend(std::iter::repeat(fill_byte).take(pad_for(pos) as usize));
            });
        let estimate = pad_for(self.cursor);
        self.gen_deferred(estimate, vec![Alternative { check, produce }]);
        Ok(self)
    }

    /// Pads with `fill_byte` until the position equals `target`'s value,
    /// which must not be behind the current position. `origin` is a real
    /// padding operation, not a no-op: it actually advances the block to
    /// `target`.
    pub fn origin(&mut self, target: &Address, fill_byte: u8) -> Result<&mut Self, AssemblerError> {
        let target_pos = target.value() as u32;
        let check: Box<dyn Fn(&dyn crate::item::LabelSource, u32) -> Option<u32>> =
            Box::new(move |_src, pos| {
                if pos > target_pos {
                    None
                } else {
                    Some(target_pos - pos)
                }
            });
        let produce: Box<dyn FnMut(&mut Vec<u8>, &dyn crate::item::LabelSource, u32)> =
            Box::new(move |out, _src, pos| {
                out.extend(std::iter::repeat(fill_byte).take((target_pos - pos) as usize));
            });
        let estimate = target_pos.saturating_sub(self.cursor);
        let d = self.gen_deferred(estimate, vec![Alternative { check, produce }]);
        self.origin_deferreds.insert(d);
        Ok(self)
    }

    /// Reserves space for a required link site and records it for a later
    /// [`Linker::link`] call. The reserved bytes are zero until linked.
    pub fn gen_required(
        &mut self,
        link_object: Rc<RefCell<dyn RequiredLinkObject>>,
    ) -> Result<Label, AssemblerError> {
        let width = link_object.borrow().width();
        if width == 0 || width % 8 != 0 {
            return Err(AssemblerError::InvalidLinkObjectWidth(width));
        }
        let anchor = self.gen_label_here(None)?;
        for _ in 0..(width / 8) {
            self.gen8(0);
        }
        self.required.push((anchor, width, link_object));
        Ok(anchor)
    }

    /// Marks the current position as a provided site: once the block is
    /// assembled to a base address, `link_object.set_addr` is invoked with
    /// this position's final address. Occupies no bytes of its own.
    pub fn gen_provided(&mut self, link_object: Box<dyn ProvidedLinkObject>) -> Result<Label, AssemblerError> {
        let anchor = self.gen_label_here(None)?;
        self.provided.push((anchor, link_object));
        Ok(anchor)
    }

    /// Runs relaxation to a fixed point and returns the concrete byte
    /// sequence. Required/provided link sites are left unresolved; use
    /// [`CodeBlock::assemble_to_machine_code_block`] to also resolve
    /// provided sites against a base address.
    pub fn assemble(&mut self) -> Result<Vec<u8>, AssemblerError> {
        let (placements, _len) = relax::relax(
            &self.items,
            &mut self.labels,
            &mut self.deferreds,
            self.config.start_pos,
        )
        .map_err(|e| match e {
            AssemblerError::UnresolvedDeferred { index }
                if self
                    .origin_deferreds
                    .contains(&cranelift_entity::EntityRef::new(index)) =>
            {
                AssemblerError::OriginBackwards { index }
            }
            other => other,
        })?;
        let mut out = Vec::new();
        for item in &self.items {
            match item {
                Item::Byte(b) => out.push(*b),
                Item::Label(_) => {}
                Item::Deferred(d) => {
                    let pos = placements[*d].pos;
                    let current = self.deferreds[*d].current;
                    let expected = self.deferreds[*d].size;
                    let before = out.len();
                    let source = LabelsView(&self.labels);
                    (self.deferreds[*d].alternatives[current].produce)(&mut out, &source, pos);
                    let produced = out.len() - before;
                    if produced as u32 != expected {
                        return Err(AssemblerError::DeferredSizeMismatch {
                            index: cranelift_entity::EntityRef::index(*d),
                            expected,
                            produced,
                        });
                    }
                }
                Item::Listing(_) => {}
            }
        }
        Ok(out)
    }

    /// Assembles the block and anchors it at `base_addr`: every provided
    /// site receives its final address via `set_addr`, and every required
    /// site is carried forward (unresolved) in the returned
    /// [`MachineCodeBlock`] for a later [`Linker::link`] call.
    pub fn assemble_to_machine_code_block(
        &mut self,
        base_addr: Address,
    ) -> Result<MachineCodeBlock, AssemblerError> {
        let bytes = self.assemble()?;
        for (anchor, link_object) in &mut self.provided {
            let offset = self.labels[*anchor]
                .pos
                .ok_or(AssemblerError::UnresolvedLabel(*anchor))?;
            let offset = offset
                .checked_sub(self.config.start_pos)
                .expect("label position is never before start_pos");
            let addr = base_addr.add_offset(offset as i64)?;
            log::debug!("provided site {:?} resolved to {:?}", anchor, addr);
            link_object.set_addr(addr);
        }
        let mut required = Vec::with_capacity(self.required.len());
        for (anchor, width, link_object) in &self.required {
            let offset = self.labels[*anchor]
                .pos
                .ok_or(AssemblerError::UnresolvedLabel(*anchor))?;
            let offset = offset - self.config.start_pos;
            required.push(RequiredSite {
                offset,
                width_bits: *width,
                link_object: link_object.clone(),
            });
        }
        Ok(MachineCodeBlock {
            base_addr,
            bytes,
            required,
        })
    }

    /// Renders the item stream as human-readable text, covering byte
    /// positions in `[from, to)` (`to = None` meaning through the end of the
    /// block). Bytes outside that range are omitted but still count towards
    /// the positions shown for whatever follows them. Safe to call before
    /// `assemble`, but deferred items and unresolved labels will show their
    /// as-yet-provisional state rather than their final one.
    pub fn listing_string(&self, from: u32, to: Option<u32>) -> String {
        listing::listing_string(
            &self.items,
            &self.labels,
            &self.deferreds,
            self.config.start_pos,
            from,
            to,
        )
    }

    /// Convenience: runs a [`Linker`] over `target` using this block's own
    /// required sites. Typically called on the [`MachineCodeBlock`]
    /// produced by `assemble_to_machine_code_block`, or on whatever
    /// `exec-mem` handle the bytes were copied into.
    pub fn link<P: crate::linker::Patchable>(
        target: &mut P,
        required: &[RequiredSite],
    ) -> Result<(), AssemblerError> {
        Linker::new().link(target, required)
    }
}
