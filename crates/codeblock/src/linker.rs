//! Required/provided link objects and the [`Linker`] that resolves them.
//!
//! This mirrors `cranelift-codegen`'s `binemit::memorysink` split of concerns
//! into small capability traits (there, `RelocSink`/`TrapSink`; here,
//! [`RequiredLinkObject`]/[`ProvidedLinkObject`]) rather than one fat trait a
//! caller must implement in full even when it only needs half of it.
//!
//! A required site asks "what bytes do I write now that linking has
//! happened?"; a provided site is simply told "you ended up here". The two
//! are matched by identity, not by any bookkeeping this module does: a
//! caller wires them together by giving a required site's `link_value` a
//! shared handle onto the same backing state a provided site's `set_addr`
//! writes into (see [`AddressSlot`] below for a ready-made one). The
//! `Linker` itself only knows how to walk a list of required sites and write
//! whatever bytes each one's `link_value` produces — it never looks at
//! addresses directly.

use crate::address::Address;
use crate::error::AssemblerError;
use std::cell::RefCell;
use std::rc::Rc;

/// A site whose final bytes are produced after linking, typically by
/// reading back an address some matching [`ProvidedLinkObject`] received.
pub trait RequiredLinkObject {
    /// Width in bits of the field this site occupies. Must be a multiple of
    /// 8 and nonzero.
    fn width(&self) -> u32;

    /// Produces the final bytes to write at this site. `dst_addr` is this
    /// site's own final address (`target.base_addr() + offset`), needed by
    /// any PC-relative encoding (a `call rel32`/`jmp rel32` site computes its
    /// displacement from it). Must return exactly `width() / 8` bytes.
    /// Called once per [`Linker::link`] invocation.
    fn link_value(&self, dst_addr: &Address) -> Vec<u8>;
}

/// A site whose own final address is all that's needed — typically, the
/// destination a matching [`RequiredLinkObject`] reads back out.
pub trait ProvidedLinkObject {
    /// Called exactly once, when the block containing this site has been
    /// placed at its final host address.
    fn set_addr(&mut self, addr: Address);
}

/// Anything a [`Linker`] can patch bytes into: implemented by
/// [`crate::MachineCodeBlock`] directly, and by `exec-mem`'s allocated
/// handle once code has been copied into executable memory.
pub trait Patchable {
    fn base_addr(&self) -> Address;
    fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> Result<(), AssemblerError>;
}

/// One required site pending resolution: its byte offset within a block and
/// the link object describing what to write there.
pub struct RequiredSite {
    pub offset: u32,
    pub width_bits: u32,
    pub link_object: Rc<RefCell<dyn RequiredLinkObject>>,
}

/// Resolves every required site in a patchable block by writing whatever
/// bytes each site's link object produces.
///
/// This is the generic half of linking: it has no idea where a link
/// object's value comes from (that's between the caller's required and
/// provided objects) and no platform dependency (that's `Patchable`'s job).
pub struct Linker;

impl Linker {
    pub fn new() -> Linker {
        Linker
    }

    /// Writes every site in `sites` into `target`.
    pub fn link<P: Patchable>(
        &self,
        target: &mut P,
        sites: &[RequiredSite],
    ) -> Result<(), AssemblerError> {
        let base = target.base_addr();
        for site in sites {
            if site.width_bits == 0 || site.width_bits % 8 != 0 {
                return Err(AssemblerError::InvalidLinkObjectWidth(site.width_bits));
            }
            let expected = site.width_bits / 8;
            let dst_addr = base.add_offset(site.offset as i64)?;
            let bytes = site.link_object.borrow().link_value(&dst_addr);
            if bytes.len() as u32 != expected {
                return Err(AssemblerError::LinkValueLengthMismatch {
                    offset: site.offset,
                    expected,
                    produced: bytes.len(),
                });
            }
            log::trace!("linking required site at offset {} (dst_addr {:?})", site.offset, dst_addr);
            target.write_bytes(site.offset, &bytes)?;
        }
        Ok(())
    }
}

impl Default for Linker {
    fn default() -> Linker {
        Linker::new()
    }
}

/// A ready-made provided/required pair sharing a single backing cell, for
/// the common case of "patch in the absolute address of this other site".
///
/// An `AddressSlot` is shared (via `Rc`) between a [`ProvidedSlot`] wrapper
/// — which implements [`ProvidedLinkObject`] and is what actually gets
/// handed to [`crate::CodeBlock::gen_provided`] — and an
/// [`AbsoluteLinkObject`] that reads the address back out once set. Reading
/// the slot before it has been assigned produces all-zero bytes rather than
/// panicking, since `link_value` cannot itself fail.
#[derive(Default)]
pub struct AddressSlot(RefCell<Option<Address>>);

impl AddressSlot {
    pub fn new() -> Rc<AddressSlot> {
        Rc::new(AddressSlot(RefCell::new(None)))
    }

    pub fn get(&self) -> Option<Address> {
        self.0.borrow().clone()
    }

    fn assign(&self, addr: Address) {
        *self.0.borrow_mut() = Some(addr);
    }
}

/// The [`ProvidedLinkObject`] half of an [`AddressSlot`] pair: owns a shared
/// handle onto the slot and writes into it through interior mutability, so
/// the same slot can also be held (via another clone of the `Rc`) by an
/// [`AbsoluteLinkObject`] on the required side.
pub struct ProvidedSlot(pub Rc<AddressSlot>);

impl ProvidedLinkObject for ProvidedSlot {
    fn set_addr(&mut self, addr: Address) {
        self.0.assign(addr);
    }
}

/// Reads an absolute address out of a shared [`AddressSlot`] and writes it
/// in the slot's own endianness, truncated or zero-extended to `width`.
pub struct AbsoluteLinkObject {
    slot: Rc<AddressSlot>,
    width: u32,
}

impl AbsoluteLinkObject {
    pub fn new(slot: Rc<AddressSlot>, width: u32) -> AbsoluteLinkObject {
        AbsoluteLinkObject { slot, width }
    }
}

impl RequiredLinkObject for AbsoluteLinkObject {
    fn width(&self) -> u32 {
        self.width
    }

    fn link_value(&self, _dst_addr: &Address) -> Vec<u8> {
        let n = (self.width / 8) as usize;
        match self.slot.get() {
            Some(addr) => {
                let mut bytes = addr.bytes(None);
                bytes.resize(n, 0);
                bytes
            }
            None => vec![0u8; n],
        }
    }
}

/// Reads an absolute address out of a shared [`AddressSlot`] and writes the
/// signed displacement from the end of this required field
/// (`dst_addr + width/8`) to that address — the PC-relative form a
/// `call rel32`/`jmp rel32` site needs, as opposed to [`AbsoluteLinkObject`]'s
/// plain absolute patch. Only a 32-bit field is supported, matching
/// [`Address::offset_bytes_to`]'s own restriction.
pub struct OffsetLinkObject {
    slot: Rc<AddressSlot>,
    width: u32,
}

impl OffsetLinkObject {
    pub fn new(slot: Rc<AddressSlot>, width: u32) -> OffsetLinkObject {
        OffsetLinkObject { slot, width }
    }
}

impl RequiredLinkObject for OffsetLinkObject {
    fn width(&self) -> u32 {
        self.width
    }

    fn link_value(&self, dst_addr: &Address) -> Vec<u8> {
        let n = (self.width / 8) as usize;
        let computed = self.slot.get().and_then(|target| {
            dst_addr
                .add_offset(n as i64)
                .ok()
                .and_then(|end_of_field| end_of_field.offset_bytes_to(&target, None).ok())
        });
        computed.unwrap_or_else(|| vec![0u8; n])
    }
}
