//! `listing_string`: a pure, read-only rendering of a finished item stream.
//!
//! Grounded on the general shape of `cranelift-codegen`'s disassembly
//! helpers (a borrowed walk over already-placed code, never mutating
//! anything) rather than any one file, since per-ISA disassembly itself is
//! out of this crate's scope. Positions are always printed as a single
//! numeric value formatted most-significant-digit-first — the
//! straightforward, and only sane, rendering; an earlier informal
//! description of this routine is on record as having printed address
//! limbs in their little-endian storage order instead, which reads
//! backwards to a human. This implementation does not reproduce that.

use crate::item::{Deferred, DeferredData, Item, Label, LabelData};
use cranelift_entity::PrimaryMap;
use std::fmt::Write as _;

/// Column at which a row's trailing annotation (label name, listing comment,
/// deferred placeholder) begins once its bytes have been printed.
const TEXT_COL: usize = 32;
/// Columns occupied by one printed byte (`"xx "`).
const BYTE_WIDTH: usize = 3;
/// Bytes printed per row before wrapping to a fresh position prefix.
const BYTES_PER_ROW: usize = TEXT_COL - BYTE_WIDTH;

fn flush_row(out: &mut String, row_start: u32, row_bytes: &mut Vec<u8>, annotations: &mut Vec<String>) {
    if row_bytes.is_empty() && annotations.is_empty() {
        return;
    }
    write!(out, "{:06x}: ", row_start).unwrap();
    let mut col = 0usize;
    for b in row_bytes.iter() {
        write!(out, "{:02x} ", b).unwrap();
        col += BYTE_WIDTH;
    }
    if !annotations.is_empty() {
        while col < TEXT_COL {
            out.push(' ');
            col += 1;
        }
        out.push_str(&annotations.join(" "));
    }
    out.push('\n');
    row_bytes.clear();
    annotations.clear();
}

/// Renders `items` as a sequence of fixed-width rows: a 6-digit hex position
/// prefix, up to [`BYTES_PER_ROW`] bytes each in a 3-column `"xx "` slot,
/// and — once the byte columns are exhausted or the row ends — any label
/// names, deferred placeholders, or listing comments that fell within it,
/// right-padded to [`TEXT_COL`] and space-joined.
///
/// Only bytes whose position falls in `[from, to)` are printed (`to = None`
/// means "through the end of the block"); bytes outside the slice are
/// skipped but still advance the running position, so labels and deferred
/// placeholders after a skipped span still print their real address.
///
/// This never mutates `labels` or `deferreds`: it only reads positions and
/// sizes that a prior call to `assemble` (or the relaxation pass it runs)
/// has already settled.
pub(crate) fn listing_string(
    items: &[Item],
    labels: &PrimaryMap<Label, LabelData>,
    deferreds: &PrimaryMap<Deferred, DeferredData>,
    start_pos: u32,
    from: u32,
    to: Option<u32>,
) -> String {
    let mut out = String::new();
    let mut pos = start_pos;
    let mut row_start = start_pos.max(from);
    let mut row_bytes: Vec<u8> = Vec::new();
    let mut annotations: Vec<String> = Vec::new();

    let in_range = |p: u32| p >= from && to.map_or(true, |to| p < to);

    for item in items {
        match item {
            Item::Byte(b) => {
                if in_range(pos) {
                    if row_bytes.is_empty() {
                        row_start = pos;
                    }
                    row_bytes.push(*b);
                }
                pos += 1;
                if row_bytes.len() >= BYTES_PER_ROW {
                    flush_row(&mut out, row_start, &mut row_bytes, &mut annotations);
                }
            }
            Item::Label(l) => {
                if in_range(pos) {
                    annotations.push(format!("{}:", labels[*l].name));
                }
            }
            Item::Deferred(d) => {
                let dd = &deferreds[*d];
                if in_range(pos) {
                    annotations.push(format!("<deferred {} byte(s), alt {}>", dd.size, dd.current));
                }
                pos += dd.size;
            }
            Item::Listing(comment) => {
                if in_range(pos) {
                    annotations.push(format!("; {}", comment));
                }
            }
        }
    }
    flush_row(&mut out, row_start, &mut row_bytes, &mut annotations);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_rendered_most_significant_digit_first() {
        let labels: PrimaryMap<Label, LabelData> = PrimaryMap::new();
        let deferreds: PrimaryMap<Deferred, DeferredData> = PrimaryMap::new();
        let items = vec![Item::Byte(0xab), Item::Byte(0xcd)];
        let s = listing_string(&items, &labels, &deferreds, 0x10, 0x10, None);
        let first_line = s.lines().next().unwrap();
        assert!(first_line.starts_with("000010: ab"));
    }

    #[test]
    fn row_wraps_after_bytes_per_row() {
        let labels: PrimaryMap<Label, LabelData> = PrimaryMap::new();
        let deferreds: PrimaryMap<Deferred, DeferredData> = PrimaryMap::new();
        let items: Vec<Item> = (0..(BYTES_PER_ROW + 1) as u8).map(Item::Byte).collect();
        let s = listing_string(&items, &labels, &deferreds, 0, 0, None);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with(&format!("{:06x}: ", BYTES_PER_ROW)));
    }

    #[test]
    fn annotation_is_right_padded_to_text_col() {
        let mut labels: PrimaryMap<Label, LabelData> = PrimaryMap::new();
        let l = labels.push(LabelData {
            name: "top".to_string(),
            pos: Some(0),
        });
        let deferreds: PrimaryMap<Deferred, DeferredData> = PrimaryMap::new();
        let items = vec![Item::Byte(0x90), Item::Label(l)];
        let s = listing_string(&items, &labels, &deferreds, 0, 0, None);
        let line = s.lines().next().unwrap();
        assert!(line.ends_with("top:"));
        assert!(line.len() >= TEXT_COL + "000000: ".len());
    }

    #[test]
    fn bytes_outside_the_range_are_skipped_but_still_advance_position() {
        let mut labels: PrimaryMap<Label, LabelData> = PrimaryMap::new();
        let l = labels.push(LabelData {
            name: "after".to_string(),
            pos: Some(3),
        });
        let deferreds: PrimaryMap<Deferred, DeferredData> = PrimaryMap::new();
        let items = vec![
            Item::Byte(1),
            Item::Byte(2),
            Item::Byte(3),
            Item::Label(l),
            Item::Byte(4),
        ];
        let s = listing_string(&items, &labels, &deferreds, 0, 3, None);
        assert!(!s.contains("01"));
        assert!(!s.contains("02"));
        assert!(!s.contains("03"));
        assert!(s.contains("04"));
        assert!(s.contains("after:"));
    }
}
