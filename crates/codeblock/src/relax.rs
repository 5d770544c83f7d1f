//! Fixed-point relaxation: choosing the smallest alternative for every
//! deferred item and the final byte offset of every label.
//!
//! This follows the same shape as `cranelift-codegen`'s
//! `binemit::relaxation::relax_branches`: repeatedly walk the item stream in
//! order, re-deriving byte offsets from the currently-selected alternative
//! sizes, and re-checking each deferred item's current alternative against
//! the (possibly still-stale) offsets produced by the walk so far. A forward
//! reference sees last iteration's offset for anything not yet visited this
//! pass; a backward reference sees this iteration's freshly-updated offset.
//! The walk repeats until nothing changes.
//!
//! The one deliberate departure from `relax_branch`'s own algorithm:
//! `current` (the selected-alternative index) is strictly monotonic here.
//! `relax_branch` instead recomputes the *globally* smallest encoding that
//! fits on every pass via `min_by_key`, which can occasionally oscillate
//! back down a size the moment a more distant label moves closer
//! again. That is fine for a single self-contained function body relaxed in
//! one shot, but this crate's deferred items can be long-lived (re-relaxed
//! as later code is appended to the same block), where an oscillating
//! selection can defeat the termination argument below. Never revisiting a
//! smaller alternative after a larger one has been selected sacrifices
//! optimality in rare mutually-dependent cases in exchange for a hard
//! termination guarantee.
//!
//! Termination: every pass in which `go_again` is set either advances some
//! deferred's `current` (bounded by its alternative count) or grows some
//! deferred's `size` (bounded above by its final, always-fits alternative).
//! Both are monotonically non-decreasing and bounded, so the loop cannot run
//! forever.

use crate::error::AssemblerError;
use crate::item::{Deferred, DeferredData, Item, Label, LabelData, LabelSource};
use cranelift_entity::{EntityRef, PrimaryMap};

pub(crate) struct LabelsView<'a>(pub &'a PrimaryMap<Label, LabelData>);

impl<'a> LabelSource for LabelsView<'a> {
    fn label_pos(&self, label: Label) -> Option<u32> {
        self.0[label].pos
    }
}

/// Per-deferred bookkeeping produced by a completed relaxation pass: the
/// byte offset its item began at, for use by the final emission walk.
pub(crate) struct DeferredPlacement {
    pub pos: u32,
}

/// Runs the fixed-point relaxation loop over `items`, updating `labels` and
/// `deferreds` in place. Returns each deferred item's final byte offset, in
/// the same order as `deferreds`' arena indices, along with the total byte
/// length of the block.
pub(crate) fn relax(
    items: &[Item],
    labels: &mut PrimaryMap<Label, LabelData>,
    deferreds: &mut PrimaryMap<Deferred, DeferredData>,
    start_pos: u32,
) -> Result<(PrimaryMap<Deferred, DeferredPlacement>, u32), AssemblerError> {
    let mut placements: PrimaryMap<Deferred, DeferredPlacement> = PrimaryMap::new();
    for _ in deferreds.iter() {
        placements.push(DeferredPlacement { pos: start_pos });
    }

    let mut go_again = true;
    let mut final_len = start_pos;
    while go_again {
        go_again = false;
        let mut pos = start_pos;

        for item in items {
            match item {
                Item::Byte(_) => pos += 1,
                Item::Label(l) => {
                    if labels[*l].pos != Some(pos) {
                        log::trace!("placing {:?} at offset {}", l, pos);
                        labels[*l].pos = Some(pos);
                        go_again = true;
                    }
                }
                Item::Deferred(d) => {
                    let this_pos = pos;
                    placements[*d].pos = this_pos;

                    let size = loop {
                        let current = deferreds[*d].current;
                        let result = {
                            let source = LabelsView(labels);
                            (deferreds[*d].alternatives[current].check)(&source, this_pos)
                        };
                        match result {
                            Some(size) => break size,
                            None => {
                                let alt_count = deferreds[*d].alternatives.len();
                                if current + 1 >= alt_count {
                                    return Err(AssemblerError::UnresolvedDeferred {
                                        index: d.index(),
                                    });
                                }
                                log::debug!(
                                    "{:?} alternative {} rejected at offset {}, advancing",
                                    d,
                                    current,
                                    this_pos
                                );
                                deferreds[*d].current += 1;
                                go_again = true;
                            }
                        }
                    };

                    let dd = &mut deferreds[*d];
                    if dd.size != size {
                        dd.size = size;
                        go_again = true;
                    }
                    pos += size;
                }
                Item::Listing(_) => {}
            }
        }
        final_len = pos;
    }

    Ok((placements, final_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn mk_label(labels: &mut PrimaryMap<Label, LabelData>) -> Label {
        labels.push(LabelData {
            name: "L0".to_string(),
            pos: None,
        })
    }

    #[test]
    fn converges_with_no_deferreds() {
        let mut labels = PrimaryMap::new();
        let l0 = mk_label(&mut labels);
        let items = vec![Item::Byte(1), Item::Byte(2), Item::Label(l0), Item::Byte(3)];
        let mut deferreds = PrimaryMap::new();
        let (_, len) = relax(&items, &mut labels, &mut deferreds, 0).unwrap();
        assert_eq!(len, 3);
        assert_eq!(labels[l0].pos, Some(2));
    }

    #[test]
    fn picks_short_form_when_target_is_near() {
        let mut labels = PrimaryMap::new();
        let target = mk_label(&mut labels);
        let mut deferreds: PrimaryMap<Deferred, DeferredData> = PrimaryMap::new();
        let d = deferreds.push(DeferredData {
            alternatives: vec![
                crate::item::Alternative {
                    check: Box::new(|src, pos| {
                        let dest = src.label_pos(Label::new(0))?;
                        let disp = dest as i64 - pos as i64 - 2;
                        if (-128..=127).contains(&disp) {
                            Some(2)
                        } else {
                            None
                        }
                    }),
                    produce: Box::new(|out, _src, _pos| out.extend_from_slice(&[0xeb, 0x00])),
                },
                crate::item::Alternative {
                    check: Box::new(|_src, _pos| Some(5)),
                    produce: Box::new(|out, _src, _pos| out.extend_from_slice(&[0xe9, 0, 0, 0, 0])),
                },
            ],
            current: 0,
            size: 0,
        });
        let items = vec![Item::Deferred(d), Item::Label(target)];
        let (placements, len) = relax(&items, &mut labels, &mut deferreds, 0).unwrap();
        assert_eq!(deferreds[d].current, 0);
        assert_eq!(deferreds[d].size, 2);
        assert_eq!(placements[d].pos, 0);
        assert_eq!(len, 2);
    }

    #[test]
    fn advances_to_long_form_when_target_is_far() {
        let mut labels = PrimaryMap::new();
        let target = mk_label(&mut labels);
        let mut deferreds: PrimaryMap<Deferred, DeferredData> = PrimaryMap::new();
        let d = deferreds.push(DeferredData {
            alternatives: vec![
                crate::item::Alternative {
                    check: Box::new(|src, pos| {
                        let dest = src.label_pos(Label::new(0))?;
                        let disp = dest as i64 - pos as i64 - 2;
                        if (-128..=127).contains(&disp) {
                            Some(2)
                        } else {
                            None
                        }
                    }),
                    produce: Box::new(|out, _src, _pos| out.extend_from_slice(&[0xeb, 0x00])),
                },
                crate::item::Alternative {
                    check: Box::new(|_src, _pos| Some(5)),
                    produce: Box::new(|out, _src, _pos| out.extend_from_slice(&[0xe9, 0, 0, 0, 0])),
                },
            ],
            current: 0,
            size: 0,
        });
        let mut items = vec![Item::Deferred(d)];
        for _ in 0..200 {
            items.push(Item::Byte(0x90));
        }
        items.push(Item::Label(target));
        let (_, len) = relax(&items, &mut labels, &mut deferreds, 0).unwrap();
        assert_eq!(deferreds[d].current, 1);
        assert_eq!(deferreds[d].size, 5);
        assert_eq!(len, 205);
    }

    /// Two forward jumps sharing one distant target label: short is only
    /// ever valid for either one if the *other* has already committed to a
    /// size small enough to keep the shared target in range, so neither can
    /// be decided in isolation. Monotonic `current` resolves this without
    /// oscillating — both escalate to the long form and stay there, rather
    /// than flip-flopping as the other's size changes underneath it.
    #[test]
    fn mutually_coupled_deferreds_converge_to_long_without_oscillating() {
        fn short_or_long() -> Vec<crate::item::Alternative> {
            vec![
                crate::item::Alternative {
                    check: Box::new(|src, pos| {
                        let dest = src.label_pos(Label::new(0))?;
                        let disp = dest as i64 - pos as i64 - 2;
                        if (-128..=127).contains(&disp) {
                            Some(2)
                        } else {
                            None
                        }
                    }),
                    produce: Box::new(|out, _src, _pos| out.extend_from_slice(&[0xeb, 0x00])),
                },
                crate::item::Alternative {
                    check: Box::new(|_src, _pos| Some(5)),
                    produce: Box::new(|out, _src, _pos| out.extend_from_slice(&[0xe9, 0, 0, 0, 0])),
                },
            ]
        }

        let mut labels = PrimaryMap::new();
        let target = mk_label(&mut labels);
        let mut deferreds: PrimaryMap<Deferred, DeferredData> = PrimaryMap::new();
        let a = deferreds.push(DeferredData {
            alternatives: short_or_long(),
            current: 0,
            size: 0,
        });
        let b = deferreds.push(DeferredData {
            alternatives: short_or_long(),
            current: 0,
            size: 0,
        });

        let mut items = vec![Item::Deferred(a)];
        for _ in 0..150 {
            items.push(Item::Byte(0x90));
        }
        items.push(Item::Deferred(b));
        items.push(Item::Label(target));

        let (_, len) = relax(&items, &mut labels, &mut deferreds, 0).unwrap();

        // Neither jump can reach the shared target in 2 bytes once the 150
        // filler bytes and the other jump's own size are accounted for, so
        // both must have escalated, and stayed escalated, to the long form.
        assert_eq!(deferreds[a].current, 1);
        assert_eq!(deferreds[b].current, 1);
        assert_eq!(deferreds[a].size, 5);
        assert_eq!(deferreds[b].size, 5);
        assert_eq!(len, 150 + 5 + 5);
    }

    #[test]
    fn exhausting_alternatives_is_an_error() {
        let mut labels: PrimaryMap<Label, LabelData> = PrimaryMap::new();
        let mut deferreds: PrimaryMap<Deferred, DeferredData> = PrimaryMap::new();
        let d = deferreds.push(DeferredData {
            alternatives: vec![crate::item::Alternative {
                check: Box::new(|_src, _pos| None),
                produce: Box::new(|_out, _src, _pos| {}),
            }],
            current: 0,
            size: 0,
        });
        let items = vec![Item::Deferred(d)];
        assert!(matches!(
            relax(&items, &mut labels, &mut deferreds, 0),
            Err(AssemblerError::UnresolvedDeferred { .. })
        ));
    }
}
