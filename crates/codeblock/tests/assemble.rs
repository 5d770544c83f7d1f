use relax_codeblock::{
    Address, AddressSlot, CodeBlock, CodeBlockConfig, Endian, OffsetLinkObject, ProvidedSlot, Width,
};
use std::cell::RefCell;
use std::rc::Rc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn two_byte_program_round_trips() {
    init_logging();
    let mut block = CodeBlock::new(CodeBlockConfig::default());
    block.gen8(0x48).gen8(0xc7);
    assert_eq!(block.assemble().unwrap(), vec![0x48, 0xc7]);
}

#[test]
fn listing_string_shows_labels_and_bytes() {
    let mut block = CodeBlock::new(CodeBlockConfig::default());
    let top = block.gen_label_here(Some("top".to_string())).unwrap();
    block.gen8(0x90);
    block.assemble().unwrap();
    let listing = block.listing_string(0, None);
    assert!(listing.contains("top:"));
    let _ = top;
}

#[test]
fn cross_block_linking_resolves_a_call_target() {
    let slot = AddressSlot::new();

    let mut callee = CodeBlock::new(CodeBlockConfig::default());
    callee
        .gen_provided(Box::new(ProvidedSlot(slot.clone())))
        .unwrap();
    callee.gen8(0xc3); // ret
    let callee_base = Address::from_value(Width::W32, 0x4000, Endian::Little);
    let _callee_mcb = callee.assemble_to_machine_code_block(callee_base).unwrap();

    let mut caller = CodeBlock::new(CodeBlockConfig::default());
    caller.gen8(0xe8); // call rel32
    caller
        .gen_required(Rc::new(RefCell::new(OffsetLinkObject::new(slot, 32))))
        .unwrap();
    let caller_base = Address::from_value(Width::W32, 0x1000, Endian::Little);
    let mut caller_mcb = caller.assemble_to_machine_code_block(caller_base).unwrap();

    let required = std::mem::take(&mut caller_mcb.required);
    CodeBlock::link(&mut caller_mcb, &required).unwrap();

    // rel32 is measured from the end of the 4-byte displacement field, i.e.
    // from caller_base + 1 (the opcode) + 4.
    let disp = 0x4000i64 - (0x1000i64 + 1 + 4);
    assert_eq!(caller_mcb.bytes[0], 0xe8);
    assert_eq!(&caller_mcb.bytes[1..5], &(disp as i32).to_le_bytes());
}

#[test]
fn address_arithmetic_rejects_width_mismatches_and_overflow() {
    let a32 = Address::from_value(Width::W32, u32::MAX as u64, Endian::Little);
    assert!(a32.add_offset(1).is_err());

    let a64 = Address::from_value(Width::W64, 0, Endian::Little);
    let b32 = Address::from_value(Width::W32, 0, Endian::Little);
    assert!(a64.add(&b32).is_err());
}

#[test]
fn align_then_origin_combine_to_place_code_at_an_absolute_address() {
    let mut block = CodeBlock::new(CodeBlockConfig::default());
    block.gen8(1).gen8(2).gen8(3);
    block.align(8, 0, 0).unwrap();
    let origin = Address::from_value(Width::W32, 16, Endian::Little);
    block.origin(&origin, 0).unwrap();
    block.gen8(0xff);
    let bytes = block.assemble().unwrap();
    assert_eq!(bytes.len(), 17);
    assert_eq!(bytes[16], 0xff);
}
