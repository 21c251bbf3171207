use easm_rs::asm::{Assembler, Constants};
use easm_rs::disasm::Disassembler;
use easm_rs::Grammar;
use pretty_assertions::assert_eq;

const BASE: u32 = 0x0800_0000;

fn reassembles(src: &str, base: u32) {
    let g = Grammar::builtin().unwrap();
    let asm = Assembler::new(&g);
    let bytes = asm.assemble(src, base, &Constants::new()).unwrap().bytes();
    let text = Disassembler::new(&g).disassemble(&bytes, base).unwrap();
    let again = asm.assemble(&text, base, &Constants::new()).unwrap().bytes();
    assert_eq!(again, bytes, "listing:\n{text}");
}

#[test]
fn listing_names_branch_targets() {
    let g = Grammar::builtin().unwrap();
    let bytes = Assembler::new(&g)
        .assemble("check_flag 0x9 jz .NoKey\nnop\njump .End\n.NoKey:\nnop\n.End:", BASE, &Constants::new())
        .unwrap()
        .bytes();
    let text = Disassembler::new(&g).disassemble(&bytes, BASE).unwrap();
    assert_eq!(
        text,
        "    check_flag 0x9 jz .L08000014\n    nop\n    jump .L08000018\n.L08000014:\n    nop\n.L08000018:\n"
    );
}

#[test]
fn outside_targets_become_label_definitions() {
    let g = Grammar::builtin().unwrap();
    let bytes = [0x0c, 0x08, 0xff, 0xff, 0x00, 0x01, 0x00, 0x08];
    let text = Disassembler::new(&g).disassemble(&bytes, BASE).unwrap();
    assert_eq!(text, ".L08000100 0x8000100\n    jump .L08000100\n");
}

#[test]
fn round_trips() {
    reassembles("jump .End\n.Loop:\njump .Loop\n.End:", BASE);
    reassembles(
        "load_text top 0x1f4\nshow_dialog\nclose_dialog auto\nmusic 0x2 0x80\nset_npc_event 0x3 0x1388\nend_event",
        BASE,
    );
    reassembles("repeat 0x4 .Top\n.Top:\njump_by_dir .Top .Top .Out\n.Out:\nend_event", 0x0822_3f4c);
    reassembles("db 0x7e 0x06 0x1 0x2 0x3 0x4\ndb 0x7e 0x02\nend_event", BASE);
    reassembles("check_item 0x3 jz .Have\nshow_dialog\n.Have:\nend_event", BASE);
}

#[test]
fn misaligned_half_slot_stays_raw() {
    // a delay record at an odd half-word would not assemble back
    let g = Grammar::builtin().unwrap();
    let dis = Disassembler::new(&g);
    let line = dis.decode(&[0x09, 0x04, 0x10, 0x00], BASE + 1);
    assert_eq!(line.mnemonic, "db");
    assert_eq!(dis.decode(&[0x09, 0x04, 0x10, 0x00], BASE).text(), "delay 0x10");
}
