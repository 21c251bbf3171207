use easm_rs::ips::IpsFile;
use easm_rs::patch::{PatchProducer, PatchSet};
use easm_rs::rom::{compose, PatchError, Rom};
use pretty_assertions::assert_eq;

fn base() -> Vec<u8> {
    (0u8..16).collect()
}

#[test]
fn disjoint_patches_keep_everything_else() {
    let mut set = PatchSet::new();
    set.insert("b", 0x8, vec![0xaa, 0xbb]);
    set.insert("a", 0x0, vec![0x12, 0x34, 0x56, 0x78]);
    set.insert("c", 0xf, vec![0xcc]);
    let out = compose(&base(), &set).unwrap();
    assert_eq!(
        out,
        vec![0x12, 0x34, 0x56, 0x78, 4, 5, 6, 7, 0xaa, 0xbb, 10, 11, 12, 13, 14, 0xcc]
    );
}

#[test]
fn adjacent_patches_are_fine() {
    let mut set = PatchSet::new();
    set.insert("a", 0x0, vec![0xff; 4]);
    set.insert("b", 0x4, vec![0xee; 4]);
    let out = compose(&base(), &set).unwrap();
    assert_eq!(&out[..8], &[0xff, 0xff, 0xff, 0xff, 0xee, 0xee, 0xee, 0xee]);
    assert_eq!(out.len(), 16);
}

#[test]
fn overlapping_patches_name_both_producers() {
    let mut set = PatchSet::new();
    set.insert("events", 0x0, vec![0; 8]);
    set.insert("fix.ips", 0x4, vec![0; 8]);
    assert_eq!(
        compose(&base(), &set),
        Err(PatchError::Overlap {
            offset: 0x4,
            cursor: 0x8,
            producer: "fix.ips".into(),
            previous: "events".into(),
        })
    );
}

#[test]
fn patch_at_image_end_is_out_of_bounds() {
    let mut set = PatchSet::new();
    set.insert("a", 0x0, vec![0x12, 0x34, 0x56, 0x78]);
    set.insert("b", 0x10, vec![0x99]);
    assert!(matches!(
        compose(&base(), &set),
        Err(PatchError::OutOfBounds { offset: 0x10, image_len: 16, .. })
    ));
}

#[test]
fn patch_running_past_end_is_out_of_bounds() {
    let mut set = PatchSet::new();
    set.insert("a", 0xe, vec![1, 2, 3]);
    assert!(matches!(compose(&base(), &set), Err(PatchError::OutOfBounds { offset: 0xe, len: 3, .. })));
}

#[test]
fn unconverted_pointer_is_caught() {
    let mut set = PatchSet::new();
    set.insert("events", 0x0800_0004, vec![1]);
    assert!(matches!(compose(&base(), &set), Err(PatchError::OutOfBounds { .. })));
}

#[test]
fn rom_apply_leaves_original_untouched() {
    let rom = Rom::new(base());
    let mut set = PatchSet::new();
    set.insert("a", 0x2, vec![0xee]);
    let patched = rom.apply_patches(&set).unwrap();
    assert_eq!(patched.as_bytes()[2], 0xee);
    assert_eq!(rom.as_bytes()[2], 2);
}

#[test]
fn ips_records_compose_with_other_patches() {
    let mut data = b"PATCH".to_vec();
    data.extend([0x00, 0x00, 0x0c, 0x00, 0x00, 0x00, 0x04, 0x00]);
    data.extend(b"EOF");
    let ips = IpsFile::parse("zero.ips", &data).unwrap();

    let mut set = PatchSet::new();
    set.insert("events", 0x0, vec![0xaa; 4]);
    ips.emit(&mut set).unwrap();
    let out = compose(&base(), &set).unwrap();
    assert_eq!(&out[..4], &[0xaa; 4]);
    assert_eq!(&out[12..], &[0, 0, 0, 0]);
}
