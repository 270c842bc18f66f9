use super::*;
use crate::common::Personality;
use crate::loader::*;
use crate::os::UnixV6Pdp11;

use pretty_assertions::assert_eq;

use std::io::Write;

fn minix_header(flags: u8, cpu: u8, text: u32, data: u32, bss: u32) -> Vec<u8> {
    let mut h = vec![0x01, 0x03, flags, cpu, 32, 0, 0, 0];
    for v in [text, data, bss, 0, 0, 0] {
        h.extend_from_slice(&v.to_le_bytes());
    }
    h
}

#[test]
fn test_detect() {
    assert_eq!(detect(&words(&[0o407]), false), Personality::UnixV6Pdp11);
    assert_eq!(detect(&words(&[0o410]), false), Personality::UnixV6Pdp11);
    assert_eq!(detect(&words(&[0o411]), false), Personality::UnixV6Pdp11);
    assert_eq!(detect(&[0xeb, 0x0e], false), Personality::UnixV6I8086);
    assert_eq!(detect(&[0xeb, 0x12], false), Personality::UnixV6I8086);
    assert_eq!(detect(&[0x01, 0x03, 0, 4], false), Personality::Minix);
    assert_eq!(detect(&[0x90], false), Personality::Minix);
    assert_eq!(detect(&[], false), Personality::Minix);
    assert_eq!(detect(&[0x01, 0x03], true), Personality::UnixV6Pdp11);
}

#[test]
fn test_raw() {
    let image = load_raw(&[0x90, 0xc3]).unwrap();
    assert_eq!(image.format, Format::Raw);
    assert_eq!(image.entry, 0);
    assert_eq!((image.memory.tsize, image.memory.dsize, image.memory.brk), (2, 0, 2));
    assert_eq!(image.memory.get_u8(1), 0xc3);

    assert!(matches!(load_raw(&vec![0; 0x10000]), Err(LoadError::TooLarge(0x10000))));
    assert!(load_raw(&vec![0; 0xffff]).is_ok());
}

#[test]
fn test_minix_combined() {
    let mut bytes = minix_header(0, 4, 4, 2, 0x10);
    bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
    let image = load_minix(&bytes).unwrap();
    assert_eq!(image.format, Format::MinixCombined);
    assert!(!image.memory.is_split());
    assert_eq!((image.memory.tsize, image.memory.dsize, image.memory.brk), (4, 2, 0x16));
    assert_eq!(image.memory.text()[0], 1);
    assert_eq!(image.memory.get_u8(4), 5);
    assert_eq!(image.memory.get_u8(6), 0);
}

#[test]
fn test_minix_separate() {
    let mut bytes = minix_header(0x20, 4, 4, 2, 0x10);
    bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
    let image = load_minix(&bytes).unwrap();
    assert_eq!(image.format, Format::MinixSeparate);
    assert!(image.memory.is_split());
    assert_eq!(image.memory.brk, 0x12);
    assert_eq!(&image.memory.text()[..5], &[1, 2, 3, 4, 0]);
    assert_eq!(image.memory.get(0, 3), vec![5, 6, 0]);
}

#[test]
fn test_minix_rejects() {
    let bytes = minix_header(0, 0x10, 0, 0, 0);
    assert!(matches!(load_minix(&bytes), Err(LoadError::UnknownCpu(0x10))));

    let bytes = minix_header(0, 4, 0xffff, 2, 0);
    assert!(matches!(load_minix(&bytes), Err(LoadError::SegmentsTooLarge { text: 0xffff, data: 2 })));
    let bytes = minix_header(0x20, 4, 0x10000, 0, 0);
    assert!(matches!(load_minix(&bytes), Err(LoadError::SegmentsTooLarge { .. })));

    // no header at all
    let image = load_minix(&[0xcd, 0x20]).unwrap();
    assert_eq!(image.format, Format::Raw);
}

#[test]
fn test_v6_contiguous() {
    let bytes = words(&[0o407, 4, 2, 6, 0, 0, 0, 1, 0o005000, 0o000207, 0x1234]);
    let image = load_v6(&bytes, V6Arch::Pdp11).unwrap();
    assert_eq!(image.format, Format::V6Contiguous);
    assert_eq!((image.memory.tsize, image.memory.dsize, image.memory.brk), (4, 2, 12));
    assert_eq!(image.memory.runmax, Some(6));
    assert_eq!(image.memory.get_u16(4), 0x1234);
    assert!(image.symbols.is_empty());
}

#[test]
fn test_v6_shared_text() {
    let bytes = words(&[0o410, 4, 2, 6, 0, 2, 0, 1, 0o005000, 0o000207, 0x1234]);
    let image = load_v6(&bytes, V6Arch::Pdp11).unwrap();
    assert_eq!(image.format, Format::V6SharedText);
    assert_eq!(image.entry, 2);
    assert_eq!(image.memory.runmax, Some(4));
    assert_eq!(image.memory.get_u16(4), 0);
    assert_eq!(image.memory.get_u16(0x2000), 0x1234);
    assert_eq!(image.memory.brk, 0x2000 + 2 + 6);
}

#[test]
fn test_v6_separate() {
    let bytes = words(&[0o411, 4, 2, 6, 0, 0, 0, 1, 0o005000, 0o000207, 0x1234]);
    let image = load_v6(&bytes, V6Arch::Pdp11).unwrap();
    assert_eq!(image.format, Format::V6Separate);
    assert!(image.memory.is_split());
    assert_eq!(image.memory.get_u16(0), 0x1234);
    assert_eq!(&image.memory.text()[..4], &[0x00, 0x0a, 0x87, 0x00]);
    assert_eq!(image.memory.brk, 8);
}

#[test]
fn test_v6_i8086() {
    let mut bytes = vec![0xeb, 0x0e];
    bytes.extend(words(&[2, 0, 0, 0, 0, 0, 1]));
    bytes.extend_from_slice(&[0x90, 0xc3]);
    let image = load_v6(&bytes, V6Arch::I8086).unwrap();
    assert_eq!(image.format, Format::V6Contiguous);
    assert_eq!(image.memory.runmax, None);
    assert_eq!(image.memory.get_u8(1), 0xc3);

    // the other encoding of the magic is just code
    let image = load_v6(&words(&[0o407, 0, 0, 0, 0, 0, 0, 0]), V6Arch::I8086).unwrap();
    assert_eq!(image.format, Format::Raw);
}

#[test]
fn test_symbols_and_listing() {
    let mut bytes = words(&[0o407, 4, 0, 0, 24, 0, 0, 0, 0o005000, 0o000207]);
    bytes.extend_from_slice(&[0; 4]); // relocation bits
    bytes.extend_from_slice(b"_main\0\0\0");
    bytes.extend(words(&[2, 0]));
    bytes.extend_from_slice(b"_end\0\0\0\0");
    bytes.extend(words(&[3, 4]));
    let image = load_v6(&bytes, V6Arch::Pdp11).unwrap();
    assert_eq!(image.symbols, vec![
        Symbol { name: "_main".into(), kind: 2, addr: 0 },
        Symbol { name: "_end".into(), kind: 3, addr: 4 },
    ]);
    assert!(image.symbols[0].is_text());
    assert!(!image.symbols[1].is_text());

    let p = start::<UnixV6Pdp11>(image);
    let mut out = vec![];
    p.disassemble(&mut out).unwrap();
    let listing = String::from_utf8(out).unwrap();
    assert!(listing.starts_with("_main:\n0000: 000a"));
    assert!(listing.contains("clr r0"));
    assert!(listing.contains("0002: 8700"));
    assert!(!listing.contains("_end:"));
    assert!(!listing.contains("undefined"));
}

#[test]
fn test_listing_counts_undefined() {
    let p = start_raw::<UnixV6Pdp11>(&words(&[0o000007, 0o000207]));
    let mut out = vec![];
    p.disassemble(&mut out).unwrap();
    let listing = String::from_utf8(out).unwrap();
    assert_eq!(listing.lines().count(), 3);
    assert!(listing.ends_with("undefined: 1\n"));
}

#[test]
fn test_read_binary() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    assert_eq!(read_binary(file.path()).unwrap(), vec![1, 2, 3]);

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    match read_binary(&missing) {
        Err(LoadError::Io { path, .. }) => assert_eq!(path, missing),
        _ => panic!("expected an io error"),
    }
}
