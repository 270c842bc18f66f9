use super::*;
use crate::loader::V6Arch;
use crate::os::{UnixV6I8086, UnixV6Pdp11};
use crate::os::unixv6::seek_position;

use pretty_assertions::assert_eq;

use std::fs;
use std::io::SeekFrom;

/// A program of `ws` padded to `len` words, so data can be placed after the code.
fn padded(ws: &[u16], len: usize) -> Vec<u16> {
    let mut v = ws.to_vec();
    v.resize(len.max(ws.len()), 0);
    v
}
fn errno(p: &Process<UnixV6Pdp11>) -> Option<i32> {
    if p.cpu.psw.get_c() { Some(p.cpu.r[0] as i32) } else { None }
}

#[test]
fn test_initial_stack() {
    let p = start_raw::<UnixV6Pdp11>(&words(&[0o000207]));
    let sp = p.cpu.r[6];
    assert_eq!(sp, 0xfff6);
    assert_eq!(p.cpu.start_sp, sp);
    assert_eq!(p.memory.get_u16(sp), 1);
    assert_eq!(p.memory.get_u16(sp + 2), 0xfffa);
    assert_eq!(p.string_at(0xfffa), "test");
}

#[test]
fn test_write_with_inline_args() {
    let code = padded(&[
        0o012700, 1,        // mov $1, r0
        0o104404, 0o100, 5, // sys write; 0x40; 5
        0o010001,           // mov r0, r1
        0o012700, 7,        // mov $7, r0
        0o104401,           // sys exit
    ], 0x30);
    let mut p = start_raw::<UnixV6Pdp11>(&words(&code));
    let (_, stdout, _) = setup_standard_memory_streams(&mut p, b"");
    p.memory.set(0x40, b"hello");

    assert_eq!(p.execute_cycles(100), (5, StopReason::Terminated(7)));
    assert_eq!(output(&stdout), "hello");
    assert_eq!(p.cpu.r[1], 5);
}

#[test]
fn test_i8086_inline_args() {
    let mut code = vec![
        0xb8, 0x01, 0x00,       // mov ax, 1
        0xcd, 0x04,             // int 4
        0x40, 0x00, 0x05, 0x00, // 40h, 5
        0xb8, 0x07, 0x00,       // mov ax, 7
        0xcd, 0x01,             // int 1
    ];
    code.resize(0x40, 0);
    code.extend_from_slice(b"hello");
    let mut p = start_raw::<UnixV6I8086>(&code);
    let (_, stdout, _) = setup_standard_memory_streams(&mut p, b"");

    assert_eq!(p.execute_cycles(2).1, StopReason::MaxCycles);
    assert_eq!((p.cpu.get_ax(), p.cpu.ip, p.cpu.flags.get_cf()), (5, 9, false));
    assert_eq!(p.execute_cycles(100), (2, StopReason::Terminated(7)));
    assert_eq!(output(&stdout), "hello");
}

#[test]
fn test_errors_set_carry() {
    let code = padded(&[0o104405, 0o100, 0, 0o104405, 0o100, 0], 0x30);
    let mut p = start_raw::<UnixV6Pdp11>(&words(&code));
    p.memory.set_null_terminated(0x40, b"/no/such/file");

    assert_eq!(p.execute_cycles(1).1, StopReason::MaxCycles);
    assert_eq!(errno(&p), Some(libc::ENOENT));
    assert_eq!(p.cpu.r[7], 6);
}

#[test]
fn test_indir() {
    let mut code = padded(&[
        0o012700, 1,        // mov $1, r0
        0o104400, 0o200,    // sys indir; 0x80
        0o012700, 0,        // mov $0, r0
        0o104401,           // sys exit
    ], 0x44);
    code[0x40..0x43].copy_from_slice(&[0o104404, 0o100, 5]);
    let mut p = start_raw::<UnixV6Pdp11>(&words(&code));
    let (_, stdout, _) = setup_standard_memory_streams(&mut p, b"");
    p.memory.set(0x40, b"hello");

    assert_eq!(p.execute_cycles(2).1, StopReason::MaxCycles);
    assert_eq!(p.cpu.r[0], 5);
    assert_eq!(p.cpu.r[7], 8);
    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(0));
    assert_eq!(output(&stdout), "hello");
}

#[test]
fn test_nested_indir() {
    let mut code = padded(&[0o104400, 0o200], 0x42);
    code[0x40] = 0o104400;
    let mut p = start_raw::<UnixV6Pdp11>(&words(&code));
    assert_eq!(p.execute_cycles(1).1, StopReason::MaxCycles);
    assert_eq!(errno(&p), Some(libc::EINVAL));
    assert_eq!(p.cpu.r[7], 4);
}

#[test]
fn test_fork_and_wait() {
    let code = [
        0o104402,           // sys fork
        0o000405,           // br child
        0o104407,           // sys wait
        0o010102,           // mov r1, r2
        0o012700, 0,        // mov $0, r0
        0o104401,           // sys exit
        0o012700, 0o52,     // child: mov $42, r0
        0o104401,           // sys exit
    ];
    let mut p = start_raw::<UnixV6Pdp11>(&words(&code));
    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(0));
    assert_eq!(p.cpu.r[2], (42 << 8) | 14);
    assert!(!p.cpu.psw.get_c());
}

#[test]
fn test_seek_position() {
    assert_eq!(seek_position(10, 0), Ok(SeekFrom::Start(10)));
    assert_eq!(seek_position(0xffff, 1), Ok(SeekFrom::Current(-1)));
    assert_eq!(seek_position(0xfffe, 2), Ok(SeekFrom::End(-2)));
    assert_eq!(seek_position(3, 3), Ok(SeekFrom::Start(1536)));
    assert_eq!(seek_position(2, 4), Ok(SeekFrom::Current(1024)));
    assert_eq!(seek_position(0xffff, 5), Ok(SeekFrom::End(-512)));
    assert_eq!(seek_position(0, 6), Err(crate::common::Errno(libc::EINVAL)));
}

#[test]
fn test_unsupported_calls() {
    let mut p = start_raw::<UnixV6Pdp11>(&words(&[0o104415]));
    assert_eq!(p.execute_cycles(10).1, StopReason::Error(ExecError::UnimplementedSyscall));

    for n in [27, 60] {
        let mut p = start_raw::<UnixV6Pdp11>(&words(&[0o104400 + n]));
        assert_eq!(p.execute_cycles(10).1, StopReason::Error(ExecError::UnknownSyscall));
    }
}

#[test]
fn test_failed_exec() {
    let code = padded(&[0o104413, 0o100, 0o140], 0x30);
    let mut p = start_raw::<UnixV6Pdp11>(&words(&code));
    p.memory.set_null_terminated(0x40, b"/no/such/binary");
    p.execute_cycles(1);
    assert_eq!(errno(&p), Some(libc::EINVAL));
    assert_eq!(p.cpu.r[7], 6);
    assert!(p.is_running());
}

#[test]
fn test_brk() {
    let mut p = start_raw::<UnixV6Pdp11>(&words(&[0o104421, 0x8000, 0o104421, 0xff00]));
    p.execute_cycles(1);
    assert_eq!(errno(&p), None);
    assert_eq!(p.memory.brk, 0x8000);
    p.execute_cycles(1);
    assert_eq!(errno(&p), Some(libc::ENOMEM));
    assert_eq!(p.memory.brk, 0x8000);
}

#[test]
fn test_run_past_text() {
    let mut image = words(&[0o407, 2, 0, 0, 0, 0, 0, 0]);
    image.extend(words(&[0o000240]));
    let mut p = start::<UnixV6Pdp11>(loader::load_v6(&image, V6Arch::Pdp11).unwrap());
    assert_eq!(p.execute_cycles(10), (1, StopReason::Error(ExecError::ExecuteOutsideText)));
}

#[test]
fn test_files_under_root() {
    let dir = tempfile::tempdir().unwrap();
    let code = padded(&[
        0o104410, 0x100, 0o644, // sys creat; path; 0644
        0o010001,               // mov r0, r1
        0o104404, 0x110, 5,     // sys write; buf; 5
        0o010100,               // mov r1, r0
        0o104406,               // sys close
        0o104405, 0x100, 0,     // sys open; path; 0
        0o010001,               // mov r0, r1
        0o104423, 2, 0,         // sys seek; 2; 0
        0o010100,               // mov r1, r0
        0o104403, 0x120, 16,    // sys read; buf; 16
        0o010003,               // mov r0, r3
        0o104422, 0x100, 0x140, // sys stat; path; buf
        0o012700, 0,            // mov $0, r0
        0o104401,               // sys exit
    ], 0x80);

    let args = EmulatorArgs { root: Some(dir.path().to_owned()), fork_mode: Some(ForkMode::Simulate), ..Default::default() };
    let mut p = Process::<UnixV6Pdp11>::new(loader::load_raw(&words(&code)).unwrap(), Rc::new(args));
    UnixV6Pdp11::set_args(&mut p, &["test".to_string()], &[]);
    p.memory.set_null_terminated(0x100, b"/data.txt");
    p.memory.set(0x110, b"hello");

    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(0));
    assert_eq!(fs::read(dir.path().join("data.txt")).unwrap(), b"hello");
    assert_eq!(p.cpu.r[1], 3);
    assert_eq!(p.cpu.r[3], 3);
    assert_eq!(p.memory.get(0x120, 4), b"llo\0".to_vec());
    assert_ne!(p.memory.get_u16(0x144) & 0o100000, 0);
    assert_eq!(p.memory.get_u16(0x14a), 5);
}
