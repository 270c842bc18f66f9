use super::*;
use crate::os::{self, Minix};

use pretty_assertions::assert_eq;

use std::fs;
use std::io::Write;

/// `mov bx, m ; int 20h` for each message block address.
fn calls(messages: &[u16]) -> Vec<u8> {
    messages.iter().flat_map(|m| {
        let [lo, hi] = m.to_le_bytes();
        [0xbb, lo, hi, 0xcd, 0x20]
    }).collect()
}
fn message(p: &mut Process<Minix>, addr: u16, fields: &[(u16, u16)]) {
    for &(off, val) in fields {
        p.memory.set_u16(addr + off, val);
    }
}
fn reply(p: &Process<Minix>, addr: u16) -> u16 {
    p.memory.get_u16(addr + 2)
}
fn errno(e: i32) -> u16 {
    (e as u16).wrapping_neg()
}
fn rooted(code: &[u8], root: &std::path::Path) -> Process<Minix> {
    let args = EmulatorArgs { root: Some(root.to_owned()), fork_mode: Some(ForkMode::Simulate), ..Default::default() };
    let mut p = Process::<Minix>::new(loader::load_raw(code).unwrap(), Rc::new(args));
    Minix::set_args(&mut p, &["test".to_string()], &[]);
    p
}

#[test]
fn test_initial_stack() {
    let mut p = Process::<Minix>::new(loader::load_raw(&[0xc3]).unwrap(), test_args());
    Minix::set_args(&mut p, &["test".to_string()], &Minix::default_environment());
    let sp = p.cpu.get_sp();
    assert_eq!(sp, p.cpu.start_sp);
    assert_eq!(p.memory.get_u16(sp), 1);
    assert_eq!(p.string_at(p.memory.get_u16(sp + 2)), "test");
    assert_eq!(p.memory.get_u16(sp + 4), 0);
    assert_eq!(p.string_at(p.memory.get_u16(sp + 6)), "PATH=/bin:/usr/bin");
    assert_eq!(p.memory.get_u16(sp + 8), 0);
}

#[test]
fn test_return_from_entry() {
    let mut p = start_raw::<Minix>(&[0x90, 0x90, 0xc3]);
    assert_eq!(p.execute_cycles(100), (3, StopReason::Terminated(0)));
    assert_eq!(p.execute_cycles(100), (0, StopReason::NotRunning));
}

#[test]
fn test_exit() {
    let mut p = start_raw::<Minix>(&calls(&[0x100]));
    message(&mut p, 0x100, &[(2, 1), (4, 42)]);
    assert_eq!(p.execute_cycles(100), (2, StopReason::Terminated(42)));
    assert_eq!(p.exit_code(), Some(42));

    let mut p = start_raw::<Minix>(&calls(&[0x100]));
    message(&mut p, 0x100, &[(2, 1), (4, 0xffff)]);
    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(-1));
}

#[test]
fn test_write_and_read() {
    let mut p = start_raw::<Minix>(&calls(&[0x100, 0x120, 0x140]));
    let (_, stdout, _) = setup_standard_memory_streams(&mut p, b"abc");
    message(&mut p, 0x100, &[(2, 4), (4, 1), (6, 5), (10, 0x200)]);
    message(&mut p, 0x120, &[(2, 3), (4, 0), (6, 10), (10, 0x300)]);
    message(&mut p, 0x140, &[(2, 1), (4, 0)]);
    p.memory.set(0x200, b"hello");

    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(0));
    assert_eq!(output(&stdout), "hello");
    assert_eq!(reply(&p, 0x100), 5);
    assert_eq!(reply(&p, 0x120), 3);
    assert_eq!(p.memory.get(0x300, 4), b"abc\0".to_vec());
    assert_eq!(p.cpu.get_ax(), 0);
}

#[test]
fn test_errors_are_negated() {
    let mut p = start_raw::<Minix>(&calls(&[0x100, 0x120, 0x140]));
    let (_, _, stderr) = setup_standard_memory_streams(&mut p, b"");
    message(&mut p, 0x100, &[(2, 6), (4, 9)]);
    message(&mut p, 0x120, &[(2, 4), (4, 0), (6, 1), (10, 0x200)]);
    message(&mut p, 0x140, &[(2, 1), (4, 0)]);

    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(0));
    assert_eq!(reply(&p, 0x100), errno(libc::EBADF));
    // stdin is not writable
    assert_eq!(reply(&p, 0x120), errno(libc::EBADF));
    assert_eq!(output(&stderr), "");
}

#[test]
fn test_fork_and_wait() {
    let mut code = calls(&[0x100]);
    code.extend_from_slice(&[
        0xa1, 0x02, 0x01,   // mov ax, [102h]
        0x85, 0xc0,         // test ax, ax
        0x75, 0x05,         // jnz parent
    ]);
    code.extend(calls(&[0x120]));         // child: exit(42)
    code.extend(calls(&[0x140, 0x160]));  // parent: wait, exit(0)

    let mut p = start_raw::<Minix>(&code);
    message(&mut p, 0x100, &[(2, 2)]);
    message(&mut p, 0x120, &[(2, 1), (4, 42)]);
    message(&mut p, 0x140, &[(2, 7)]);
    message(&mut p, 0x160, &[(2, 1), (4, 0)]);

    assert_eq!(p.execute_cycles(1000).1, StopReason::Terminated(0));
    let child = reply(&p, 0x100);
    assert_ne!(child, 0);
    assert_ne!(child, p.pid);
    assert_eq!(reply(&p, 0x140), child);
    assert_eq!(p.memory.get_u16(0x144), (42 << 8) | 14);
}

#[test]
fn test_wait_without_children() {
    let mut p = start_raw::<Minix>(&calls(&[0x100]));
    message(&mut p, 0x100, &[(2, 7)]);
    p.execute_cycles(2);
    assert_eq!(reply(&p, 0x100), errno(libc::EINVAL));
}

#[test]
fn test_exec_missing_binary() {
    let mut p = start_raw::<Minix>(&calls(&[0x100, 0x120]));
    message(&mut p, 0x100, &[(2, 59), (6, 4), (10, 0x200), (12, 0x300)]);
    message(&mut p, 0x120, &[(2, 1), (4, 3)]);
    p.memory.set_null_terminated(0x200, b"/no/such/binary");

    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(3));
    assert_eq!(reply(&p, 0x100), errno(libc::EINVAL));
}

#[test]
fn test_exec_relocates_frame() {
    // mov bx, 10h ; int 20h, with an exit(7) message at 10h
    let mut image = calls(&[0x10]);
    image.resize(0x10, 0x90);
    image.extend_from_slice(&[0, 0, 1, 0, 7, 0]);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&image).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let mut p = start_raw::<Minix>(&calls(&[0x100]));
    message(&mut p, 0x100, &[(2, 59), (6, 14), (10, 0x200), (12, 0x300)]);
    p.memory.set_null_terminated(0x200, path.as_bytes());
    // argc, argv[0], null, null, then the string, all relative to the frame
    p.memory.set(0x300, &[1, 0, 8, 0, 0, 0, 0, 0]);
    p.memory.set_null_terminated(0x308, b"prog");

    assert_eq!(p.execute_cycles(2).1, StopReason::MaxCycles);
    assert_eq!(p.cpu.ip, 0);
    assert_eq!(p.cpu.get_sp(), 0xfff2);
    assert_eq!(p.cpu.start_sp, 0xfff2);
    assert_eq!(p.memory.get_u16(0xfff4), 0xfffa);
    assert_eq!(p.string_at(0xfffa), "prog");

    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(7));
}

#[test]
fn test_bad_calls_are_fatal() {
    let mut p = start_raw::<Minix>(&[0xcd, 0x21]);
    assert_eq!(p.execute_cycles(10).1, StopReason::Error(ExecError::UnimplementedInstruction));

    let mut p = start_raw::<Minix>(&calls(&[0x100]));
    message(&mut p, 0x100, &[(2, 200)]);
    assert_eq!(p.execute_cycles(10).1, StopReason::Error(ExecError::UnknownSyscall));
    assert_eq!(p.exit_code(), Some(-1));

    let mut p = start_raw::<Minix>(&calls(&[0x100]));
    message(&mut p, 0x100, &[(2, 14)]);
    assert_eq!(p.execute_cycles(10).1, StopReason::Error(ExecError::UnimplementedSyscall));
}

#[test]
fn test_process_queries() {
    let mut p = start_raw::<Minix>(&calls(&[0x100, 0x120, 0x140]));
    message(&mut p, 0x100, &[(2, 20)]);
    message(&mut p, 0x120, &[(2, 13)]);
    message(&mut p, 0x140, &[(2, 60), (4, 0o022)]);
    p.execute_cycles(6);
    assert_eq!(reply(&p, 0x100), p.pid);
    assert_ne!(p.memory.get_u32(0x12a), 0);
    assert_eq!(reply(&p, 0x140), 0);
    assert_eq!(p.umask, 0o022);
}

#[test]
fn test_brk() {
    let mut p = start_raw::<Minix>(&calls(&[0x100, 0x120]));
    message(&mut p, 0x100, &[(2, 17), (10, 0x4000)]);
    message(&mut p, 0x120, &[(2, 17), (10, 0xff00)]);
    p.execute_cycles(4);
    assert_eq!(reply(&p, 0x100), 0);
    assert_eq!(p.memory.get_u16(0x112), 0x4000);
    assert_eq!(reply(&p, 0x120), errno(libc::ENOMEM));
    assert_eq!(p.memory.brk, 0x4000);
}

#[test]
fn test_signal_and_sigaction() {
    let mut p = start_raw::<Minix>(&calls(&[0x100, 0x120, 0x140]));
    message(&mut p, 0x100, &[(2, 48), (4, 2), (14, 0x50)]);
    message(&mut p, 0x120, &[(2, 71), (6, 2), (10, 0), (12, 0x200)]);
    message(&mut p, 0x140, &[(2, 48), (4, 5), (14, 0x50)]);
    p.execute_cycles(6);

    assert_eq!(reply(&p, 0x100), 0);
    assert_eq!(p.signals.get(2).handler, 0x50);
    assert_eq!(reply(&p, 0x120), 0);
    assert_eq!(p.memory.get_u16(0x200), 0x50);
    // no host signal to map 5 to
    assert_eq!(reply(&p, 0x140), errno(libc::EINVAL));

    os::signal::switch_signals::<Minix>(&p.signals, true);
}

#[test]
fn test_files_under_root() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.txt"), b"hi there").unwrap();

    let mut p = rooted(&calls(&[0x100, 0x120, 0x140, 0x160, 0x180, 0x1a0, 0x1c0, 0x1e0]), dir.path());
    p.memory.set_null_terminated(0x200, b"/hello.txt");
    message(&mut p, 0x100, &[(2, 5), (6, 0), (8, 0x200)]);
    message(&mut p, 0x120, &[(2, 3), (4, 3), (6, 64), (10, 0x300)]);
    message(&mut p, 0x140, &[(2, 28), (4, 3), (10, 0x400)]);
    message(&mut p, 0x160, &[(2, 18), (10, 0x200), (12, 0x440)]);
    message(&mut p, 0x180, &[(2, 19), (4, 3), (6, 0), (10, 3), (12, 0)]);
    message(&mut p, 0x1a0, &[(2, 3), (4, 3), (6, 64), (10, 0x340)]);
    message(&mut p, 0x1c0, &[(2, 6), (4, 3)]);
    message(&mut p, 0x1e0, &[(2, 1), (4, 0)]);

    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(0));
    assert_eq!(reply(&p, 0x100), 3);
    assert_eq!(reply(&p, 0x120), 8);
    assert_eq!(p.string_at(0x300), "hi there");
    assert_eq!(reply(&p, 0x140), 0);
    assert_eq!(p.memory.get_u32(0x400 + 14), 8);
    assert_eq!(reply(&p, 0x160), 0);
    assert_eq!(p.memory.get_u16(0x440 + 4) & 0o170000, 0o100000);
    assert_eq!(p.memory.get_u32(0x18a), 3);
    assert_eq!(reply(&p, 0x1a0), 5);
    assert_eq!(p.string_at(0x340), "there");
    assert_eq!(reply(&p, 0x1c0), 0);
}

#[test]
fn test_creat_and_unlink() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = rooted(&calls(&[0x100, 0x120, 0x140, 0x160, 0x180]), dir.path());
    p.memory.set_null_terminated(0x200, b"/out.txt");
    p.memory.set(0x300, b"hello");
    message(&mut p, 0x100, &[(2, 8), (6, 0o644), (8, 0x200)]);
    message(&mut p, 0x120, &[(2, 4), (4, 3), (6, 5), (10, 0x300)]);
    message(&mut p, 0x140, &[(2, 6), (4, 3)]);
    message(&mut p, 0x160, &[(2, 33), (6, 0), (8, 0x200)]);
    message(&mut p, 0x180, &[(2, 1), (4, 0)]);

    assert_eq!(p.execute_cycles(100).1, StopReason::Terminated(0));
    assert_eq!(reply(&p, 0x100), 3);
    assert_eq!(reply(&p, 0x160), 0);
    assert_eq!(fs::read(dir.path().join("out.txt")).unwrap(), b"hello");

    let mut p = rooted(&calls(&[0x100, 0x120]), dir.path());
    p.memory.set_null_terminated(0x200, b"/out.txt");
    message(&mut p, 0x100, &[(2, 10), (8, 0x200)]);
    message(&mut p, 0x120, &[(2, 33), (6, 0), (8, 0x200)]);
    p.execute_cycles(4);
    assert_eq!(reply(&p, 0x100), 0);
    assert_eq!(reply(&p, 0x120), errno(libc::ENOENT));
    assert!(!dir.path().join("out.txt").exists());
}
