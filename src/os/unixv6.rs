//! Unix V6, on the PDP-11 and recompiled for the 8086.
//!
//! The first argument of a call travels in r0 (AX). The others are words following the trap instruction in the
//! text segment, which the call skips on return. `indir` runs a call whose number and arguments are stored in data
//! memory instead. Errors come back as the errno in r0 (AX) with the carry flag set.

use num_traits::FromPrimitive;
use tracing::debug;

use std::io::SeekFrom;
use std::marker::PhantomData;

use crate::common::{Errno, Personality, Trace};
use crate::common::util::Punctuated;
use crate::exec::{Cpu, ExecError, Process};
use crate::exec::fs::FileStat;
use crate::i8086::I8086;
use crate::loader::{self, LoadedImage, LoadError, V6Arch};
use crate::pdp11::Pdp11;

use super::{setup_stack, ErrorConvention, Os, SysResult};
use super::signal::Disposition;

/// The V6 system call numbers with their inline argument counts.
/// Numbers without a name do not exist; numbers past the end are unknown.
pub const SYSCALLS: [(Option<&str>, u16); 49] = [
    (Some("indir"), 1), (Some("exit"), 0), (Some("fork"), 0), (Some("read"), 2), (Some("write"), 2),
    (Some("open"), 2), (Some("close"), 0), (Some("wait"), 0), (Some("creat"), 2), (Some("link"), 2),
    (Some("unlink"), 1), (Some("exec"), 2), (Some("chdir"), 1), (Some("time"), 0), (Some("mknod"), 3),
    (Some("chmod"), 2), (Some("chown"), 2), (Some("brk"), 1), (Some("stat"), 2), (Some("seek"), 2),
    (Some("getpid"), 0), (Some("mount"), 3), (Some("umount"), 1), (Some("setuid"), 0), (Some("getuid"), 0),
    (Some("stime"), 0), (Some("ptrace"), 3), (None, 0), (Some("fstat"), 1), (None, 0),
    (Some("smdate"), 1), (Some("stty"), 1), (Some("gtty"), 1), (None, 0), (Some("nice"), 0),
    (Some("sleep"), 0), (Some("sync"), 0), (Some("kill"), 1), (Some("switch"), 0), (None, 0),
    (None, 0), (Some("dup"), 0), (Some("pipe"), 0), (Some("times"), 1), (Some("prof"), 4),
    (Some("tiu"), 0), (Some("setgid"), 0), (Some("getgid"), 0), (Some("signal"), 2),
];

/// The calls that are emulated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
enum V6Call {
    Indir = 0, Exit, Fork, Read, Write, Open, Close, Wait, Creat, Link, Unlink, Exec, Chdir,
    Chmod = 15,
    Brk = 17, Stat, Seek, Getpid,
    Dup = 41,
    Signal = 48,
}

/// Where the inline arguments of a call are read from.
#[derive(Clone, Copy, Debug)]
struct Args {
    addr: u16,
    /// Direct calls read from the text segment, `indir` targets from data.
    in_text: bool,
}
impl Args {
    fn word<C: V6Cpu>(self, p: &Process<UnixV6<C>>, i: u16) -> u16 {
        let at = self.addr.wrapping_add(2 * i);
        if self.in_text {
            let text = p.memory.text();
            u16::from_le_bytes([text[at as usize], text[at.wrapping_add(1) as usize]])
        } else {
            p.memory.get_u16(at)
        }
    }
    fn string<C: V6Cpu>(self, p: &Process<UnixV6<C>>, i: u16) -> String {
        p.string_at(self.word(p, i))
    }
}

/// What the dispatcher does after a call.
enum Outcome {
    /// Write the result back and skip this many inline bytes.
    Reply(SysResult, u16),
    /// The call already left the process in its final state (exit).
    Done,
}

/// A processor Unix V6 runs on.
pub trait V6Cpu: Cpu + 'static {
    const PERSONALITY: Personality;
    /// The header encoding binaries for this processor use.
    const ARCH: V6Arch;
    /// Stores the status word of a finished child where wait returns it.
    fn set_wait_status(&mut self, status: u16);
}
impl V6Cpu for Pdp11 {
    const PERSONALITY: Personality = Personality::UnixV6Pdp11;
    const ARCH: V6Arch = V6Arch::Pdp11;
    fn set_wait_status(&mut self, status: u16) {
        self.r[1] = status;
    }
}
impl V6Cpu for I8086 {
    const PERSONALITY: Personality = Personality::UnixV6I8086;
    const ARCH: V6Arch = V6Arch::I8086;
    fn set_wait_status(&mut self, status: u16) {
        self.set_dx(status | 14);
    }
}

/// The Unix V6 personality on the processor `C`.
pub struct UnixV6<C>(PhantomData<C>);

pub type UnixV6Pdp11 = UnixV6<Pdp11>;
pub type UnixV6I8086 = UnixV6<I8086>;

/// Writes a stat result in the 36-byte V6 inode layout.
pub fn write_stat<C: V6Cpu>(p: &mut Process<UnixV6<C>>, addr: u16, st: &FileStat) {
    const IALLOC: u16 = 0o100000;
    let kind = match st.mode & libc::S_IFMT {
        libc::S_IFDIR => 0o040000,
        libc::S_IFCHR => 0o020000,
        libc::S_IFBLK => 0o060000,
        _ => 0,
    };
    let m = &mut p.memory;
    m.set_u16(addr, st.dev as u16);
    m.set_u16(addr.wrapping_add(2), st.ino as u16);
    m.set_u16(addr.wrapping_add(4), IALLOC | kind | (st.mode & 0o7777) as u16);
    m.set_u8(addr.wrapping_add(6), st.nlink as u8);
    m.set_u8(addr.wrapping_add(7), st.uid as u8);
    m.set_u8(addr.wrapping_add(8), st.gid as u8);
    m.set_u8(addr.wrapping_add(9), (st.size >> 16) as u8);
    m.set_u16(addr.wrapping_add(10), st.size as u16);
    m.set(addr.wrapping_add(12), &[0; 16]);
    for (off, t) in [(28, st.atime), (32, st.mtime)] {
        m.set_u16(addr.wrapping_add(off), (t >> 16) as u16);
        m.set_u16(addr.wrapping_add(off + 2), t as u16);
    }
}

impl<C: V6Cpu> UnixV6<C> {
    /// Performs call `n`. Inline arguments are at `args`, and `inline` is the number of bytes the call site
    /// skips before its own arguments (2 under `indir`).
    fn call(p: &mut Process<Self>, n: u16, args: Args, inline: u16) -> Result<Outcome, ExecError> {
        let call = match V6Call::from_u16(n) {
            Some(c) => c,
            None => return Err(match SYSCALLS.get(n as usize) {
                Some((Some(name), _)) => p.not_implemented(name),
                _ => p.unknown_syscall(n),
            }),
        };
        let skip = SYSCALLS[n as usize].1 * 2;
        let arg0 = p.cpu.result();

        let result = match call {
            V6Call::Indir => {
                let at = args.word(p, 0);
                let nn = p.memory.get_u8(at) as u16;
                if nn == V6Call::Indir as u16 {
                    return Ok(Outcome::Reply(Err(Errno(libc::EINVAL)), skip));
                }
                let nested = Args { addr: at.wrapping_add(2), in_text: false };
                return Ok(match Self::call(p, nn, nested, skip)? {
                    Outcome::Reply(r, _) if nn == V6Call::Exec as u16 && r.is_ok() => Outcome::Reply(r, 0),
                    Outcome::Reply(r, _) => Outcome::Reply(r, skip),
                    Outcome::Done => Outcome::Done,
                });
            }
            V6Call::Exit => {
                p.sys_exit(arg0 as i16 as i32);
                return Ok(Outcome::Done);
            }
            V6Call::Fork => {
                // the child resumes right after the arguments, the parent one word further
                let result = p.sys_fork(|child| {
                    let ip = child.cpu.ip().wrapping_add(inline);
                    child.cpu.set_ip(ip);
                    Self::CONVENTION.report(child, 0, Ok(0));
                });
                let skip = match result {
                    Ok(0) => 0,
                    _ => 2,
                };
                return Ok(Outcome::Reply(result, skip));
            }
            V6Call::Read => {
                let (buf, len) = (args.word(p, 0), args.word(p, 1));
                p.sys_read(arg0, buf, len)
            }
            V6Call::Write => {
                let (buf, len) = (args.word(p, 0), args.word(p, 1));
                p.sys_write(arg0, buf, len)
            }
            V6Call::Open => {
                let (path, mode) = (args.string(p, 0), args.word(p, 1));
                p.sys_open(&path, mode & 3, 0)
            }
            V6Call::Close => p.sys_close(arg0),
            V6Call::Wait => p.sys_wait().map(|(pid, status)| {
                p.cpu.set_wait_status(status);
                pid
            }),
            V6Call::Creat => {
                let (path, mode) = (args.string(p, 0), args.word(p, 1));
                p.sys_creat(&path, mode)
            }
            V6Call::Link => {
                let (src, dst) = (args.string(p, 0), args.string(p, 1));
                p.sys_link(&src, &dst)
            }
            V6Call::Unlink => {
                let path = args.string(p, 0);
                p.sys_unlink(&path)
            }
            V6Call::Exec => {
                let (path, argv) = (args.string(p, 0), args.word(p, 1));
                return Ok(match exec(p, &path, argv) {
                    Ok(()) => Outcome::Reply(Ok(0), 0),
                    Err(e) => Outcome::Reply(Err(e), skip),
                });
            }
            V6Call::Chdir => {
                let path = args.string(p, 0);
                p.sys_chdir(&path)
            }
            V6Call::Chmod => {
                let (path, mode) = (args.string(p, 0), args.word(p, 1));
                p.sys_chmod(&path, mode)
            }
            V6Call::Brk => {
                let nd = args.word(p, 0);
                p.sys_brk(nd)
            }
            V6Call::Stat => {
                let (path, buf) = (args.string(p, 0), args.word(p, 1));
                p.sys_stat(&path).map(|st| {
                    write_stat(p, buf, &st);
                    0
                })
            }
            V6Call::Seek => {
                let (off, whence) = (args.word(p, 0), args.word(p, 1));
                seek_position(off, whence).and_then(|pos| p.sys_lseek(arg0, pos)).map(|o| o as u16)
            }
            V6Call::Getpid => p.sys_getpid(),
            V6Call::Dup => p.sys_dup(arg0),
            V6Call::Signal => {
                let (sig, handler) = (args.word(p, 0), args.word(p, 1));
                p.sys_signal(sig, handler)
            }
        };
        Ok(Outcome::Reply(result, skip))
    }
}

/// Converts a V6 seek request. Whence 3-5 count in 512-byte blocks, and all but 0 and 3 take a signed offset.
pub fn seek_position(off: u16, whence: u16) -> Result<SeekFrom, Errno> {
    let signed = off as i16 as i64;
    Ok(match whence {
        0 => SeekFrom::Start(off as u64),
        1 => SeekFrom::Current(signed),
        2 => SeekFrom::End(signed),
        3 => SeekFrom::Start(off as u64 * 512),
        4 => SeekFrom::Current(signed * 512),
        5 => SeekFrom::End(signed * 512),
        _ => return Err(Errno(libc::EINVAL)),
    })
}

/// Replaces the program and lays out a fresh stack holding the argument strings read from `argv`.
fn exec<C: V6Cpu>(p: &mut Process<UnixV6<C>>, path: &str, argv: u16) -> Result<(), Errno> {
    let args = p.memory.get_string_vector(argv);
    if p.args.trace >= Trace::Syscalls {
        debug!(target: "syscall", "<exec(\"{}\", [{}])>", path, Punctuated::join(&args, ", "));
    }
    p.exec_image(path)?;
    p.cpu.set_sp(0);
    UnixV6::<C>::set_args(p, &args, &[]);
    Ok(())
}

impl<C: V6Cpu> Os for UnixV6<C> {
    type Cpu = C;
    const PERSONALITY: Personality = C::PERSONALITY;
    const CONVENTION: ErrorConvention = ErrorConvention::CarryFlag;
    const NSIG: usize = 20;

    fn load(bytes: &[u8]) -> Result<LoadedImage, LoadError> {
        loader::load_v6(bytes, C::ARCH)
    }
    fn set_args(p: &mut Process<Self>, argv: &[String], _env: &[String]) {
        setup_stack(&mut p.cpu, &mut p.memory, argv, None);
    }

    fn syscall(p: &mut Process<Self>, n: u16) -> Result<(), ExecError> {
        let args = Args { addr: p.cpu.ip(), in_text: true };
        if let Outcome::Reply(result, skip) = Self::call(p, n, args, 0)? {
            Self::CONVENTION.report(p, 0, result);
            let ip = p.cpu.ip().wrapping_add(skip);
            p.cpu.set_ip(ip);
        }
        Ok(())
    }

    fn disposition(handler: u16) -> Disposition {
        match handler {
            0 => Disposition::Default,
            h if h & 1 != 0 => Disposition::Ignore,
            h => Disposition::Catch(h),
        }
    }
}
