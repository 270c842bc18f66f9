//! Minix 2 on the 8086.
//!
//! Programs trap with `int 0x20` and BX pointing at a message block.
//! The call number is the second word of the block and the arguments sit at fixed offsets after it.
//! The reply overwrites the call number: the result, or the negated errno.

use num_traits::FromPrimitive;
use tracing::debug;

use std::io::SeekFrom;

use crate::common::{Errno, Personality, Trace};
use crate::exec::{ExecError, Process};
use crate::exec::fs::FileStat;
use crate::i8086::I8086;
use crate::loader::{self, LoadedImage, LoadError};

use super::{setup_stack, ErrorConvention, Os, SysResult};
use super::signal::{Disposition, SignalAction};

/// Message-passing trap vector.
pub const TRAP: u16 = 0x20;

/// Minix `O_CREAT`: open takes a mode argument and a different message layout.
const O_CREAT: u16 = 0o100;

/// The Minix 2 system call numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum MinixCall {
    Exit = 1, Fork, Read, Write, Open, Close, Wait, Creat, Link, Unlink, Waitpid, Chdir, Time, Mknod, Chmod, Chown, Brk,
    Stat, Lseek, Getpid, Mount, Umount, Setuid, Getuid, Stime, Ptrace, Alarm, Fstat, Pause, Utime,
    Access = 33,
    Sync = 36, Kill, Rename, Mkdir, Rmdir, Dup, Pipe, Times,
    Setgid = 46, Getgid, Signal,
    Ioctl = 54, Fcntl,
    Exec = 59, Umask, Chroot, Setsid, Getpgrp, Ksig, Unpause,
    Revive = 67, TaskReply,
    Sigaction = 71, Sigsuspend, Sigpending, Sigprocmask, Sigreturn, Reboot, Svrctl,
}
impl MinixCall {
    pub fn name(self) -> &'static str {
        match self {
            MinixCall::Exit => "exit", MinixCall::Fork => "fork", MinixCall::Read => "read", MinixCall::Write => "write",
            MinixCall::Open => "open", MinixCall::Close => "close", MinixCall::Wait => "wait", MinixCall::Creat => "creat",
            MinixCall::Link => "link", MinixCall::Unlink => "unlink", MinixCall::Waitpid => "waitpid", MinixCall::Chdir => "chdir",
            MinixCall::Time => "time", MinixCall::Mknod => "mknod", MinixCall::Chmod => "chmod", MinixCall::Chown => "chown",
            MinixCall::Brk => "brk", MinixCall::Stat => "stat", MinixCall::Lseek => "lseek", MinixCall::Getpid => "getpid",
            MinixCall::Mount => "mount", MinixCall::Umount => "umount", MinixCall::Setuid => "setuid", MinixCall::Getuid => "getuid",
            MinixCall::Stime => "stime", MinixCall::Ptrace => "ptrace", MinixCall::Alarm => "alarm", MinixCall::Fstat => "fstat",
            MinixCall::Pause => "pause", MinixCall::Utime => "utime", MinixCall::Access => "access", MinixCall::Sync => "sync",
            MinixCall::Kill => "kill", MinixCall::Rename => "rename", MinixCall::Mkdir => "mkdir", MinixCall::Rmdir => "rmdir",
            MinixCall::Dup => "dup", MinixCall::Pipe => "pipe", MinixCall::Times => "times", MinixCall::Setgid => "setgid",
            MinixCall::Getgid => "getgid", MinixCall::Signal => "signal", MinixCall::Ioctl => "ioctl", MinixCall::Fcntl => "fcntl",
            MinixCall::Exec => "exec", MinixCall::Umask => "umask", MinixCall::Chroot => "chroot", MinixCall::Setsid => "setsid",
            MinixCall::Getpgrp => "getpgrp", MinixCall::Ksig => "ksig", MinixCall::Unpause => "unpause", MinixCall::Revive => "revive",
            MinixCall::TaskReply => "task_reply", MinixCall::Sigaction => "sigaction", MinixCall::Sigsuspend => "sigsuspend",
            MinixCall::Sigpending => "sigpending", MinixCall::Sigprocmask => "sigprocmask", MinixCall::Sigreturn => "sigreturn",
            MinixCall::Reboot => "reboot", MinixCall::Svrctl => "svrctl",
        }
    }
}

/// Writes a stat result in the Minix layout.
pub fn write_stat(p: &mut Process<Minix>, addr: u16, st: &FileStat) {
    let m = &mut p.memory;
    m.set_u16(addr, st.dev as u16);
    m.set_u16(addr.wrapping_add(2), st.ino as u16);
    m.set_u16(addr.wrapping_add(4), st.mode as u16);
    m.set_u16(addr.wrapping_add(6), st.nlink as u16);
    m.set_u16(addr.wrapping_add(8), st.uid as u16);
    m.set_u16(addr.wrapping_add(10), st.gid as u16);
    m.set_u16(addr.wrapping_add(12), st.rdev as u16);
    m.set_u32(addr.wrapping_add(14), st.size as u32);
    m.set_u32(addr.wrapping_add(18), st.atime as u32);
    m.set_u32(addr.wrapping_add(22), st.mtime as u32);
    m.set_u32(addr.wrapping_add(26), st.ctime as u32);
}

/// The Minix 2 personality.
pub struct Minix;

impl Os for Minix {
    type Cpu = I8086;
    const PERSONALITY: Personality = Personality::Minix;
    const CONVENTION: ErrorConvention = ErrorConvention::MessageErrno;
    const NSIG: usize = 12;

    fn load(bytes: &[u8]) -> Result<LoadedImage, LoadError> {
        loader::load_minix(bytes)
    }
    fn default_environment() -> Vec<String> {
        vec!["PATH=/bin:/usr/bin".into()]
    }
    fn set_args(p: &mut Process<Self>, argv: &[String], env: &[String]) {
        setup_stack(&mut p.cpu, &mut p.memory, argv, Some(env));
    }

    fn syscall(p: &mut Process<Self>, n: u16) -> Result<(), ExecError> {
        if n != TRAP {
            return Err(ExecError::UnimplementedInstruction);
        }
        let m = p.cpu.get_bx();
        let arg = |p: &Process<Self>, off: u16| p.memory.get_u16(m.wrapping_add(off));
        let num = arg(p, 2);
        let call = match MinixCall::from_u16(num) {
            Some(c) => c,
            None => return Err(p.unknown_syscall(num)),
        };

        let result: SysResult = match call {
            MinixCall::Exit => {
                p.sys_exit(arg(p, 4) as i16 as i32);
                return Ok(());
            }
            MinixCall::Fork => p.sys_fork(|child| {
                let m = child.cpu.get_bx();
                child.memory.set_u16(m.wrapping_add(2), 0);
                child.cpu.set_ax(0);
            }),
            MinixCall::Read => p.sys_read(arg(p, 4), arg(p, 10), arg(p, 6)),
            MinixCall::Write => p.sys_write(arg(p, 4), arg(p, 10), arg(p, 6)),
            MinixCall::Open => {
                let flags = arg(p, 6);
                if flags & O_CREAT != 0 {
                    let path = p.string_at(arg(p, 10));
                    p.sys_open(&path, flags, arg(p, 8))
                } else {
                    let path = p.string_at(arg(p, 8));
                    p.sys_open(&path, flags, 0)
                }
            }
            MinixCall::Close => p.sys_close(arg(p, 4)),
            MinixCall::Wait => p.sys_wait().map(|(pid, status)| {
                p.memory.set_u16(m.wrapping_add(4), status);
                pid
            }),
            MinixCall::Creat => {
                let path = p.string_at(arg(p, 8));
                p.sys_creat(&path, arg(p, 6))
            }
            MinixCall::Link => {
                let (src, dst) = (p.string_at(arg(p, 10)), p.string_at(arg(p, 12)));
                p.sys_link(&src, &dst)
            }
            MinixCall::Unlink => {
                let path = p.string_at(arg(p, 8));
                p.sys_unlink(&path)
            }
            MinixCall::Chdir => {
                let path = p.string_at(arg(p, 8));
                p.sys_chdir(&path)
            }
            MinixCall::Time => p.sys_time().map(|t| {
                p.memory.set_u32(m.wrapping_add(10), t);
                0
            }),
            MinixCall::Chmod => {
                let path = p.string_at(arg(p, 8));
                p.sys_chmod(&path, arg(p, 6))
            }
            MinixCall::Brk => p.sys_brk(arg(p, 10)).map(|r| {
                let brk = p.memory.brk;
                p.memory.set_u16(m.wrapping_add(18), brk);
                r
            }),
            MinixCall::Stat => {
                let (path, buf) = (p.string_at(arg(p, 10)), arg(p, 12));
                p.sys_stat(&path).map(|st| {
                    write_stat(p, buf, &st);
                    0
                })
            }
            MinixCall::Lseek => {
                let (fd, off, whence) = (arg(p, 4), p.memory.get_u32(m.wrapping_add(10)), arg(p, 6));
                let pos = match whence {
                    0 => Ok(SeekFrom::Start(off as u64)),
                    1 => Ok(SeekFrom::Current(off as i32 as i64)),
                    2 => Ok(SeekFrom::End(off as i32 as i64)),
                    _ => Err(Errno(libc::EINVAL)),
                };
                pos.and_then(|pos| p.sys_lseek(fd, pos)).map(|o| {
                    p.memory.set_u32(m.wrapping_add(10), o as u32);
                    0
                })
            }
            MinixCall::Getpid => p.sys_getpid(),
            MinixCall::Getuid => p.sys_getuid(),
            MinixCall::Getgid => p.sys_getgid(),
            MinixCall::Fstat => {
                let (fd, buf) = (arg(p, 4), arg(p, 10));
                p.sys_fstat(fd).map(|st| {
                    write_stat(p, buf, &st);
                    0
                })
            }
            MinixCall::Access => {
                let path = p.string_at(arg(p, 8));
                p.sys_access(&path, arg(p, 6))
            }
            MinixCall::Signal => p.sys_signal(arg(p, 4), arg(p, 14)),
            MinixCall::Ioctl => p.sys_ioctl(arg(p, 4), arg(p, 8), arg(p, 18)),
            MinixCall::Exec => {
                let (path, frame, size) = (p.string_at(arg(p, 10)), arg(p, 12), arg(p, 6));
                match exec(p, &path, frame, size) {
                    Ok(()) => return Ok(()),
                    Err(e) => Err(e),
                }
            }
            MinixCall::Umask => p.sys_umask(arg(p, 4)),
            MinixCall::Sigaction => sigaction(p, arg(p, 6), arg(p, 10), arg(p, 12)),
            other => return Err(p.not_implemented(other.name())),
        };
        Self::CONVENTION.report(p, m, result);
        Ok(())
    }

    fn disposition(handler: u16) -> Disposition {
        match handler {
            0 => Disposition::Default,
            1 => Disposition::Ignore,
            h => Disposition::Catch(h),
        }
    }
}

/// Replaces the program, keeping the argument frame the caller built.
///
/// The frame is an initial stack laid out as if it started at address 0: its string pointers are offsets into the
/// frame. It is copied to the top of the new address space and the pointers are relocated by its new base.
fn exec(p: &mut Process<Minix>, path: &str, frame: u16, size: u16) -> Result<(), Errno> {
    let bytes = p.memory.get(frame, size as usize);
    if p.args.trace >= Trace::Syscalls {
        let argc = u16::from_le_bytes([bytes.first().copied().unwrap_or(0), bytes.get(1).copied().unwrap_or(0)]);
        debug!(target: "syscall", "<exec(\"{}\") argc={}>", path, argc);
    }
    p.exec_image(path)?;

    let sp = 0u16.wrapping_sub(size);
    p.memory.set(sp, &bytes);
    let mut ad = sp.wrapping_add(2);
    // argv then envp, each null terminated
    for _ in 0..2 {
        for _ in 0..size / 2 {
            let q = p.memory.get_u16(ad);
            if q == 0 { break }
            p.memory.set_u16(ad, sp.wrapping_add(q));
            ad = ad.wrapping_add(2);
        }
        ad = ad.wrapping_add(2);
    }
    p.cpu.set_sp(sp);
    p.cpu.start_sp = sp;
    Ok(())
}

/// Installs a sigaction record and stores the previous one at `oact`. Null pointers skip their half.
fn sigaction(p: &mut Process<Minix>, sig: u16, act: u16, oact: u16) -> SysResult {
    let old = p.signals.get(sig);
    let result = if act != 0 {
        let m = &p.memory;
        let action = SignalAction { handler: m.get_u16(act), mask: m.get_u16(act.wrapping_add(2)), flags: m.get_u16(act.wrapping_add(4)) };
        p.set_signal_action(sig, action).map(|_| 0)
    } else {
        Minix::host_signal(sig).map(|_| 0).ok_or(Errno(libc::EINVAL))
    };
    if result.is_ok() && oact != 0 {
        p.memory.set_u16(oact, old.handler);
        p.memory.set_u16(oact.wrapping_add(2), old.mask);
        p.memory.set_u16(oact.wrapping_add(4), old.flags);
    }
    if p.args.trace >= Trace::Syscalls {
        debug!(target: "syscall", "<sigaction({}, {:#06x}, {:#06x}) => {:?}>", sig, act, oact, result);
    }
    result
}
