//! The emulated operating systems: system call dispatch, process layout and fork/exec/wait.
//!
//! Each personality is a type implementing [`Os`], which pins the processor it runs on.
//! The calls both systems share live here as `sys_*` methods on [`Process`], taking already-decoded arguments
//! and returning a [`SysResult`]. The personality modules only deal with argument layouts and result conventions.

use tracing::{debug, warn};

use std::cell::RefCell;
use std::fmt;
use std::fs::{self, OpenOptions, Permissions};
use std::io::SeekFrom;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::{Errno, Personality, Trace};
use crate::exec::{Cpu, ExecError, Process};
use crate::exec::fs::{shared, FileStat, HostFile};
use crate::exec::memory::AddressSpace;
use crate::loader::{self, LoadedImage, LoadError};

/// Emits the `<call(args) => result>` record of a system call when syscall tracing is on.
macro_rules! syscall_trace {
    ($p:expr, $result:expr, $($arg:tt)*) => {
        if $p.args.trace >= Trace::Syscalls {
            debug!(target: "syscall", "<{} => {}>", format_args!($($arg)*), ShowResult(&$result));
        }
    }
}

pub mod signal;
pub mod host;
pub mod minix;
pub mod unixv6;

pub use minix::Minix;
pub use unixv6::{UnixV6, UnixV6I8086, UnixV6Pdp11, V6Cpu};

use signal::Disposition;

/// The outcome of a system call as seen by the emulated program: a result word or an errno.
pub type SysResult = Result<u16, Errno>;

struct ShowResult<'a, T>(&'a Result<T, Errno>);
impl<T: fmt::Display> fmt::Display for ShowResult<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Ok(v) => write!(f, "{}", v),
            Err(e) => write!(f, "{}", e),
        }
    }
}

/// How emulated fork is carried out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkMode {
    /// Fork the host process. The child continues emulating on its own.
    Host,
    /// Copy the process and run the copy to completion before the parent continues.
    Simulate,
}
impl Default for ForkMode {
    fn default() -> Self {
        if cfg!(feature = "host-fork") { ForkMode::Host } else { ForkMode::Simulate }
    }
}

/// How a system reports the result of a call back to the program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorConvention {
    /// Minix: the result, or the negated errno, replaces the call number in the message block, and AX is cleared.
    MessageErrno,
    /// Unix V6: the result or errno goes in r0/AX, with the carry flag set on error.
    CarryFlag,
}
impl ErrorConvention {
    /// Writes `result` back to `process`. `message` is the message block address (ignored by `CarryFlag`).
    pub fn report<O: Os>(self, process: &mut Process<O>, message: u16, result: SysResult) {
        match self {
            ErrorConvention::MessageErrno => {
                let word = match result {
                    Ok(v) => v,
                    Err(e) => (e.0 as u16).wrapping_neg(),
                };
                process.memory.set_u16(message.wrapping_add(2), word);
                process.cpu.set_result(0);
            }
            ErrorConvention::CarryFlag => {
                let (word, failed) = match result {
                    Ok(v) => (v, false),
                    Err(e) => (e.0 as u16, true),
                };
                process.cpu.set_result(word);
                process.cpu.assign_carry(failed);
            }
        }
    }
}

/// An emulated operating system.
pub trait Os: Sized + 'static {
    /// The processor binaries for this system run on.
    type Cpu: Cpu;
    const PERSONALITY: Personality;
    const CONVENTION: ErrorConvention;
    /// Number of signal slots.
    const NSIG: usize;

    /// Parses an executable for this system.
    fn load(bytes: &[u8]) -> Result<LoadedImage, LoadError>;
    /// The environment a program gets when none is given.
    fn default_environment() -> Vec<String> {
        vec![]
    }
    /// Lays out the initial stack of a freshly loaded process.
    fn set_args(process: &mut Process<Self>, argv: &[String], env: &[String]);
    /// Handles a trap. The instruction pointer is already past the trapping instruction.
    fn syscall(process: &mut Process<Self>, n: u16) -> Result<(), ExecError>;

    /// Maps an emulated signal number to the host signal with the same meaning.
    fn host_signal(sig: u16) -> Option<i32> {
        match sig {
            2 => Some(libc::SIGINT),
            4 => Some(libc::SIGILL),
            8 => Some(libc::SIGFPE),
            11 => Some(libc::SIGSEGV),
            _ => None,
        }
    }
    /// Interprets a handler value stored by the program.
    fn disposition(handler: u16) -> Disposition;
}

/// Resolves an emulated path on the host: absolute paths are placed under `root` when there is one.
pub fn convert_path(root: Option<&Path>, path: &str) -> PathBuf {
    match (root, path.strip_prefix('/')) {
        (Some(root), Some(rest)) => root.join(rest),
        _ => PathBuf::from(path),
    }
}

static PID_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Allocates the pid of a new emulated process.
pub fn next_pid() -> u16 {
    let n = PID_COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    let host = std::process::id();
    (((host << 4) % 30000) as u16).wrapping_add(n)
}

thread_local! {
    /// (pid, exit code) of every simulated child that finished and was not waited for yet.
    static EXIT_CODES: RefCell<Vec<(u16, i32)>> = RefCell::new(vec![]);
}

/// Records a finished simulated child for a later wait.
pub(crate) fn push_exit_code(pid: u16, code: i32) {
    EXIT_CODES.with(|e| e.borrow_mut().push((pid, code)));
}
fn pop_exit_code() -> Option<(u16, i32)> {
    EXIT_CODES.with(|e| e.borrow_mut().pop())
}

fn put_strings(memory: &mut AddressSpace, ptr: &mut u16, strings: &mut u16, values: &[String]) {
    for s in values {
        *ptr = ptr.wrapping_add(2);
        memory.set_u16(*ptr, *strings);
        memory.set_null_terminated(*strings, s.as_bytes());
        *strings = strings.wrapping_add(s.len() as u16 + 1);
    }
}

/// Lays out argc, the argv pointers and (if given) the envp pointers below the current stack pointer,
/// with the strings above them, and records the result as the entry stack pointer.
/// Only the environment gets null terminators: V6 programs find their arguments through argc alone.
pub(crate) fn setup_stack<C: Cpu>(cpu: &mut C, memory: &mut AddressSpace, argv: &[String], env: Option<&[String]>) {
    let slen: usize = argv.iter().chain(env.unwrap_or(&[])).map(|s| s.len() + 1).sum();
    let mut strings = cpu.sp().wrapping_sub(((slen + 1) & !1) as u16);
    let words = 1 + argv.len() + env.map(|e| 1 + e.len() + 1).unwrap_or(0);
    let sp = strings.wrapping_sub((words * 2) as u16);
    cpu.set_sp(sp);
    cpu.set_start_sp(sp);

    let mut ptr = sp;
    memory.set_u16(ptr, argv.len() as u16);
    put_strings(memory, &mut ptr, &mut strings, argv);
    if let Some(env) = env {
        ptr = ptr.wrapping_add(2);
        memory.set_u16(ptr, 0);
        put_strings(memory, &mut ptr, &mut strings, env);
        ptr = ptr.wrapping_add(2);
        memory.set_u16(ptr, 0);
    }
}

impl<O: Os> Process<O> {
    /// Reads a string argument out of data memory.
    pub fn string_at(&self, addr: u16) -> String {
        String::from_utf8_lossy(self.memory.get_null_terminated(addr)).into_owned()
    }
    /// Resolves a path argument on the host.
    pub fn host_path(&self, path: &str) -> PathBuf {
        convert_path(self.args.root.as_deref(), path)
    }
    fn fork_mode(&self) -> ForkMode {
        self.args.fork_mode.unwrap_or_default()
    }

    /// Terminates the process.
    pub fn sys_exit(&mut self, code: i32) {
        if self.args.trace >= Trace::Syscalls {
            debug!(target: "syscall", "<exit({})>", code);
        }
        self.exit(code);
    }

    /// Forks the process.
    ///
    /// With `ForkMode::Simulate` the copy is handed to `prepare_child` (which makes the call return 0 in it),
    /// then runs to completion before this returns the child pid.
    /// With `ForkMode::Host` this returns 0 in the host child and the child pid in the parent.
    pub fn sys_fork<F: FnOnce(&mut Process<O>)>(&mut self, prepare_child: F) -> SysResult {
        let result = match self.fork_mode() {
            ForkMode::Host => match host::fork() {
                Ok(0) => {
                    self.pid = next_pid();
                    Ok(0)
                }
                Ok(pid) => Ok(((pid % 30000) + 1) as u16),
                Err(e) => Err(e),
            },
            ForkMode::Simulate => {
                let mut child = self.duplicate();
                prepare_child(&mut child);
                let code = child.run();
                push_exit_code(child.pid, code);
                signal::switch_signals::<O>(&self.signals, false);
                Ok(child.pid)
            }
        };
        syscall_trace!(self, result, "fork()");
        result
    }

    /// Waits for a child. Returns its pid and the raw wait status.
    pub fn sys_wait(&mut self) -> Result<(u16, u16), Errno> {
        let result = match self.fork_mode() {
            ForkMode::Simulate => match pop_exit_code() {
                Some((pid, code)) => Ok((pid, ((code as u16) << 8) | 14)),
                None => Err(Errno(libc::EINVAL)),
            },
            ForkMode::Host => host::wait().map(|(pid, status)| (((pid % 30000) + 1) as u16, status as u16)),
        };
        syscall_trace!(self, result.map(|(_, status)| format!("{:#06x}", status)), "wait()");
        result
    }

    /// Reads from `fd` into `[buf, buf + len)`, clamped to the top of memory.
    pub fn sys_read(&mut self, fd: u16, buf: u16, len: u16) -> SysResult {
        let len = (len as usize).min(0x10000 - buf as usize);
        let result = self.files.get(fd).and_then(|f| {
            let mut tmp = vec![0; len];
            let n = f.borrow_mut().read(&mut tmp).map_err(|e| e.errno())?;
            self.memory.set(buf, &tmp[..n]);
            Ok(n as u16)
        });
        syscall_trace!(self, result, "read({}, {:#06x}, {})", fd, buf, len);
        result
    }
    /// Writes `[buf, buf + len)` to `fd`, clamped to the top of memory.
    pub fn sys_write(&mut self, fd: u16, buf: u16, len: u16) -> SysResult {
        let len = (len as usize).min(0x10000 - buf as usize);
        let data = self.memory.get(buf, len);
        let result = self.files.get(fd).and_then(|f| {
            f.borrow_mut().write(&data).map(|n| n as u16).map_err(|e| e.errno())
        });
        syscall_trace!(self, result, "write({}, {:#06x}, {})", fd, buf, len);
        result
    }

    /// Opens a file with open(2) flag bits (which both systems share with the host).
    /// The umask applies to `mode` when the call creates the file.
    pub fn sys_open(&mut self, path: &str, flags: u16, mode: u16) -> SysResult {
        let flags = flags as i32;
        let access = flags & libc::O_ACCMODE;
        let mut options = OpenOptions::new();
        options.read(access == libc::O_RDONLY || access == libc::O_RDWR)
            .write(access == libc::O_WRONLY || access == libc::O_RDWR)
            .append(flags & libc::O_APPEND != 0)
            .truncate(flags & libc::O_TRUNC != 0)
            .mode((mode & !self.umask & 0o7777) as u32);
        if flags & libc::O_CREAT != 0 {
            if flags & libc::O_EXCL != 0 { options.create_new(true); } else { options.create(true); }
        }
        let result = self.open_with(path, &options);
        syscall_trace!(self, result, "open(\"{}\", {}, {:#o})", path, flags, mode);
        result
    }
    /// Creates (or truncates) a file for writing.
    pub fn sys_creat(&mut self, path: &str, mode: u16) -> SysResult {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true).mode((mode & !self.umask & 0o7777) as u32);
        let result = self.open_with(path, &options);
        syscall_trace!(self, result, "creat(\"{}\", {:#o})", path, mode);
        result
    }
    fn open_with(&mut self, path: &str, options: &OpenOptions) -> SysResult {
        let file = options.open(self.host_path(path)).map_err(Errno::from)?;
        Ok(self.files.insert(shared(HostFile(file))))
    }
    pub fn sys_close(&mut self, fd: u16) -> SysResult {
        let result = self.files.close(fd).map(|_| 0);
        syscall_trace!(self, result, "close({})", fd);
        result
    }
    pub fn sys_dup(&mut self, fd: u16) -> SysResult {
        let result = self.files.dup(fd);
        syscall_trace!(self, result, "dup({})", fd);
        result
    }

    pub fn sys_link(&mut self, src: &str, dst: &str) -> SysResult {
        let result = fs::hard_link(self.host_path(src), self.host_path(dst)).map(|_| 0).map_err(Errno::from);
        syscall_trace!(self, result, "link(\"{}\", \"{}\")", src, dst);
        result
    }
    pub fn sys_unlink(&mut self, path: &str) -> SysResult {
        let result = fs::remove_file(self.host_path(path)).map(|_| 0).map_err(Errno::from);
        syscall_trace!(self, result, "unlink(\"{}\")", path);
        result
    }
    pub fn sys_chdir(&mut self, path: &str) -> SysResult {
        let result = std::env::set_current_dir(self.host_path(path)).map(|_| 0).map_err(Errno::from);
        syscall_trace!(self, result, "chdir(\"{}\")", path);
        result
    }
    pub fn sys_chmod(&mut self, path: &str, mode: u16) -> SysResult {
        let perms = Permissions::from_mode((mode & 0o7777) as u32);
        let result = fs::set_permissions(self.host_path(path), perms).map(|_| 0).map_err(Errno::from);
        syscall_trace!(self, result, "chmod(\"{}\", {:#o})", path, mode);
        result
    }
    pub fn sys_access(&mut self, path: &str, mode: u16) -> SysResult {
        let result = host::access(&self.host_path(path), mode as i32).map(|_| 0);
        syscall_trace!(self, result, "access(\"{}\", {:#o})", path, mode);
        result
    }

    /// Seconds since the epoch, truncated to 32 bits.
    pub fn sys_time(&mut self) -> Result<u32, Errno> {
        let result = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).map_err(|_| Errno(libc::EINVAL));
        syscall_trace!(self, result, "time()");
        result
    }

    /// Moves the break. It may not go below the initialized data or within 1K (rounded) of the stack.
    pub fn sys_brk(&mut self, nd: u16) -> SysResult {
        let limit = (self.cpu.sp() as i32 - 0x400) & !0x3ff;
        let result = if nd < self.memory.dsize || nd as i32 >= limit {
            Err(Errno(libc::ENOMEM))
        } else {
            self.memory.brk = nd;
            Ok(0)
        };
        syscall_trace!(self, result, "brk({:#06x})", nd);
        result
    }

    pub fn sys_stat(&mut self, path: &str) -> Result<FileStat, Errno> {
        let result = fs::metadata(self.host_path(path)).map(|m| FileStat::from(&m)).map_err(Errno::from);
        syscall_trace!(self, result.map(|_| 0), "stat(\"{}\")", path);
        result
    }
    /// Status of an open file. The standard streams report `EBADF`.
    pub fn sys_fstat(&mut self, fd: u16) -> Result<FileStat, Errno> {
        let result = self.files.get(fd).and_then(|f| {
            let f = f.borrow();
            if f.is_standard_stream() { return Err(Errno(libc::EBADF)); }
            f.stat().map_err(|e| e.errno())
        });
        syscall_trace!(self, result.map(|_| 0), "fstat({})", fd);
        result
    }
    /// Repositions `fd` and returns the new offset.
    pub fn sys_lseek(&mut self, fd: u16, pos: SeekFrom) -> Result<u64, Errno> {
        let result = self.files.get(fd).and_then(|f| f.borrow_mut().seek(pos).map_err(|e| e.errno()));
        syscall_trace!(self, result, "lseek({}, {:?})", fd, pos);
        result
    }

    pub fn sys_getpid(&mut self) -> SysResult {
        let result = Ok(self.pid);
        syscall_trace!(self, result, "getpid()");
        result
    }
    pub fn sys_getuid(&mut self) -> SysResult {
        let result = Ok(host::getuid() as u16);
        syscall_trace!(self, result, "getuid()");
        result
    }
    pub fn sys_getgid(&mut self) -> SysResult {
        let result = Ok(host::getgid() as u16);
        syscall_trace!(self, result, "getgid()");
        result
    }
    pub fn sys_ioctl(&mut self, fd: u16, request: u16, data: u16) -> SysResult {
        let result = Err(Errno(libc::EINVAL));
        syscall_trace!(self, result, "ioctl({}, {:#06x}, {:#06x})", fd, request, data);
        result
    }
    /// Sets the file creation mask and returns the old one.
    pub fn sys_umask(&mut self, mask: u16) -> SysResult {
        let result = Ok(self.umask);
        self.umask = mask & 0o777;
        syscall_trace!(self, result, "umask({:#o})", mask);
        result
    }

    /// Stores a new handler for `sig` (with a cleared mask and flags) and returns the old one.
    pub fn sys_signal(&mut self, sig: u16, handler: u16) -> SysResult {
        let result = self.set_signal_action(sig, signal::SignalAction { handler, mask: 0, flags: 0 }).map(|old| old.handler);
        syscall_trace!(self, result, "signal({}, {:#06x})", sig, handler);
        result
    }
    /// Replaces the action of a signal the host can deliver and installs the matching host disposition.
    pub(crate) fn set_signal_action(&mut self, sig: u16, action: signal::SignalAction) -> Result<signal::SignalAction, Errno> {
        let host = O::host_signal(sig).ok_or(Errno(libc::EINVAL))?;
        let old = self.signals.set(sig, action).ok_or(Errno(libc::EINVAL))?;
        signal::install(host, O::disposition(action.handler));
        Ok(old)
    }

    /// Replaces the program with the binary at `path`.
    ///
    /// On failure nothing changes and `EINVAL` is returned. On success memory, registers and the decode cache
    /// come from the new image, and caught signals revert to their default action.
    pub fn exec_image(&mut self, path: &str) -> Result<(), Errno> {
        let image = loader::read_binary(&self.host_path(path)).and_then(|bytes| O::load(&bytes));
        let image = match image {
            Ok(image) => image,
            Err(e) => {
                debug!(target: "syscall", "exec {}: {}", path, e);
                return Err(Errno(libc::EINVAL));
            }
        };
        self.install_image(image);
        self.signals.reset_caught::<O>();
        signal::switch_signals::<O>(&self.signals, false);
        Ok(())
    }

    /// Logs a call that exists but is not emulated and returns the fatal error for it.
    pub(crate) fn not_implemented(&self, name: &str) -> ExecError {
        warn!(target: "syscall", "<{}: not implemented>", name);
        ExecError::UnimplementedSyscall
    }
    /// Logs a call number that does not exist and returns the fatal error for it.
    pub(crate) fn unknown_syscall(&self, n: u16) -> ExecError {
        warn!(target: "syscall", "<{}: unknown syscall>", n);
        ExecError::UnknownSyscall
    }
}
