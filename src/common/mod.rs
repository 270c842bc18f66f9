//! Everything that is shared by the decoders, the engine, and the system personalities.

use std::fmt;
use std::io;

pub(crate) mod util;

/// The emulated system a binary is run under.
/// Each personality fixes both the instruction set and the syscall ABI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Personality {
    /// Minix 2 on the 8086, calls made through `int 0x20` with a message block.
    Minix,
    /// Unix V6 on the PDP-11, calls made through `sys n` with inline arguments.
    UnixV6Pdp11,
    /// Unix V6 recompiled for the 8086, calls made through `int n` with inline arguments.
    UnixV6I8086,
}
impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Personality::Minix => "minix2/i8086",
            Personality::UnixV6Pdp11 => "unixv6/pdp11",
            Personality::UnixV6I8086 => "unixv6/i8086",
        })
    }
}

/// How much diagnostic output the emulator produces while running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Trace {
    Off,
    /// One record per system call.
    Syscalls,
    /// Also one record per executed instruction.
    Instructions,
    /// Also a register dump before each instruction.
    Memory,
}
impl Default for Trace {
    fn default() -> Self {
        Trace::Off
    }
}

/// A host error number carried back to the emulated process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Errno(pub i32);
impl Errno {
    /// The errno of the most recent failed host call.
    pub fn last() -> Self {
        Errno::from(&io::Error::last_os_error())
    }
}
impl From<&io::Error> for Errno {
    fn from(e: &io::Error) -> Self {
        match e.raw_os_error() {
            Some(n) => Errno(n),
            None => Errno(match e.kind() {
                io::ErrorKind::NotFound => libc::ENOENT,
                io::ErrorKind::PermissionDenied => libc::EACCES,
                io::ErrorKind::AlreadyExists => libc::EEXIST,
                io::ErrorKind::InvalidInput => libc::EINVAL,
                _ => libc::EIO,
            }),
        }
    }
}
impl From<io::Error> for Errno {
    fn from(e: io::Error) -> Self {
        Errno::from(&e)
    }
}
impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

#[test]
fn test_errno_conversion() {
    assert_eq!(Errno::from(io::Error::from_raw_os_error(libc::ENOENT)), Errno(libc::ENOENT));
    assert_eq!(Errno::from(io::Error::new(io::ErrorKind::InvalidInput, "bad")), Errno(libc::EINVAL));
    assert_eq!(Errno(9).to_string(), "errno 9");
}
