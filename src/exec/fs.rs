//! Tools for giving the emulated process access to files.

use std::cell::RefCell;
use std::fs::{File, Metadata};
use std::io::{self, Error, ErrorKind, Cursor, SeekFrom, Read, Write, Seek};
use std::os::unix::fs::MetadataExt;
use std::rc::Rc;

use crate::common::Errno;

/// The types of errors for client-level file operations.
#[derive(Debug)]
pub enum FileError {
    /// The handle does not permit the operation (e.g. writing a read-only file).
    Permissions,
    /// A real IO error.
    IOError(Error),
}
impl From<Error> for FileError {
    fn from(err: Error) -> FileError {
        FileError::IOError(err)
    }
}
impl FileError {
    /// The host errno this error is reported to the emulated process as.
    pub fn errno(&self) -> Errno {
        match self {
            FileError::Permissions => Errno(libc::EBADF),
            FileError::IOError(e) => Errno::from(e),
        }
    }
}

/// File status in host terms, converted to each system's layout by the personality.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}
impl From<&Metadata> for FileStat {
    fn from(m: &Metadata) -> Self {
        Self {
            dev: m.dev(),
            ino: m.ino(),
            mode: m.mode(),
            nlink: m.nlink(),
            uid: m.uid(),
            gid: m.gid(),
            rdev: m.rdev(),
            size: m.size(),
            atime: m.atime(),
            mtime: m.mtime(),
            ctime: m.ctime(),
        }
    }
}

/// All features of files that are exposed to client programs.
pub trait FileHandle {
    /// Reads at most enough data to fill `buf` and returns the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError>;
    /// Writes the content of `buf` and returns the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> Result<usize, FileError>;
    /// Sets the internal read/write cursor to `pos` and returns the new absolute position.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FileError>;
    /// Gets the status of the underlying file.
    fn stat(&self) -> Result<FileStat, FileError>;
    /// True for the host's own stdin/stdout/stderr.
    fn is_standard_stream(&self) -> bool { false }
}

/// Represents a file that is stored entirely in memory.
///
/// The data is backed by a `Cursor<Vec<u8>>` behind `Rc<RefCell<T>>` so a test can inspect it while the
/// process holds the handle. The `readable`, `writable`, and `seekable` fields control client-level file permissions.
/// If `appendonly` is set to `true`, then the file will seek to the end before each write operation.
pub struct MemoryFile {
    pub content: Rc<RefCell<Cursor<Vec<u8>>>>,
    pub readable: bool,
    pub writable: bool,
    pub seekable: bool,
    pub appendonly: bool,
}
impl MemoryFile {
    pub fn new(data: Vec<u8>, readable: bool, writable: bool) -> Self {
        Self { content: Rc::new(RefCell::new(Cursor::new(data))), readable, writable, seekable: true, appendonly: false }
    }
}
impl FileHandle for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError> {
        if !self.readable { return Err(FileError::Permissions); }
        let mut h = self.content.borrow_mut();
        let mut written = 0;
        loop {
            match h.read(&mut buf[written..]) {
                Ok(count) => {
                    written += count;
                    if written >= buf.len() || count == 0 { return Ok(written); } // stop when we fill buf or if we got nothing
                }
                Err(e) => match e.kind() {
                    ErrorKind::Interrupted => (), // just retry if interrupted
                    _ => return Err(e.into()),
                }
            }
        }
    }
    fn write(&mut self, buf: &[u8]) -> Result<usize, FileError> {
        if !self.writable { return Err(FileError::Permissions); }
        let mut f = self.content.borrow_mut();
        if self.appendonly { f.seek(SeekFrom::End(0))?; }
        f.write_all(buf)?;
        Ok(buf.len())
    }
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FileError> {
        if !self.seekable { return Err(FileError::IOError(Error::from_raw_os_error(libc::ESPIPE))); }
        Ok(self.content.borrow_mut().seek(pos)?)
    }
    fn stat(&self) -> Result<FileStat, FileError> {
        let size = self.content.borrow().get_ref().len() as u64;
        Ok(FileStat { mode: 0o100644, nlink: 1, size, ..Default::default() })
    }
}

/// A file opened on the host filesystem.
pub struct HostFile(pub File);
impl FileHandle for HostFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError> {
        Ok(self.0.read(buf)?)
    }
    fn write(&mut self, buf: &[u8]) -> Result<usize, FileError> {
        Ok(self.0.write(buf)?)
    }
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FileError> {
        Ok(self.0.seek(pos)?)
    }
    fn stat(&self) -> Result<FileStat, FileError> {
        Ok(FileStat::from(&self.0.metadata()?))
    }
}

/// One of the host's standard streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StandardStream {
    Stdin,
    Stdout,
    Stderr,
}
impl FileHandle for StandardStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError> {
        match self {
            StandardStream::Stdin => Ok(io::stdin().read(buf)?),
            _ => Err(FileError::Permissions),
        }
    }
    fn write(&mut self, buf: &[u8]) -> Result<usize, FileError> {
        let n = match self {
            StandardStream::Stdin => return Err(FileError::Permissions),
            StandardStream::Stdout => {
                let mut out = io::stdout();
                let n = out.write(buf)?;
                out.flush()?;
                n
            }
            StandardStream::Stderr => io::stderr().write(buf)?,
        };
        Ok(n)
    }
    fn seek(&mut self, _: SeekFrom) -> Result<u64, FileError> {
        Err(FileError::IOError(Error::from_raw_os_error(libc::ESPIPE)))
    }
    fn stat(&self) -> Result<FileStat, FileError> {
        Err(FileError::Permissions)
    }
    fn is_standard_stream(&self) -> bool { true }
}

/// A shared handle to an open file.
pub type SharedFile = Rc<RefCell<dyn FileHandle>>;

/// Wraps a handle for insertion in a `FileTable`.
pub fn shared<F: FileHandle + 'static>(file: F) -> SharedFile {
    Rc::new(RefCell::new(file))
}

/// The open file descriptors of a process.
///
/// Cloning the table shares every handle (and its offset) with the clone.
/// The host file is closed when the last table referring to it drops its slot.
#[derive(Clone)]
pub struct FileTable {
    pub handles: Vec<Option<SharedFile>>,
}
impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}
impl FileTable {
    /// A table with the host's stdin, stdout and stderr in slots 0-2.
    pub fn new() -> Self {
        Self { handles: vec![
            Some(shared(StandardStream::Stdin)),
            Some(shared(StandardStream::Stdout)),
            Some(shared(StandardStream::Stderr)),
        ] }
    }

    /// Gets the handle open at `fd`, or `EBADF`.
    pub fn get(&self, fd: u16) -> Result<SharedFile, Errno> {
        match self.handles.get(fd as usize) {
            Some(Some(h)) => Ok(h.clone()),
            _ => Err(Errno(libc::EBADF)),
        }
    }
    /// Installs `handle` in the lowest free slot and returns its descriptor.
    pub fn insert(&mut self, handle: SharedFile) -> u16 {
        match self.handles.iter().position(|h| h.is_none()) {
            Some(fd) => {
                self.handles[fd] = Some(handle);
                fd as u16
            }
            None => {
                self.handles.push(Some(handle));
                (self.handles.len() - 1) as u16
            }
        }
    }
    /// Replaces whatever is open at `fd`.
    pub fn install(&mut self, fd: u16, handle: SharedFile) {
        let fd = fd as usize;
        if self.handles.len() <= fd {
            self.handles.resize(fd + 1, None);
        }
        self.handles[fd] = Some(handle);
    }
    pub fn close(&mut self, fd: u16) -> Result<(), Errno> {
        match self.handles.get_mut(fd as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(Errno(libc::EBADF)),
        }
    }
    /// Opens a second descriptor onto the handle at `fd`.
    pub fn dup(&mut self, fd: u16) -> Result<u16, Errno> {
        let h = self.get(fd)?;
        Ok(self.insert(h))
    }
}

#[test]
fn test_file_table() {
    let mut t = FileTable::new();
    assert_eq!(t.insert(shared(MemoryFile::new(b"hello".to_vec(), true, false))), 3);
    assert_eq!(t.dup(3), Ok(4));
    assert_eq!(t.close(3), Ok(()));
    assert_eq!(t.close(3), Err(Errno(libc::EBADF)));

    let mut buf = [0; 3];
    let h = t.get(4).unwrap();
    assert_eq!(h.borrow_mut().read(&mut buf).unwrap(), 3);
    assert_eq!(&buf, b"hel");

    // a cloned table shares the offset
    let other = t.clone();
    let mut rest = [0; 8];
    let h = other.get(4).unwrap();
    assert_eq!(h.borrow_mut().read(&mut rest).unwrap(), 2);
    assert_eq!(&rest[..2], b"lo");

    assert_eq!(t.insert(shared(MemoryFile::new(vec![], true, true))), 3);
    assert!(t.get(2).unwrap().borrow().is_standard_stream());
}
