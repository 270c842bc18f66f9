//! Loading of Minix and Unix V6 executables into a fresh address space.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use std::io;
use std::mem;
use std::path::PathBuf;

use crate::common::Personality;
use crate::exec::memory::{AddressSpace, SEGMENT_SIZE};

/// Reasons a binary could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file itself could not be read.
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    /// A headerless binary does not fit in the address space.
    #[error("too long raw binary: {0} bytes")]
    TooLarge(usize),
    /// A Minix header names a processor other than the 8086.
    #[error("unknown cpu id: {0}")]
    UnknownCpu(u8),
    /// The header describes segments that do not fit in the address space.
    #[error("segments too large: text {text}, data {data}")]
    SegmentsTooLarge { text: u32, data: u32 },
}

/// The layout an image was loaded with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// No recognized header: the whole file at address 0.
    Raw,
    /// Minix with text and data in one buffer.
    MinixCombined,
    /// Minix with separate instruction and data space.
    MinixSeparate,
    /// V6 0407: text and data contiguous and writable.
    V6Contiguous,
    /// V6 0410: shared text, data starting at the next 8K boundary.
    V6SharedText,
    /// V6 0411: separate instruction and data space.
    V6Separate,
}

/// Which encoding of the V6 magic number to accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum V6Arch {
    /// Magic stored as a little-endian word: 0407, 0410 or 0411.
    Pdp11,
    /// Magic stored as a short jump over the header: 0xeb followed by 0x0e, 0x10 or 0x12.
    I8086,
}

/// One entry of a V6 symbol table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: u16,
    pub addr: u16,
}
impl Symbol {
    /// V6 symbol type for text-segment labels.
    pub const TEXT: u16 = 2;

    pub fn is_text(&self) -> bool {
        self.kind & 0o37 == Self::TEXT
    }
}

/// A parsed executable, ready to become a process.
#[derive(Clone)]
pub struct LoadedImage {
    pub memory: AddressSpace,
    pub entry: u16,
    pub format: Format,
    pub symbols: Vec<Symbol>,
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct MinixHeader {
    magic: [u8; 2],
    flags: u8,
    cpu: u8,
    hdrlen: u8,
    _unused: u8,
    _version: [u8; 2],
    text: [u8; 4],
    data: [u8; 4],
    bss: [u8; 4],
    entry: [u8; 4],
    _total: [u8; 4],
    _syms: [u8; 4],
}
impl MinixHeader {
    const MAGIC: [u8; 2] = [0x01, 0x03];
    const SEPARATE: u8 = 0x20;
    const CPU_I8086: u8 = 0x04;
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct AoutHeader {
    magic: [u8; 2],
    text: [u8; 2],
    data: [u8; 2],
    bss: [u8; 2],
    syms: [u8; 2],
    entry: [u8; 2],
    _unused: [u8; 2],
    reloc: [u8; 2],
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct SymbolEntry {
    name: [u8; 8],
    kind: [u8; 2],
    addr: [u8; 2],
}

fn header<T: Pod>(bytes: &[u8]) -> Option<&T> {
    bytes.get(..mem::size_of::<T>()).and_then(|h| bytemuck::try_from_bytes(h).ok())
}

/// Copies up to `len` bytes of `src` starting at `from` into `dst` at `at`.
/// A file shorter than its header claims just leaves the rest zeroed.
fn copy_segment(dst: &mut [u8], at: usize, src: &[u8], from: usize, len: usize) {
    let src = src.get(from..).unwrap_or(&[]);
    let len = len.min(src.len()).min(dst.len().saturating_sub(at));
    dst[at..at + len].copy_from_slice(&src[..len]);
}

/// Classifies a V6 header by its magic number.
fn v6_format(magic: [u8; 2], arch: V6Arch) -> Option<Format> {
    match arch {
        V6Arch::Pdp11 => match u16::from_le_bytes(magic) {
            0o407 => Some(Format::V6Contiguous),
            0o410 => Some(Format::V6SharedText),
            0o411 => Some(Format::V6Separate),
            _ => None,
        },
        V6Arch::I8086 => match magic {
            [0xeb, 0x0e] => Some(Format::V6Contiguous),
            [0xeb, 0x10] => Some(Format::V6SharedText),
            [0xeb, 0x12] => Some(Format::V6Separate),
            _ => None,
        },
    }
}

/// Picks the personality to run a binary under.
/// `force_pdp11` treats anything without a V6 header as a PDP-11 binary anyway.
pub fn detect(bytes: &[u8], force_pdp11: bool) -> Personality {
    let magic = match bytes.get(..2) {
        Some(m) => [m[0], m[1]],
        None => [0, 0],
    };
    if force_pdp11 || v6_format(magic, V6Arch::Pdp11).is_some() {
        Personality::UnixV6Pdp11
    } else if v6_format(magic, V6Arch::I8086).is_some() {
        Personality::UnixV6I8086
    } else {
        Personality::Minix
    }
}

/// Loads a headerless binary at address 0 with text and data sharing one buffer.
pub fn load_raw(bytes: &[u8]) -> Result<LoadedImage, LoadError> {
    if bytes.len() > 0xffff {
        return Err(LoadError::TooLarge(bytes.len()));
    }
    let mut memory = AddressSpace::shared();
    copy_segment(memory.text_mut(), 0, bytes, 0, bytes.len());
    memory.tsize = bytes.len() as u16;
    memory.dsize = 0;
    memory.brk = bytes.len() as u16;
    Ok(LoadedImage { memory, entry: 0, format: Format::Raw, symbols: vec![] })
}

/// Loads a Minix 2 executable, falling back to a raw image if there is no Minix header.
pub fn load_minix(bytes: &[u8]) -> Result<LoadedImage, LoadError> {
    let h = match header::<MinixHeader>(bytes) {
        Some(h) if h.magic == MinixHeader::MAGIC => h,
        _ => return load_raw(bytes),
    };
    if h.cpu != MinixHeader::CPU_I8086 {
        return Err(LoadError::UnknownCpu(h.cpu));
    }

    let text = u32::from_le_bytes(h.text);
    let data = u32::from_le_bytes(h.data);
    let bss = u32::from_le_bytes(h.bss) as u16;
    let entry = u32::from_le_bytes(h.entry) as u16;
    let off = h.hdrlen as usize;

    let (mut memory, format) = if h.flags & MinixHeader::SEPARATE != 0 {
        if text > 0xffff || data > 0xffff {
            return Err(LoadError::SegmentsTooLarge { text, data });
        }
        let mut memory = AddressSpace::split();
        copy_segment(memory.text_mut(), 0, bytes, off, text as usize);
        copy_segment(memory.data_mut(), 0, bytes, off + text as usize, data as usize);
        memory.brk = (data as u16).wrapping_add(bss);
        (memory, Format::MinixSeparate)
    } else {
        if text.saturating_add(data) as usize > SEGMENT_SIZE {
            return Err(LoadError::SegmentsTooLarge { text, data });
        }
        let mut memory = AddressSpace::shared();
        copy_segment(memory.text_mut(), 0, bytes, off, (text + data) as usize);
        memory.brk = (text as u16).wrapping_add(data as u16).wrapping_add(bss);
        (memory, Format::MinixCombined)
    };
    memory.tsize = text as u16;
    memory.dsize = data as u16;
    Ok(LoadedImage { memory, entry, format, symbols: vec![] })
}

/// Loads a Unix V6 a.out, falling back to a raw image if the magic does not match `arch`.
pub fn load_v6(bytes: &[u8], arch: V6Arch) -> Result<LoadedImage, LoadError> {
    let (h, format) = match header::<AoutHeader>(bytes) {
        Some(h) => match v6_format(h.magic, arch) {
            Some(format) => (h, format),
            None => return load_raw(bytes),
        },
        None => return load_raw(bytes),
    };

    let tsize = u16::from_le_bytes(h.text);
    let dsize = u16::from_le_bytes(h.data);
    let bss = u16::from_le_bytes(h.bss);
    let off = mem::size_of::<AoutHeader>();
    let (t, d) = (tsize as usize, dsize as usize);

    let mut memory = match format {
        Format::V6Separate => {
            let mut memory = AddressSpace::split();
            copy_segment(memory.text_mut(), 0, bytes, off, t);
            copy_segment(memory.data_mut(), 0, bytes, off + t, d);
            memory.runmax = Some(tsize as u32);
            memory.brk = dsize.wrapping_add(bss);
            memory
        }
        Format::V6SharedText => {
            let mut memory = AddressSpace::shared();
            let doff = (t + 0x1fff) & !0x1fff;
            copy_segment(memory.text_mut(), 0, bytes, off, t);
            copy_segment(memory.text_mut(), doff, bytes, off + t, d);
            memory.runmax = Some(tsize as u32);
            memory.brk = (doff as u16).wrapping_add(dsize).wrapping_add(bss);
            memory
        }
        _ => {
            let mut memory = AddressSpace::shared();
            copy_segment(memory.text_mut(), 0, bytes, off, t + d);
            memory.runmax = Some((t + d) as u32);
            memory.brk = tsize.wrapping_add(dsize).wrapping_add(bss);
            memory
        }
    };
    memory.tsize = tsize;
    memory.dsize = dsize;
    // only the PDP-11 enforces the execution limit
    if arch == V6Arch::I8086 {
        memory.runmax = None;
    }

    let syms = u16::from_le_bytes(h.syms) as usize;
    let symbols = if syms != 0 {
        let mut at = off + t + d;
        if u16::from_le_bytes(h.reloc) == 0 {
            at += t + d; // skip the relocation bits
        }
        read_symbols(bytes.get(at..).unwrap_or(&[]), syms)
    } else {
        vec![]
    };

    Ok(LoadedImage { memory, entry: u16::from_le_bytes(h.entry), format, symbols })
}

fn read_symbols(bytes: &[u8], len: usize) -> Vec<Symbol> {
    let len = len.min(bytes.len());
    let len = len - len % mem::size_of::<SymbolEntry>();
    let entries: &[SymbolEntry] = match bytemuck::try_cast_slice(&bytes[..len]) {
        Ok(e) => e,
        Err(_) => return vec![],
    };
    entries.iter().map(|e| {
        let end = e.name.iter().position(|&c| c == 0).unwrap_or(e.name.len());
        Symbol {
            name: String::from_utf8_lossy(&e.name[..end]).into_owned(),
            kind: u16::from_le_bytes(e.kind),
            addr: u16::from_le_bytes(e.addr),
        }
    }).collect()
}

/// Reads a binary from disk.
pub fn read_binary(path: &std::path::Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| LoadError::Io { path: path.to_owned(), source })
}
