//! The flat 64K address space of an emulated process.

use memchr::memchr;

use std::mem;

/// Size of every segment buffer.
pub const SEGMENT_SIZE: usize = 0x10000;

fn new_segment() -> Box<[u8]> {
    vec![0; SEGMENT_SIZE].into_boxed_slice()
}

/// Backing storage of an address space.
#[derive(Clone)]
pub enum Segments {
    /// Text and data alias one buffer.
    Shared(Box<[u8]>),
    /// Separate instruction and data buffers.
    Split { text: Box<[u8]>, data: Box<[u8]> },
}

macro_rules! impl_mem_primitive {
    ($([ $get:ident, $set:ident => $t:ty ]),*$(,)?) => {$(
        /// Reads a little-endian value from data memory, wrapping per byte.
        pub fn $get(&self, pos: u16) -> $t {
            let data = self.data();
            let mut v = [0; mem::size_of::<$t>()];
            for (i, b) in v.iter_mut().enumerate() {
                *b = data[pos.wrapping_add(i as u16) as usize];
            }
            <$t>::from_le_bytes(v)
        }
        /// Writes a little-endian value to data memory, wrapping per byte.
        pub fn $set(&mut self, pos: u16, val: $t) {
            self.set(pos, &val.to_le_bytes())
        }
    )*}
}

/// The memory of one process, along with the segment sizes the loader recorded.
#[derive(Clone)]
pub struct AddressSpace {
    segments: Segments,
    /// Size of the text segment in bytes.
    pub tsize: u16,
    /// Size of the initialized data segment in bytes.
    pub dsize: u16,
    /// The current break: the stack may never grow below it.
    pub brk: u16,
    /// Instructions may only be fetched below this limit (PDP-11 only).
    pub runmax: Option<u32>,
}
impl AddressSpace {
    /// Creates a zeroed address space with a single shared buffer.
    pub fn shared() -> Self {
        Self { segments: Segments::Shared(new_segment()), tsize: 0, dsize: 0, brk: 0, runmax: None }
    }
    /// Creates a zeroed address space with separate text and data buffers.
    pub fn split() -> Self {
        Self { segments: Segments::Split { text: new_segment(), data: new_segment() }, tsize: 0, dsize: 0, brk: 0, runmax: None }
    }

    pub fn is_split(&self) -> bool {
        matches!(self.segments, Segments::Split { .. })
    }

    /// The bytes instructions are fetched from.
    pub fn text(&self) -> &[u8] {
        match &self.segments {
            Segments::Shared(buf) => buf,
            Segments::Split { text, .. } => text,
        }
    }
    pub fn text_mut(&mut self) -> &mut [u8] {
        match &mut self.segments {
            Segments::Shared(buf) => buf,
            Segments::Split { text, .. } => text,
        }
    }
    /// The bytes loads and stores go to.
    pub fn data(&self) -> &[u8] {
        match &self.segments {
            Segments::Shared(buf) => buf,
            Segments::Split { data, .. } => data,
        }
    }
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.segments {
            Segments::Shared(buf) => buf,
            Segments::Split { data, .. } => data,
        }
    }

    pub fn get_u8(&self, pos: u16) -> u8 {
        self.data()[pos as usize]
    }
    pub fn set_u8(&mut self, pos: u16, val: u8) {
        self.data_mut()[pos as usize] = val;
    }

    impl_mem_primitive! {
        [ get_u16, set_u16 => u16 ],
        [ get_u32, set_u32 => u32 ],
    }

    /// Copies `len` bytes out of data memory starting at `pos`, wrapping at the top of the space.
    pub fn get(&self, pos: u16, len: usize) -> Vec<u8> {
        let data = self.data();
        (0..len).map(|i| data[(pos as usize + i) % SEGMENT_SIZE]).collect()
    }
    /// Copies `value` into data memory starting at `pos`, wrapping at the top of the space.
    pub fn set(&mut self, pos: u16, value: &[u8]) {
        let data = self.data_mut();
        for (i, &b) in value.iter().enumerate() {
            data[(pos as usize + i) % SEGMENT_SIZE] = b;
        }
    }

    /// Reads a null-terminated string starting at `pos`.
    /// The terminator is not included; a string running off the top of memory is cut there.
    pub fn get_null_terminated(&self, pos: u16) -> &[u8] {
        let tail = &self.data()[pos as usize..];
        match memchr(0, tail) {
            Some(stop) => &tail[..stop],
            None => tail,
        }
    }
    /// Writes a string followed by a null terminator.
    pub fn set_null_terminated(&mut self, pos: u16, value: &[u8]) {
        self.set(pos, value);
        self.set_u8(pos.wrapping_add(value.len() as u16), 0);
    }

    /// Reads a null-terminated array of string pointers starting at `pos`.
    pub fn get_string_vector(&self, mut pos: u16) -> Vec<String> {
        let mut res = vec![];
        loop {
            let p = self.get_u16(pos);
            if p == 0 || res.len() >= SEGMENT_SIZE / 2 { break }
            res.push(String::from_utf8_lossy(self.get_null_terminated(p)).into_owned());
            pos = pos.wrapping_add(2);
        }
        res
    }
}

#[test]
fn test_wraparound() {
    let mut m = AddressSpace::shared();
    m.set_u16(0xffff, 0x1234);
    assert_eq!(m.get_u8(0xffff), 0x34);
    assert_eq!(m.get_u8(0x0000), 0x12);
    assert_eq!(m.get_u16(0xffff), 0x1234);

    m.set_u32(0xfffe, 0xdeadbeef);
    assert_eq!(m.get_u16(0xfffe), 0xbeef);
    assert_eq!(m.get_u16(0x0000), 0xdead);

    m.set(0xfffe, b"abcd");
    assert_eq!(m.get(0xfffe, 4), b"abcd".to_vec());
    assert_eq!(m.get_null_terminated(0xfffe), b"ab");
}

#[test]
fn test_split_segments() {
    let mut m = AddressSpace::split();
    m.text_mut()[0x10] = 0x90;
    m.set_u8(0x10, 0xc3);
    assert_eq!(m.text()[0x10], 0x90);
    assert_eq!(m.get_u8(0x10), 0xc3);
    assert!(m.is_split());
    assert!(!AddressSpace::shared().is_split());
}
