//! Address-indexed cache of decoded instructions.

use super::memory::SEGMENT_SIZE;

/// Caches decoded instructions by the address they were decoded at.
///
/// A disabled cache decodes on every lookup. Only separate text segments are cached,
/// since nothing can write to them after loading.
#[derive(Clone)]
pub struct DecodeCache<I> {
    entries: Vec<Option<I>>,
    enabled: bool,
}
impl<I: Clone> DecodeCache<I> {
    pub fn new(enabled: bool) -> Self {
        let entries = if enabled { vec![None; SEGMENT_SIZE] } else { vec![] };
        Self { entries, enabled }
    }
    #[cfg(test)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    /// Returns the instruction cached at `addr`, decoding (and caching) it with `decode` on a miss.
    pub fn get_or_decode<F: FnOnce() -> I>(&mut self, addr: u16, decode: F) -> I {
        if !self.enabled {
            return decode();
        }
        let slot = &mut self.entries[addr as usize];
        match slot {
            Some(inst) => inst.clone(),
            None => {
                let inst = decode();
                *slot = Some(inst.clone());
                inst
            }
        }
    }
    #[cfg(test)]
    pub fn get(&self, addr: u16) -> Option<&I> {
        self.entries.get(addr as usize).and_then(|e| e.as_ref())
    }
}

#[test]
fn test_decode_cache() {
    let mut c = DecodeCache::new(true);
    let mut calls = 0;
    assert_eq!(c.get_or_decode(4, || { calls += 1; 7u32 }), 7);
    assert_eq!(c.get_or_decode(4, || { calls += 1; 9u32 }), 7);
    assert_eq!(calls, 1);
    assert_eq!(c.get(4), Some(&7));
    assert_eq!(c.get(5), None);

    let mut d = DecodeCache::new(false);
    assert_eq!(d.get_or_decode(4, || 1u32), 1);
    assert_eq!(d.get_or_decode(4, || 2u32), 2);
    assert!(!d.is_enabled());
}
