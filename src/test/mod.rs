use crate::exec::*;
use crate::exec::fs::*;
use crate::loader::{self, LoadedImage};
use crate::os::{ForkMode, Os};

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

/// Encodes PDP-11 words as little-endian bytes.
fn words(ws: &[u16]) -> Vec<u8> {
    ws.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn test_args() -> Rc<EmulatorArgs> {
    Rc::new(EmulatorArgs { fork_mode: Some(ForkMode::Simulate), ..Default::default() })
}

/// Starts `image` under `O` with a one-word argument vector.
fn start<O: Os>(image: LoadedImage) -> Process<O> {
    let mut p = Process::<O>::new(image, test_args());
    O::set_args(&mut p, &["test".to_string()], &[]);
    p
}
/// Starts a headerless program under `O`.
fn start_raw<O: Os>(code: &[u8]) -> Process<O> {
    start(loader::load_raw(code).unwrap())
}

type Content = Rc<RefCell<Cursor<Vec<u8>>>>;

/// Replaces the host streams with memory files and returns (stdin, stdout, stderr).
fn setup_standard_memory_streams<O: Os>(p: &mut Process<O>, input: &[u8]) -> (Content, Content, Content) {
    let stdin = MemoryFile::new(input.to_vec(), true, false);
    let stdout = MemoryFile::new(vec![], false, true);
    let stderr = MemoryFile::new(vec![], false, true);
    let res = (stdin.content.clone(), stdout.content.clone(), stderr.content.clone());
    p.files.install(0, shared(stdin));
    p.files.install(1, shared(stdout));
    p.files.install(2, shared(stderr));
    res
}

fn output(c: &Content) -> String {
    String::from_utf8_lossy(c.borrow().get_ref()).into_owned()
}

mod pdp11_tests;
mod minix_tests;
mod unixv6_tests;
mod loader_tests;
