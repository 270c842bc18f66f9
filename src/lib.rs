#![deny(unsafe_code)]

//! legacy16 runs historical 16-bit Unix binaries on a modern host.
//! It emulates an Intel 8086 (with the 80186 additions) running Minix 2, and a PDP-11 running Unix V6,
//! including V6 binaries recompiled for the 8086.
//!
//! A process is a CPU, a flat 64K address space, and a table of host files.
//! System calls are translated to host calls, fork is either a host fork or a simulated sub-process,
//! and signals from the host are delivered by running the emulated handler in place.
//!
//! # Example of Usage
//!
//! ```
//! # use legacy16::*;
//! use std::rc::Rc;
//! use os::Os;
//!
//! // mov ax, 7 ; nop ; ret
//! let image = loader::load_raw(&[0xb8, 0x07, 0x00, 0x90, 0xc3]).unwrap();
//! let mut p = exec::Process::<os::Minix>::new(image, Rc::new(Default::default()));
//! os::Minix::set_args(&mut p, &["demo".to_string()], &[]);
//!
//! // returning from the entry frame ends the process normally
//! let (cycles, state) = p.execute_cycles(u64::MAX);
//! assert_eq!(state, exec::StopReason::Terminated(0));
//! assert_eq!(cycles, 3);
//! ```

#[macro_use] extern crate num_derive;

macro_rules! mask {
    ($src:ident : $($mask:ident)|+) => {
        $($src::$mask)|+
    };
    () => { 0 };
}

pub mod common;
pub mod exec;
pub mod i8086;
pub mod pdp11;
pub mod os;
pub mod loader;

#[cfg(test)]
mod test;
