//! The PDP-11 instruction set with the EIS extensions, as used by Unix V6 user programs.

pub mod decode;
pub mod cpu;

pub use decode::{decode, Instruction, Op, Operand};
pub use cpu::Pdp11;
