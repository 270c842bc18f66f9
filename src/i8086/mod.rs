//! The Intel 8086 instruction set, with the 80186 additions that Minix compilers emit.

pub mod decode;
pub mod cpu;

pub use decode::{decode, decode_fused, Instruction, Op, Operand, Prefix};
pub use cpu::I8086;
