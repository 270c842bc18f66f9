//! Execution of decoded PDP-11 instructions.

use std::fmt;

use crate::exec::*;
use crate::exec::memory::AddressSpace;
use crate::exec::registers::Psw;

use super::decode::*;

/// Where an operand lives once its addressing mode has been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Loc {
    Reg(u8),
    Mem(u16),
    Imm(u16),
}

/// The PDP-11 register file.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct Pdp11 {
    /// r0-r5, then sp and pc.
    pub r: [u16; 8],
    pub psw: Psw,
    /// The stack pointer at process start. An `rts pc` at this depth ends the process.
    pub start_sp: u16,
}
impl Pdp11 {
    pub const SP: usize = 6;
    pub const PC: usize = 7;

    fn size(byte: bool) -> u8 {
        if byte { 0 } else { 1 }
    }

    /// Applies the addressing mode of an operand, performing any register side effects.
    /// This must happen exactly once per operand.
    fn resolve(&mut self, memory: &AddressSpace, opr: Option<Operand>, byte: bool) -> Result<Loc, ExecError> {
        Ok(match opr.ok_or(ExecError::UndefinedInstruction)? {
            Operand::Imm(v) | Operand::Addr(v) => Loc::Imm(v),
            Operand::Abs(a) | Operand::Rel(a) => Loc::Mem(a),
            Operand::RelDeferred(a) => Loc::Mem(memory.get_u16(a)),
            Operand::Mode { mode, reg, index } => {
                let r = reg as usize & 7;
                // sp and pc always step by words
                let step = if byte && r < Self::SP { 1 } else { 2 };
                match mode {
                    0 => Loc::Reg(reg),
                    1 => Loc::Mem(self.r[r]),
                    2 => {
                        let a = self.r[r];
                        self.r[r] = a.wrapping_add(step);
                        Loc::Mem(a)
                    }
                    3 => {
                        let a = self.r[r];
                        self.r[r] = a.wrapping_add(2);
                        Loc::Mem(memory.get_u16(a))
                    }
                    4 => {
                        self.r[r] = self.r[r].wrapping_sub(step);
                        Loc::Mem(self.r[r])
                    }
                    5 => {
                        self.r[r] = self.r[r].wrapping_sub(2);
                        Loc::Mem(memory.get_u16(self.r[r]))
                    }
                    6 => Loc::Mem(self.r[r].wrapping_add(index)),
                    _ => Loc::Mem(memory.get_u16(self.r[r].wrapping_add(index))),
                }
            }
        })
    }
    fn get(&self, memory: &AddressSpace, loc: Loc, byte: bool) -> u16 {
        match loc {
            Loc::Reg(r) if byte => self.r[r as usize & 7] & 0xff,
            Loc::Reg(r) => self.r[r as usize & 7],
            Loc::Mem(a) if byte => memory.get_u8(a) as u16,
            Loc::Mem(a) => memory.get_u16(a),
            Loc::Imm(v) if byte => v & 0xff,
            Loc::Imm(v) => v,
        }
    }
    fn set(&mut self, memory: &mut AddressSpace, loc: Loc, byte: bool, val: u16) {
        match loc {
            Loc::Reg(r) if byte => {
                let r = &mut self.r[r as usize & 7];
                *r = (*r & 0xff00) | (val & 0xff);
            }
            Loc::Reg(r) => self.r[r as usize & 7] = val,
            Loc::Mem(a) if byte => memory.set_u8(a, val as u8),
            Loc::Mem(a) => memory.set_u16(a, val),
            Loc::Imm(_) => (),
        }
    }
    fn address(loc: Loc) -> Result<u16, ExecError> {
        match loc {
            Loc::Mem(a) => Ok(a),
            _ => Err(ExecError::UndefinedInstruction),
        }
    }
    fn register(opr: Option<Operand>) -> Result<usize, ExecError> {
        match opr {
            Some(Operand::Mode { mode: 0, reg, .. }) => Ok(reg as usize & 7),
            _ => Err(ExecError::UndefinedInstruction),
        }
    }

    fn pop(&mut self, memory: &AddressSpace) -> u16 {
        let sp = self.r[Self::SP];
        self.r[Self::SP] = sp.wrapping_add(2);
        memory.get_u16(sp)
    }

    /// Evaluates a branch condition by index (see `Op::Branch`).
    pub fn condition(&self, cc: u8) -> bool {
        let p = self.psw;
        match cc {
            0 => true,
            1 => !p.get_z(),
            2 => p.get_z(),
            3 => p.condition_ge(),
            4 => !p.condition_ge(),
            5 => p.condition_gt(),
            6 => !p.condition_gt(),
            8 => !p.get_n(),
            9 => p.get_n(),
            10 => p.condition_hi(),
            11 => !p.condition_hi(),
            12 => !p.get_v(),
            13 => p.get_v(),
            14 => !p.get_c(),
            15 => p.get_c(),
            _ => false,
        }
    }

    // -------------------------------------------------------------------------------------

    /// Sets N and Z from the value, clears V. C is untouched.
    fn update_flags_nz(&mut self, value: u16, byte: bool) {
        let size = Self::size(byte);
        self.psw.0 &= !mask!(Psw: MASK_N | MASK_Z | MASK_V);
        if truncate(value as u32, size) == 0 { self.psw.set_z(); }
        if sign_bit(value as u32, size) { self.psw.set_n(); }
    }

    /// Performs a double-operand arithmetic or logical operation and updates the condition codes.
    /// Returns the result to store, or `None` for `cmp` and `bit`.
    pub(crate) fn double(&mut self, op: Op, byte: bool, src: u16, dst: u16) -> Option<u16> {
        let size = Self::size(byte);
        let (s, d) = (truncate(src as u32, size), truncate(dst as u32, size));
        let sign = |v: u32| sign_bit(v, size);
        match op {
            Op::Mov => {
                self.update_flags_nz(src, byte);
                Some(src)
            }
            Op::Cmp => {
                let res = truncate(s.wrapping_sub(d), size);
                self.update_flags_nz(res as u16, byte);
                self.psw.assign_v(sign(s) != sign(d) && sign(res) == sign(d));
                self.psw.assign_c(s < d);
                None
            }
            Op::Bit => {
                self.update_flags_nz((s & d) as u16, byte);
                None
            }
            Op::Bic => {
                let res = (d & !s) as u16;
                self.update_flags_nz(res, byte);
                Some(res)
            }
            Op::Bis => {
                let res = (d | s) as u16;
                self.update_flags_nz(res, byte);
                Some(res)
            }
            Op::Add => {
                let full = s + d;
                let res = truncate(full, size);
                self.update_flags_nz(res as u16, byte);
                self.psw.assign_v(sign(s) == sign(d) && sign(res) != sign(s));
                self.psw.assign_c(full != res);
                Some(res as u16)
            }
            Op::Sub => {
                let res = truncate(d.wrapping_sub(s), size);
                self.update_flags_nz(res as u16, byte);
                self.psw.assign_v(sign(s) != sign(d) && sign(res) == sign(s));
                self.psw.assign_c(d < s);
                Some(res as u16)
            }
            _ => None,
        }
    }

    /// Performs a single-operand operation and updates the condition codes.
    /// Returns the result to store, or `None` for `tst`.
    pub(crate) fn single(&mut self, op: Op, byte: bool, dst: u16) -> Option<u16> {
        let size = Self::size(byte);
        let d = truncate(dst as u32, size);
        let top = if byte { 0x80 } else { 0x8000 };
        let max = top - 1;
        let c = self.psw.get_c() as u32;
        let res = match op {
            Op::Clr => 0,
            Op::Com => !d,
            Op::Inc => d.wrapping_add(1),
            Op::Dec => d.wrapping_sub(1),
            Op::Neg => 0u32.wrapping_sub(d),
            Op::Adc => d + c,
            Op::Sbc => d.wrapping_sub(c),
            Op::Tst => d,
            Op::Ror => (d >> 1) | (c * top),
            Op::Rol => (d << 1) | c,
            Op::Asr => (d >> 1) | (d & top),
            Op::Asl => d << 1,
            _ => return None,
        };
        let res = truncate(res, size);
        let carry = self.psw.get_c();
        self.update_flags_nz(res as u16, byte);
        match op {
            Op::Clr | Op::Tst => self.psw.clear_c(),
            Op::Com => self.psw.set_c(),
            Op::Inc => {
                self.psw.assign_v(d == max);
                self.psw.assign_c(carry);
            }
            Op::Dec => {
                self.psw.assign_v(d == top);
                self.psw.assign_c(carry);
            }
            Op::Neg => {
                self.psw.assign_v(res == top);
                self.psw.assign_c(res != 0);
            }
            Op::Adc => {
                self.psw.assign_v(d == max && carry);
                self.psw.assign_c(d == truncate(!0, size) && carry);
            }
            Op::Sbc => {
                self.psw.assign_v(d == top && carry);
                self.psw.assign_c(d == 0 && carry);
            }
            Op::Ror | Op::Rol | Op::Asr | Op::Asl => {
                let out = match op {
                    Op::Ror | Op::Asr => d & 1 != 0,
                    _ => d & top != 0,
                };
                self.psw.assign_c(out);
                self.psw.assign_v(self.psw.get_n() != out);
            }
            _ => (),
        }
        if op == Op::Tst { None } else { Some(res as u16) }
    }

    fn exec_mul(&mut self, reg: usize, src: u16) {
        let product = self.r[reg] as i16 as i32 * src as i16 as i32;
        if reg & 1 == 0 {
            self.r[reg] = (product >> 16) as u16;
            self.r[reg | 1] = product as u16;
        } else {
            self.r[reg] = product as u16;
        }
        self.psw.0 &= !mask!(Psw: MASK_N | MASK_Z | MASK_V | MASK_C);
        if product < 0 { self.psw.set_n(); }
        if product == 0 { self.psw.set_z(); }
        if product != product as i16 as i32 { self.psw.set_c(); }
    }
    fn exec_div(&mut self, reg: usize, src: u16) -> Result<(), ExecError> {
        let dividend = ((self.r[reg] as u32) << 16 | self.r[reg | 1] as u32) as i32;
        let (quo, rem, overflow) = raw_idiv(1, dividend as u32, src as u32).ok_or(ExecError::DivideByZero)?;
        if overflow {
            self.psw.set_v();
            return Err(ExecError::DivisionOverflow);
        }
        self.r[reg] = quo as u16;
        self.r[reg | 1] = rem as u16;
        self.update_flags_nz(quo as u16, false);
        self.psw.clear_c();
        Ok(())
    }
    /// Arithmetic shift of a 16 or 32-bit value by the signed six-bit count in `src`.
    fn exec_ash(&mut self, reg: usize, src: u16, double: bool) {
        let count = ((src as u8) << 2) as i8 >> 2;
        let bits = if double { 32 } else { 16 };
        let top: u32 = 1 << (bits - 1);
        let mut v = if double { (self.r[reg] as u32) << 16 | self.r[reg | 1] as u32 } else { self.r[reg] as u32 };
        let (mut carry, mut changed) = (false, false);
        if count > 0 {
            for _ in 0..count {
                carry = v & top != 0;
                v = if bits == 32 { v << 1 } else { (v << 1) & 0xffff };
                changed |= (v & top != 0) != carry;
            }
        } else {
            for _ in 0..-count {
                carry = v & 1 != 0;
                v = (v >> 1) | (v & top);
            }
        }
        if double {
            self.r[reg] = (v >> 16) as u16;
            self.r[reg | 1] = v as u16;
        } else {
            self.r[reg] = v as u16;
        }
        self.psw.0 &= !mask!(Psw: MASK_N | MASK_Z | MASK_V | MASK_C);
        if v == 0 { self.psw.set_z(); }
        if v & top != 0 { self.psw.set_n(); }
        self.psw.assign_v(changed);
        self.psw.assign_c(carry);
    }
}

impl Cpu for Pdp11 {
    type Instruction = Instruction;

    fn decode(code: &[u8], addr: u16) -> Instruction {
        decode(code, addr)
    }
    fn length(inst: &Instruction) -> u16 {
        inst.len
    }
    fn is_undefined(inst: &Instruction) -> bool {
        inst.op == Op::Undefined
    }

    fn execute(&mut self, inst: &Instruction, memory: &mut AddressSpace) -> Result<Event, ExecError> {
        let byte = inst.byte;
        match inst.op {
            Op::Mov => {
                let s = self.resolve(memory, inst.opr1, byte)?;
                let src = self.get(memory, s, byte);
                let d = self.resolve(memory, inst.opr2, byte)?;
                self.double(Op::Mov, byte, src, 0);
                match d {
                    // movb to a register sign extends
                    Loc::Reg(r) if byte => self.r[r as usize & 7] = src as u8 as i8 as u16,
                    _ => self.set(memory, d, byte, src),
                }
            }
            Op::Cmp | Op::Bit | Op::Bic | Op::Bis | Op::Add | Op::Sub => {
                let s = self.resolve(memory, inst.opr1, byte)?;
                let src = self.get(memory, s, byte);
                let d = self.resolve(memory, inst.opr2, byte)?;
                let dst = self.get(memory, d, byte);
                if let Some(res) = self.double(inst.op, byte, src, dst) {
                    self.set(memory, d, byte, res);
                }
            }
            Op::Clr | Op::Com | Op::Inc | Op::Dec | Op::Neg | Op::Adc | Op::Sbc | Op::Tst
            | Op::Ror | Op::Rol | Op::Asr | Op::Asl => {
                let d = self.resolve(memory, inst.opr1, byte)?;
                let dst = self.get(memory, d, byte);
                if let Some(res) = self.single(inst.op, byte, dst) {
                    self.set(memory, d, byte, res);
                }
            }
            Op::Swab => {
                let d = self.resolve(memory, inst.opr1, false)?;
                let res = self.get(memory, d, false).swap_bytes();
                self.set(memory, d, false, res);
                self.update_flags_nz(res, true);
                self.psw.clear_c();
            }
            Op::Sxt => {
                let d = self.resolve(memory, inst.opr1, false)?;
                let n = self.psw.get_n();
                self.set(memory, d, false, if n { 0xffff } else { 0 });
                self.psw.assign_z(!n);
                self.psw.clear_v();
            }
            Op::Mul | Op::Div | Op::Ash | Op::Ashc => {
                let s = self.resolve(memory, inst.opr1, false)?;
                let src = self.get(memory, s, false);
                let reg = Self::register(inst.opr2)?;
                match inst.op {
                    Op::Mul => self.exec_mul(reg, src),
                    Op::Div => self.exec_div(reg, src)?,
                    Op::Ash => self.exec_ash(reg, src, false),
                    _ => self.exec_ash(reg, src, true),
                }
            }
            Op::Xor => {
                let reg = Self::register(inst.opr1)?;
                let d = self.resolve(memory, inst.opr2, false)?;
                let res = self.get(memory, d, false) ^ self.r[reg];
                self.set(memory, d, false, res);
                self.update_flags_nz(res, false);
            }
            Op::Sob => {
                let reg = Self::register(inst.opr1)?;
                self.r[reg] = self.r[reg].wrapping_sub(1);
                if self.r[reg] != 0 {
                    if let Some(Operand::Addr(target)) = inst.opr2 {
                        self.r[Self::PC] = target;
                    }
                }
            }
            Op::Branch(cc) => {
                if self.condition(cc) {
                    if let Some(Operand::Addr(target)) = inst.opr1 {
                        self.r[Self::PC] = target;
                    }
                }
            }
            Op::Jmp => {
                let d = self.resolve(memory, inst.opr1, false)?;
                self.r[Self::PC] = Self::address(d)?;
            }
            Op::Jsr => {
                let reg = Self::register(inst.opr1)?;
                let d = self.resolve(memory, inst.opr2, false)?;
                let target = Self::address(d)?;
                let link = self.r[reg];
                self.push(memory, link);
                self.r[reg] = self.r[Self::PC];
                self.r[Self::PC] = target;
            }
            Op::Rts => {
                let reg = Self::register(inst.opr1)?;
                if reg == Self::PC && self.r[Self::SP] == self.start_sp {
                    return Ok(Event::Return);
                }
                self.r[Self::PC] = self.r[reg];
                self.r[reg] = self.pop(memory);
            }
            Op::Mark => {
                let nn = match inst.opr1 {
                    Some(Operand::Imm(n)) => n,
                    _ => 0,
                };
                self.r[Self::SP] = self.r[Self::PC].wrapping_add(2 * nn);
                self.r[Self::PC] = self.r[5];
                self.r[5] = self.pop(memory);
            }
            Op::Clear(m) => self.psw.0 &= !(m as u16 & 0o17),
            Op::Set(m) => self.psw.0 |= m as u16 & 0o17,
            Op::Sys(n) => return Ok(Event::Trap(n as u16)),
            Op::Fpu => (),
            Op::Halt | Op::Wait | Op::Rti | Op::Bpt | Op::Iot | Op::Reset | Op::Rtt
            | Op::Mfpi | Op::Mtpi | Op::Mfps | Op::Mtps | Op::Mfpd | Op::Mtpd | Op::Emt(_) => {
                return Err(ExecError::UnimplementedInstruction);
            }
            Op::Undefined => return Err(ExecError::UndefinedInstruction),
        }
        Ok(Event::Continue)
    }

    fn ip(&self) -> u16 {
        self.r[Self::PC]
    }
    fn set_ip(&mut self, val: u16) {
        self.r[Self::PC] = val;
    }
    fn sp(&self) -> u16 {
        self.r[Self::SP]
    }
    fn set_sp(&mut self, val: u16) {
        self.r[Self::SP] = val;
    }
    fn start_sp(&self) -> u16 {
        self.start_sp
    }
    fn set_start_sp(&mut self, val: u16) {
        self.start_sp = val;
    }

    fn result(&self) -> u16 {
        self.r[0]
    }
    fn set_result(&mut self, val: u16) {
        self.r[0] = val;
    }
    fn assign_carry(&mut self, val: bool) {
        self.psw.assign_c(val);
    }
}

impl fmt::Display for Pdp11 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(f, "r0={:04x} r1={:04x} r2={:04x} r3={:04x} r4={:04x} r5={:04x} sp={:04x} pc={:04x} {}{}{}{}",
            self.r[0], self.r[1], self.r[2], self.r[3], self.r[4], self.r[5], self.r[6], self.r[7],
            flag(self.psw.get_n(), 'N'), flag(self.psw.get_z(), 'Z'), flag(self.psw.get_v(), 'V'), flag(self.psw.get_c(), 'C'))
    }
}
