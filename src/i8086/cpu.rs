//! Execution of decoded 8086 instructions.

use std::fmt;

use crate::exec::*;
use crate::exec::cache::DecodeCache;
use crate::exec::memory::AddressSpace;
use crate::exec::registers::*;

use super::decode::*;

/// Bitmask denoting flags that `popf` and `sahf` can modify.
pub const MODIFIABLE_FLAGS: u16 = 0x0fd5;

macro_rules! register_aliases {
    ($src:ident => $([ $idx:ident : $t:ty => $get:ident : $getf:ident , $set:ident : $setf:ident ]),*$(,)?) => {$(
        pub fn $get(&self) -> $t {
            self.$src[Self::$idx].$getf()
        }
        pub fn $set(&mut self, val: $t) {
            self.$src[Self::$idx].$setf(val)
        }
    )*}
}

macro_rules! string_repeat {
    ($self:ident, $inst:ident, $memory:ident, $func:ident) => {{
        let rep = $inst.prefix.filter(|p| p.is_repeat());
        if rep.is_some() && $self.get_cx() == 0 { return; }
        loop {
            $self.$func($inst.w, $memory);
            if rep.is_none() { break }
            let cx = $self.get_cx().wrapping_sub(1);
            $self.set_cx(cx);
            if cx == 0 { break }
            if matches!($inst.op, Op::Cmps | Op::Scas) {
                match rep {
                    Some(Prefix::Repne) if $self.flags.get_zf() => break,
                    Some(Prefix::Rep) if !$self.flags.get_zf() => break,
                    _ => (),
                }
            }
        }
    }}
}

/// Where an operand lives once its effective address has been computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Loc {
    Reg8(u8),
    Reg16(u8),
    Mem(u16),
    Imm(u16),
}

/// The 8086 register file.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct I8086 {
    /// General registers in encoding order.
    pub regs: [Register16; 8],
    pub ip: u16,
    pub flags: Flags,
    /// The stack pointer at process start. A plain `ret` at this depth ends the process.
    pub start_sp: u16,
}
impl I8086 {
    pub const AX: usize = 0;
    pub const CX: usize = 1;
    pub const DX: usize = 2;
    pub const BX: usize = 3;
    pub const SP: usize = 4;
    pub const BP: usize = 5;
    pub const SI: usize = 6;
    pub const DI: usize = 7;

    register_aliases! { regs =>
        [ AX:u16 => get_ax:get_x16, set_ax:set_x16 ],
        [ CX:u16 => get_cx:get_x16, set_cx:set_x16 ],
        [ DX:u16 => get_dx:get_x16, set_dx:set_x16 ],
        [ BX:u16 => get_bx:get_x16, set_bx:set_x16 ],
        [ SP:u16 => get_sp:get_x16, set_sp:set_x16 ],
        [ BP:u16 => get_bp:get_x16, set_bp:set_x16 ],
        [ SI:u16 => get_si:get_x16, set_si:set_x16 ],
        [ DI:u16 => get_di:get_x16, set_di:set_x16 ],

        [ AX:u8 => get_al:get_x8, set_al:set_x8 ],
        [ CX:u8 => get_cl:get_x8, set_cl:set_x8 ],
        [ DX:u8 => get_dl:get_x8, set_dl:set_x8 ],
        [ BX:u8 => get_bl:get_x8, set_bl:set_x8 ],
        [ AX:u8 => get_ah:get_x8h, set_ah:set_x8h ],
        [ CX:u8 => get_ch:get_x8h, set_ch:set_x8h ],
        [ DX:u8 => get_dh:get_x8h, set_dh:set_x8h ],
        [ BX:u8 => get_bh:get_x8h, set_bh:set_x8h ],
    }

    /// Gets an 8-bit register by encoding index: the low bytes of ax..bx, then their high bytes.
    pub fn get_reg8(&self, r: u8) -> u8 {
        let r = r as usize & 7;
        if r < 4 { self.regs[r].get_x8() } else { self.regs[r - 4].get_x8h() }
    }
    pub fn set_reg8(&mut self, r: u8, val: u8) {
        let r = r as usize & 7;
        if r < 4 { self.regs[r].set_x8(val) } else { self.regs[r - 4].set_x8h(val) }
    }

    /// Computes the effective address of a base/index/displacement operand.
    pub fn effective_address(&self, rm: u8, disp: i16) -> u16 {
        let base = match rm & 7 {
            0 => self.get_bx().wrapping_add(self.get_si()),
            1 => self.get_bx().wrapping_add(self.get_di()),
            2 => self.get_bp().wrapping_add(self.get_si()),
            3 => self.get_bp().wrapping_add(self.get_di()),
            4 => self.get_si(),
            5 => self.get_di(),
            6 => self.get_bp(),
            _ => self.get_bx(),
        };
        base.wrapping_add(disp as u16)
    }

    fn locate(&self, opr: Option<Operand>) -> Result<Loc, ExecError> {
        Ok(match opr {
            Some(Operand::Reg8(r)) => Loc::Reg8(r),
            Some(Operand::Reg16(r)) => Loc::Reg16(r),
            Some(Operand::Imm8(v)) => Loc::Imm(v as u16),
            Some(Operand::Imm16(v)) | Some(Operand::Addr(v)) => Loc::Imm(v),
            Some(Operand::Ptr(a)) => Loc::Mem(a),
            Some(Operand::ModRM(rm, disp)) => Loc::Mem(self.effective_address(rm, disp)),
            Some(Operand::SReg(_)) | Some(Operand::Far(..)) => return Err(ExecError::UnimplementedInstruction),
            None => return Err(ExecError::UndefinedInstruction),
        })
    }
    fn get(&self, memory: &AddressSpace, loc: Loc, w: bool) -> u32 {
        match loc {
            Loc::Reg8(r) => self.get_reg8(r) as u32,
            Loc::Reg16(r) => self.regs[r as usize & 7].get_x16() as u32,
            Loc::Mem(a) if w => memory.get_u16(a) as u32,
            Loc::Mem(a) => memory.get_u8(a) as u32,
            Loc::Imm(v) => v as u32,
        }
    }
    fn set(&mut self, memory: &mut AddressSpace, loc: Loc, w: bool, val: u32) {
        match loc {
            Loc::Reg8(r) => self.set_reg8(r, val as u8),
            Loc::Reg16(r) => self.regs[r as usize & 7].set_x16(val as u16),
            Loc::Mem(a) if w => memory.set_u16(a, val as u16),
            Loc::Mem(a) => memory.set_u8(a, val as u8),
            Loc::Imm(_) => (),
        }
    }

    fn pop(&mut self, memory: &AddressSpace) -> u16 {
        let sp = self.get_sp();
        self.set_sp(sp.wrapping_add(2));
        memory.get_u16(sp)
    }

    /// Evaluates a conditional jump condition by index.
    pub fn condition(&self, cc: u8) -> bool {
        let f = self.flags;
        let res = match cc >> 1 {
            0 => f.get_of(),
            1 => f.condition_b(),
            2 => f.get_zf(),
            3 => f.condition_be(),
            4 => f.get_sf(),
            5 => f.get_pf(),
            6 => f.condition_l(),
            _ => f.condition_le(),
        };
        res != (cc & 1 != 0)
    }

    // -------------------------------------------------------------------------------------

    /// Updates ZF SF PF to reflect the given value.
    /// Bits outside the range of the given size are ignored.
    fn update_flags_zsp(&mut self, value: u32, sizecode: u8) {
        self.flags.0 &= !mask!(Flags: MASK_ZF | MASK_SF | MASK_PF);
        if truncate(value, sizecode) == 0 { self.flags.set_zf(); }
        if sign_bit(value, sizecode) { self.flags.set_sf(); }
        if is_parity_even(value as u8) { self.flags.set_pf(); }
    }
    /// Flags for the logical operations: CF and OF cleared, AF untouched.
    fn update_flags_logic(&mut self, value: u32, sizecode: u8) {
        self.update_flags_zsp(value, sizecode);
        self.flags.0 &= !mask!(Flags: MASK_CF | MASK_OF);
    }

    /// Performs one of the eight ALU operations and updates the flags.
    /// Returns the result to store, or `None` for `cmp`.
    pub(crate) fn alu(&mut self, op: Op, sizecode: u8, a: u32, b: u32) -> Option<u32> {
        match op {
            Op::Add | Op::Adc => {
                let c = (op == Op::Adc && self.flags.get_cf()) as u32;
                let full = a + b + c;
                let res = truncate(full, sizecode);

                self.update_flags_zsp(res, sizecode);
                self.flags.0 &= !mask!(Flags: MASK_CF | MASK_AF | MASK_OF);
                if full != res { self.flags.set_cf(); }
                if (a & 15) + (b & 15) + c > 15 { self.flags.set_af(); }
                if sign_bit(!(a ^ b) & (a ^ res), sizecode) { self.flags.set_of(); } // sign(a)=sign(b) and sign(a)!=sign(res)
                Some(res)
            }
            Op::Sub | Op::Sbb | Op::Cmp => {
                let c = (op == Op::Sbb && self.flags.get_cf()) as u32;
                let res = truncate(a.wrapping_sub(b).wrapping_sub(c), sizecode);

                self.update_flags_zsp(res, sizecode);
                self.flags.0 &= !mask!(Flags: MASK_CF | MASK_AF | MASK_OF);
                if a < b + c { self.flags.set_cf(); }
                if (a & 15) < (b & 15) + c { self.flags.set_af(); }
                if sign_bit((a ^ b) & (a ^ res), sizecode) { self.flags.set_of(); } // sign(a)!=sign(b) and sign(a)!=sign(res)
                if op == Op::Cmp { None } else { Some(res) }
            }
            Op::Or | Op::And | Op::Xor => {
                let res = match op {
                    Op::Or => a | b,
                    Op::And => a & b,
                    _ => a ^ b,
                };
                self.update_flags_logic(res, sizecode);
                Some(res)
            }
            _ => None,
        }
    }

    /// Performs a shift or rotate by `count` (masked to 5 bits like the 80186).
    /// A zero count changes nothing and returns `None`.
    pub(crate) fn shift(&mut self, op: Op, sizecode: u8, a: u32, count: u32) -> Option<u32> {
        let count = count & 0x1f;
        if count == 0 { return None; }
        let bits: u32 = 8 << sizecode;
        let m: u32 = 1 << (bits - 1);
        let msb = |v: u32| v & m != 0;

        let mut cf = self.flags.get_cf();
        let res = match op {
            Op::Rol | Op::Ror | Op::Rcl | Op::Rcr => {
                let mut v = a;
                let mut of = self.flags.get_of();
                for _ in 0..count {
                    match op {
                        Op::Rol => {
                            cf = msb(v);
                            v = truncate((v << 1) | cf as u32, sizecode);
                        }
                        Op::Ror => {
                            cf = v & 1 != 0;
                            v = (v >> 1) | if cf { m } else { 0 };
                        }
                        Op::Rcl => {
                            let out = msb(v);
                            v = truncate((v << 1) | cf as u32, sizecode);
                            cf = out;
                        }
                        _ => {
                            of = cf != msb(v);
                            let out = v & 1 != 0;
                            v = (v >> 1) | if cf { m } else { 0 };
                            cf = out;
                        }
                    }
                }
                match op {
                    Op::Rol | Op::Rcl => of = cf != msb(v),
                    Op::Ror => of = msb(v) != (v & (m >> 1) != 0),
                    _ => (),
                }
                self.flags.assign_cf(cf);
                self.flags.assign_of(of);
                return Some(v);
            }
            Op::Shl => {
                let full = (a as u64) << count;
                let res = truncate(full as u32, sizecode);
                cf = (full >> bits) & 1 != 0;
                self.flags.assign_of(cf != msb(res));
                res
            }
            Op::Shr => {
                let v = a >> (count - 1);
                cf = v & 1 != 0;
                self.flags.assign_of(msb(a));
                v >> 1
            }
            _ => {
                let v = (sign_extend(a, sizecode) as i32) >> (count - 1);
                cf = v & 1 != 0;
                self.flags.clear_of();
                truncate((v >> 1) as u32, sizecode)
            }
        };
        self.flags.assign_cf(cf);
        self.update_flags_zsp(res, sizecode);
        Some(res)
    }

    // -------------------------------------------------------------------------------------

    fn exec_inc_dec(&mut self, inst: &Instruction, memory: &mut AddressSpace) -> Result<(), ExecError> {
        let (w, sizecode) = (inst.w, inst.w as u8);
        let loc = self.locate(inst.opr1)?;
        let v = self.get(memory, loc, w);

        self.flags.0 &= !mask!(Flags: MASK_AF | MASK_OF);
        let res = if inst.op == Op::Inc {
            let res = truncate(v.wrapping_add(1), sizecode);
            if res & 0x0f == 0 { self.flags.set_af(); }
            if sign_bit(!v & res, sizecode) { self.flags.set_of(); }
            res
        } else {
            let res = truncate(v.wrapping_sub(1), sizecode);
            if res & 0x0f == 0x0f { self.flags.set_af(); }
            if sign_bit(v & !res, sizecode) { self.flags.set_of(); }
            res
        };
        self.update_flags_zsp(res, sizecode);

        self.set(memory, loc, w, res);
        Ok(())
    }
    fn exec_neg(&mut self, inst: &Instruction, memory: &mut AddressSpace) -> Result<(), ExecError> {
        let (w, sizecode) = (inst.w, inst.w as u8);
        let loc = self.locate(inst.opr1)?;
        let v = self.get(memory, loc, w);

        let res = truncate(v.wrapping_neg(), sizecode);

        self.flags.0 &= !mask!(Flags: MASK_CF | MASK_AF | MASK_OF);
        self.update_flags_zsp(res, sizecode);
        if v != 0 { self.flags.set_cf(); }
        if v & 0x0f != 0 { self.flags.set_af(); }
        if sign_bit(v & res, sizecode) { self.flags.set_of(); }

        self.set(memory, loc, w, res);
        Ok(())
    }

    /*
    f6/f7 /4../7
    byte: ax <- al * r/m8, al <- ax / r/m8 with ah <- remainder
    word: dx:ax <- ax * r/m16, ax <- dx:ax / r/m16 with dx <- remainder
    */
    fn exec_muldiv(&mut self, inst: &Instruction, memory: &mut AddressSpace) -> Result<(), ExecError> {
        let (w, sizecode) = (inst.w, inst.w as u8);
        let loc = self.locate(inst.opr1)?;
        let src = self.get(memory, loc, w);

        match inst.op {
            Op::Mul | Op::Imul => {
                let acc = if w { self.get_ax() as u32 } else { self.get_al() as u32 };
                let (high, full, overflow) = if inst.op == Op::Mul { raw_mul(sizecode, acc, src) } else { raw_imul(sizecode, acc, src) };
                if w { self.set_dx(high as u16); }
                self.set_ax(full as u16);
                self.flags.assign_cf(overflow);
                self.flags.assign_of(overflow);
            }
            _ => {
                if truncate(src, sizecode) == 0 { return Err(ExecError::DivideByZero); }
                let num = if w { (self.get_dx() as u32) << 16 | self.get_ax() as u32 } else { self.get_ax() as u32 };
                let res = if inst.op == Op::Div { raw_div(sizecode, num, src) } else { raw_idiv(sizecode, num, src) };
                let (quo, rem) = match res {
                    Some((quo, rem, false)) => (quo, rem),
                    _ => return Err(ExecError::DivisionOverflow),
                };
                if w {
                    self.set_ax(quo as u16);
                    self.set_dx(rem as u16);
                } else {
                    self.set_al(quo as u8);
                    self.set_ah(rem as u8);
                }
            }
        }
        Ok(())
    }

    fn exec_bcd(&mut self, op: Op) {
        let al = self.get_al();
        match op {
            Op::Daa | Op::Das => {
                let af = al & 15 > 9 || self.flags.get_af();
                let cf = al > 0x99 || self.flags.get_cf();
                let adjust = (if af { 6 } else { 0 }) + (if cf { 0x60 } else { 0 });
                let res = if op == Op::Daa { al.wrapping_add(adjust) } else { al.wrapping_sub(adjust) };
                self.flags.assign_af(af);
                self.flags.assign_cf(cf);
                self.set_al(res);
                self.update_flags_zsp(res as u32, 0);
            }
            Op::Aaa | Op::Aas => {
                let adjust = al & 15 > 9 || self.flags.get_af();
                if adjust {
                    if op == Op::Aaa {
                        self.set_al(al.wrapping_add(6));
                        self.set_ah(self.get_ah().wrapping_add(1));
                    } else {
                        self.set_al(al.wrapping_sub(6));
                        self.set_ah(self.get_ah().wrapping_sub(1));
                    }
                }
                self.flags.assign_af(adjust);
                self.flags.assign_cf(adjust);
                self.set_al(self.get_al() & 15);
            }
            Op::Aam => {
                self.set_ah(al / 10);
                self.set_al(al % 10);
                self.update_flags_zsp(self.get_al() as u32, 0);
            }
            _ => {
                let res = al.wrapping_add(self.get_ah().wrapping_mul(10));
                self.set_al(res);
                self.set_ah(0);
                self.update_flags_zsp(res as u32, 0);
            }
        }
    }

    /// Steps SI and/or DI by the element size in the direction given by DF.
    fn advance_index(&mut self, w: bool, si: bool, di: bool) {
        let step = if w { 2u16 } else { 1 };
        let step = if self.flags.get_df() { step.wrapping_neg() } else { step };
        if si { self.set_si(self.get_si().wrapping_add(step)); }
        if di { self.set_di(self.get_di().wrapping_add(step)); }
    }
    fn string_movs(&mut self, w: bool, memory: &mut AddressSpace) {
        let v = self.get(memory, Loc::Mem(self.get_si()), w);
        self.set(memory, Loc::Mem(self.get_di()), w, v);
        self.advance_index(w, true, true);
    }
    fn string_cmps(&mut self, w: bool, memory: &mut AddressSpace) {
        let a = self.get(memory, Loc::Mem(self.get_si()), w);
        let b = self.get(memory, Loc::Mem(self.get_di()), w);
        self.alu(Op::Cmp, w as u8, a, b);
        self.advance_index(w, true, true);
    }
    fn string_stos(&mut self, w: bool, memory: &mut AddressSpace) {
        let v = self.get(memory, Loc::Reg16(0), w);
        self.set(memory, Loc::Mem(self.get_di()), w, v);
        self.advance_index(w, false, true);
    }
    fn string_lods(&mut self, w: bool, memory: &mut AddressSpace) {
        let v = self.get(memory, Loc::Mem(self.get_si()), w);
        if w { self.set_ax(v as u16) } else { self.set_al(v as u8) }
        self.advance_index(w, true, false);
    }
    fn string_scas(&mut self, w: bool, memory: &mut AddressSpace) {
        let a = if w { self.get_ax() as u32 } else { self.get_al() as u32 };
        let b = self.get(memory, Loc::Mem(self.get_di()), w);
        self.alu(Op::Cmp, w as u8, a, b);
        self.advance_index(w, false, true);
    }
    fn exec_string(&mut self, inst: &Instruction, memory: &mut AddressSpace) {
        match inst.op {
            Op::Movs => string_repeat!(self, inst, memory, string_movs),
            Op::Cmps => string_repeat!(self, inst, memory, string_cmps),
            Op::Stos => string_repeat!(self, inst, memory, string_stos),
            Op::Lods => string_repeat!(self, inst, memory, string_lods),
            _ => string_repeat!(self, inst, memory, string_scas),
        }
    }

    /*
    enter size, level
    pushes bp, copies level-1 frame pointers from the enclosing frame, then reserves size bytes
    */
    fn exec_enter(&mut self, size: u16, level: u8, memory: &mut AddressSpace) {
        let level = level & 31;
        let bp = self.get_bp();
        self.push(memory, bp);
        let fp = self.get_sp();
        if level > 0 {
            for _ in 1..level {
                let bp = self.get_bp().wrapping_sub(2);
                self.set_bp(bp);
                let v = memory.get_u16(bp);
                self.push(memory, v);
            }
            self.push(memory, fp);
        }
        self.set_bp(fp);
        self.set_sp(self.get_sp().wrapping_sub(size));
    }
}

impl Cpu for I8086 {
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
    fn fetch(&self, memory: &AddressSpace, cache: &mut DecodeCache<Instruction>) -> Instruction {
        let ip = self.ip;
        cache.get_or_decode(ip, || decode_fused(memory.text(), ip))
    }

    fn execute(&mut self, inst: &Instruction, memory: &mut AddressSpace) -> Result<Event, ExecError> {
        let w = inst.w;
        match inst.op {
            Op::Add | Op::Or | Op::Adc | Op::Sbb | Op::And | Op::Sub | Op::Xor | Op::Cmp => {
                let (a, b) = (self.locate(inst.opr1)?, self.locate(inst.opr2)?);
                let (x, y) = (self.get(memory, a, w), self.get(memory, b, w));
                if let Some(res) = self.alu(inst.op, w as u8, x, y) {
                    self.set(memory, a, w, res);
                }
            }
            Op::Test => {
                let (a, b) = (self.locate(inst.opr1)?, self.locate(inst.opr2)?);
                let res = self.get(memory, a, w) & self.get(memory, b, w);
                self.update_flags_logic(res, w as u8);
            }
            Op::Daa | Op::Das | Op::Aaa | Op::Aas | Op::Aam | Op::Aad => self.exec_bcd(inst.op),
            Op::Inc | Op::Dec => self.exec_inc_dec(inst, memory)?,
            Op::Neg => self.exec_neg(inst, memory)?,
            Op::Not => {
                let a = self.locate(inst.opr1)?;
                let v = self.get(memory, a, w);
                self.set(memory, a, w, !v);
            }
            Op::Mul | Op::Imul | Op::Div | Op::Idiv => self.exec_muldiv(inst, memory)?,
            Op::Push => {
                let a = self.locate(inst.opr1)?;
                // push sp stores the value after the decrement
                let v = match a {
                    Loc::Reg16(4) => self.get_sp().wrapping_sub(2),
                    _ => self.get(memory, a, true) as u16,
                };
                self.push(memory, v);
            }
            Op::Pop => {
                let a = self.locate(inst.opr1)?;
                let v = self.pop(memory);
                self.set(memory, a, true, v as u32);
            }
            Op::Xchg => {
                let (a, b) = (self.locate(inst.opr1)?, self.locate(inst.opr2)?);
                let (x, y) = (self.get(memory, a, w), self.get(memory, b, w));
                self.set(memory, a, w, y);
                self.set(memory, b, w, x);
            }
            Op::Mov => {
                let (a, b) = (self.locate(inst.opr1)?, self.locate(inst.opr2)?);
                let v = self.get(memory, b, w);
                self.set(memory, a, w, v);
            }
            Op::Lea => match (self.locate(inst.opr1)?, self.locate(inst.opr2)?) {
                (a, Loc::Mem(addr)) => self.set(memory, a, true, addr as u32),
                _ => return Err(ExecError::UndefinedInstruction),
            },
            Op::Jcc(cc) => {
                if self.condition(cc) {
                    self.ip = self.get(memory, self.locate(inst.opr1)?, true) as u16;
                }
            }
            Op::Jmp | Op::JmpShort => self.ip = self.get(memory, self.locate(inst.opr1)?, true) as u16,
            Op::Call => {
                let target = self.get(memory, self.locate(inst.opr1)?, true) as u16;
                self.push(memory, self.ip);
                self.ip = target;
            }
            Op::Ret => {
                if inst.opr1.is_none() && self.get_sp() == self.start_sp {
                    return Ok(Event::Return);
                }
                self.ip = self.pop(memory);
                if let Some(Operand::Imm16(n)) = inst.opr1 {
                    self.set_sp(self.get_sp().wrapping_add(n));
                }
            }
            Op::Loop | Op::Loopz | Op::Loopnz => {
                let cx = self.get_cx().wrapping_sub(1);
                self.set_cx(cx);
                let cnd = match inst.op {
                    Op::Loopz => self.flags.get_zf(),
                    Op::Loopnz => !self.flags.get_zf(),
                    _ => true,
                };
                if cx != 0 && cnd {
                    self.ip = self.get(memory, self.locate(inst.opr1)?, true) as u16;
                }
            }
            Op::Jcxz => {
                if self.get_cx() == 0 {
                    self.ip = self.get(memory, self.locate(inst.opr1)?, true) as u16;
                }
            }
            Op::Rol | Op::Ror | Op::Rcl | Op::Rcr | Op::Shl | Op::Shr | Op::Sar => {
                let (a, b) = (self.locate(inst.opr1)?, self.locate(inst.opr2)?);
                let v = self.get(memory, a, w);
                let count = self.get(memory, b, false);
                if let Some(res) = self.shift(inst.op, w as u8, v, count) {
                    self.set(memory, a, w, res);
                }
            }
            Op::Movs | Op::Cmps | Op::Stos | Op::Lods | Op::Scas => self.exec_string(inst, memory),
            Op::Cbw => self.set_ax(self.get_al() as i8 as u16),
            Op::Cwd => self.set_dx(if (self.get_ax() as i16) < 0 { 0xffff } else { 0 }),
            Op::Pushf => self.push(memory, self.flags.0 | Flags::RESERVED),
            Op::Popf => {
                let v = self.pop(memory);
                self.flags.0 = v & MODIFIABLE_FLAGS;
            }
            Op::Sahf => self.flags.0 = (self.flags.0 & !0xd5) | (self.get_ah() as u16 & 0xd5),
            Op::Lahf => self.set_ah((self.flags.0 as u8 & 0xd5) | 0x02),
            Op::Xlat => self.set_al(memory.get_u8(self.get_bx().wrapping_add(self.get_al() as u16))),
            Op::Enter => match (inst.opr1, inst.opr2) {
                (Some(Operand::Imm16(size)), Some(Operand::Imm8(level))) => self.exec_enter(size, level, memory),
                _ => return Err(ExecError::UndefinedInstruction),
            },
            Op::Leave => {
                self.set_sp(self.get_bp());
                let bp = self.pop(memory);
                self.set_bp(bp);
            }
            Op::Int => match inst.opr1 {
                Some(Operand::Imm8(n)) => return Ok(Event::Trap(n as u16)),
                _ => return Err(ExecError::UndefinedInstruction),
            },
            Op::Clc => self.flags.clear_cf(),
            Op::Stc => self.flags.set_cf(),
            Op::Cmc => self.flags.flip_cf(),
            Op::Cli => self.flags.clear_if(),
            Op::Sti => self.flags.set_if(),
            Op::Cld => self.flags.clear_df(),
            Op::Std => self.flags.set_df(),
            Op::Nop | Op::Wait | Op::Esc | Op::Prefix(_) => (),
            Op::Callf | Op::Retf | Op::Jmpf | Op::Les | Op::Lds | Op::Int3 | Op::Into | Op::Iret
                | Op::In | Op::Out | Op::Hlt => return Err(ExecError::UnimplementedInstruction),
            Op::Undefined => return Err(ExecError::UndefinedInstruction),
        }
        Ok(Event::Continue)
    }

    fn ip(&self) -> u16 { self.ip }
    fn set_ip(&mut self, val: u16) { self.ip = val }
    fn sp(&self) -> u16 { self.get_sp() }
    fn set_sp(&mut self, val: u16) { I8086::set_sp(self, val) }
    fn start_sp(&self) -> u16 { self.start_sp }
    fn set_start_sp(&mut self, val: u16) { self.start_sp = val }

    fn result(&self) -> u16 { self.get_ax() }
    fn set_result(&mut self, val: u16) { self.set_ax(val) }
    fn assign_carry(&mut self, val: bool) { self.flags.assign_cf(val) }
}

impl fmt::Display for I8086 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(f, "ax={:04x} bx={:04x} cx={:04x} dx={:04x} sp={:04x} bp={:04x} si={:04x} di={:04x} {}{}{}{} ip={:04x}",
            self.get_ax(), self.get_bx(), self.get_cx(), self.get_dx(),
            self.get_sp(), self.get_bp(), self.get_si(), self.get_di(),
            flag(self.flags.get_of(), 'O'), flag(self.flags.get_sf(), 'S'), flag(self.flags.get_zf(), 'Z'), flag(self.flags.get_cf(), 'C'),
            self.ip)
    }
}
