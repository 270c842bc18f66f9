//! Decoding of 8086 (and the few 80186) machine instructions.

use std::fmt;

pub const REGS8: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];
pub const REGS16: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];
pub const SREGS: [&str; 4] = ["es", "cs", "ss", "ds"];
const BASES: [&str; 8] = ["bx+si", "bx+di", "bp+si", "bp+di", "si", "di", "bp", "bx"];
const CONDITIONS: [&str; 16] = ["jo", "jno", "jb", "jnb", "je", "jne", "jbe", "jnbe", "js", "jns", "jp", "jnp", "jl", "jnl", "jle", "jnle"];

/// Longest run of prefix bytes folded into one instruction.
const MAX_PREFIX_BYTES: u16 = 15;

/// An instruction operand as it was encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    /// 8-bit register by encoding index (al cl dl bl ah ch dh bh).
    Reg8(u8),
    /// 16-bit register by encoding index (ax cx dx bx sp bp si di).
    Reg16(u8),
    /// Segment register by encoding index (es cs ss ds).
    SReg(u8),
    Imm8(u8),
    Imm16(u16),
    /// A code address: the resolved target of a relative jump or call.
    Addr(u16),
    /// Memory at a direct 16-bit address.
    Ptr(u16),
    /// Memory at one of the eight base/index combinations plus a displacement.
    ModRM(u8, i16),
    /// A far pointer, offset then segment.
    Far(u16, u16),
}
impl Operand {
    /// Checks if the operand refers to memory.
    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Ptr(_) | Operand::ModRM(..))
    }
    fn is_immediate(&self) -> bool {
        matches!(self, Operand::Imm8(_) | Operand::Imm16(_))
    }
}
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Operand::Reg8(r) => f.write_str(REGS8[r as usize & 7]),
            Operand::Reg16(r) => f.write_str(REGS16[r as usize & 7]),
            Operand::SReg(r) => f.write_str(SREGS[r as usize & 3]),
            Operand::Imm8(v) => write!(f, "{:x}", v),
            Operand::Imm16(v) | Operand::Addr(v) => write!(f, "{:04x}", v),
            Operand::Ptr(a) => write!(f, "[{:04x}]", a),
            Operand::ModRM(rm, disp) => match disp {
                0 => write!(f, "[{}]", BASES[rm as usize & 7]),
                d if d > 0 => write!(f, "[{}+{:x}]", BASES[rm as usize & 7], d),
                d => write!(f, "[{}-{:x}]", BASES[rm as usize & 7], -(d as i32)),
            },
            Operand::Far(off, seg) => write!(f, "{:04x}:{:04x}", seg, off),
        }
    }
}

/// Prefix bytes that modify the following instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prefix {
    /// Segment override (es cs ss ds). Addressing is flat, so this has no effect.
    Seg(u8),
    Lock,
    Repne,
    Rep,
}
impl Prefix {
    pub fn is_repeat(self) -> bool {
        matches!(self, Prefix::Rep | Prefix::Repne)
    }
}
impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Prefix::Seg(s) => f.write_str(SREGS[s as usize & 3]),
            Prefix::Lock => f.write_str("lock"),
            Prefix::Repne => f.write_str("repne"),
            Prefix::Rep => f.write_str("rep"),
        }
    }
}

/// Instruction mnemonics.
/// The first eight are the ALU group in encoding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Add, Or, Adc, Sbb, And, Sub, Xor, Cmp,
    Daa, Das, Aaa, Aas,
    Inc, Dec, Push, Pop,
    /// Conditional jump by condition index (jo jno jb jnb je jne jbe jnbe js jns jp jnp jl jnl jle jnle).
    Jcc(u8),
    Test, Xchg, Mov, Lea,
    Nop, Cbw, Cwd, Callf, Wait, Pushf, Popf, Sahf, Lahf,
    Movs, Cmps, Stos, Lods, Scas,
    Ret, Retf, Les, Lds, Enter, Leave,
    Int3, Int, Into, Iret,
    Rol, Ror, Rcl, Rcr, Shl, Shr, Sar,
    Aam, Aad, Xlat, Esc,
    Loopnz, Loopz, Loop, Jcxz,
    In, Out,
    Call, Jmp, JmpShort, Jmpf,
    Hlt, Cmc, Not, Neg, Mul, Imul, Div, Idiv,
    Clc, Stc, Cli, Sti, Cld, Std,
    /// A lone prefix byte. The engine folds it into the next instruction.
    Prefix(Prefix),
    Undefined,
}
const ALU: [Op; 8] = [Op::Add, Op::Or, Op::Adc, Op::Sbb, Op::And, Op::Sub, Op::Xor, Op::Cmp];
const SHIFTS: [Op; 8] = [Op::Rol, Op::Ror, Op::Rcl, Op::Rcr, Op::Shl, Op::Shr, Op::Undefined, Op::Sar];

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Add => "add", Op::Or => "or", Op::Adc => "adc", Op::Sbb => "sbb",
            Op::And => "and", Op::Sub => "sub", Op::Xor => "xor", Op::Cmp => "cmp",
            Op::Daa => "daa", Op::Das => "das", Op::Aaa => "aaa", Op::Aas => "aas",
            Op::Inc => "inc", Op::Dec => "dec", Op::Push => "push", Op::Pop => "pop",
            Op::Jcc(c) => CONDITIONS[c as usize & 15],
            Op::Test => "test", Op::Xchg => "xchg", Op::Mov => "mov", Op::Lea => "lea",
            Op::Nop => "nop", Op::Cbw => "cbw", Op::Cwd => "cwd", Op::Callf => "callf", Op::Wait => "wait",
            Op::Pushf => "pushf", Op::Popf => "popf", Op::Sahf => "sahf", Op::Lahf => "lahf",
            Op::Movs => "movs", Op::Cmps => "cmps", Op::Stos => "stos", Op::Lods => "lods", Op::Scas => "scas",
            Op::Ret => "ret", Op::Retf => "retf", Op::Les => "les", Op::Lds => "lds",
            Op::Enter => "enter", Op::Leave => "leave",
            Op::Int3 => "int3", Op::Int => "int", Op::Into => "into", Op::Iret => "iret",
            Op::Rol => "rol", Op::Ror => "ror", Op::Rcl => "rcl", Op::Rcr => "rcr",
            Op::Shl => "shl", Op::Shr => "shr", Op::Sar => "sar",
            Op::Aam => "aam", Op::Aad => "aad", Op::Xlat => "xlat", Op::Esc => "esc",
            Op::Loopnz => "loopnz", Op::Loopz => "loopz", Op::Loop => "loop", Op::Jcxz => "jcxz",
            Op::In => "in", Op::Out => "out",
            Op::Call => "call", Op::Jmp => "jmp", Op::JmpShort => "jmp short", Op::Jmpf => "jmpf",
            Op::Hlt => "hlt", Op::Cmc => "cmc", Op::Not => "not", Op::Neg => "neg",
            Op::Mul => "mul", Op::Imul => "imul", Op::Div => "div", Op::Idiv => "idiv",
            Op::Clc => "clc", Op::Stc => "stc", Op::Cli => "cli", Op::Sti => "sti", Op::Cld => "cld", Op::Std => "std",
            Op::Prefix(_) | Op::Undefined => "(undefined)",
        }
    }
    /// Checks if this is one of the string instructions.
    pub fn is_string(self) -> bool {
        matches!(self, Op::Movs | Op::Cmps | Op::Stos | Op::Lods | Op::Scas)
    }
}

/// One decoded 8086 instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    /// Operates on words rather than bytes.
    pub w: bool,
    /// Encoded length in bytes, including any folded prefixes.
    pub len: u16,
    pub opr1: Option<Operand>,
    pub opr2: Option<Operand>,
    pub prefix: Option<Prefix>,
}
impl Instruction {
    fn new(len: u16, op: Op) -> Self {
        Self { op, w: false, len, opr1: None, opr2: None, prefix: None }
    }
    fn unary(len: u16, op: Op, w: bool, a: Operand) -> Self {
        Self { op, w, len, opr1: Some(a), opr2: None, prefix: None }
    }
    fn binary(len: u16, op: Op, w: bool, a: Operand, b: Operand) -> Self {
        Self { op, w, len, opr1: Some(a), opr2: Some(b), prefix: None }
    }
    fn undefined() -> Self {
        Self::new(1, Op::Undefined)
    }
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(p) = self.prefix {
            write!(f, "{} ", p)?;
        }
        match self.op {
            Op::Prefix(p) => return write!(f, "{}", p),
            Op::Undefined => return f.write_str("(undefined)"),
            op if op.is_string() => return write!(f, "{}{}", op.name(), if self.w { 'w' } else { 'b' }),
            op => f.write_str(op.name())?,
        }
        if let Some(a) = self.opr1 {
            let sized = a.is_memory() && !self.w && self.opr2.map_or(true, |b| b.is_immediate());
            write!(f, " {}{}", if sized { "byte " } else { "" }, a)?;
            if let Some(b) = self.opr2 {
                write!(f, ", {}", b)?;
            }
        }
        Ok(())
    }
}

/// Bounded view of the code bytes around one instruction.
struct Reader<'a> {
    code: &'a [u8],
    addr: u16,
}
impl Reader<'_> {
    fn u8(&self, off: u16) -> u8 {
        self.code.get((self.addr as usize + off as usize) & 0xffff).copied().unwrap_or(0)
    }
    fn u16(&self, off: u16) -> u16 {
        u16::from_le_bytes([self.u8(off), self.u8(off + 1)])
    }
    /// Target of a relative transfer with the given total length.
    fn rel8(&self, len: u16) -> Operand {
        Operand::Addr(self.addr.wrapping_add(len).wrapping_add(self.u8(len - 1) as i8 as u16))
    }
    fn rel16(&self, len: u16) -> Operand {
        Operand::Addr(self.addr.wrapping_add(len).wrapping_add(self.u16(len - 2)))
    }
    fn reg_field(&self) -> u8 {
        (self.u8(1) >> 3) & 7
    }
    /// Decodes the r/m operand of the ModRM byte at offset 1.
    /// Returns the operand and the length of the opcode, ModRM byte, and displacement.
    fn modrm(&self, w: bool) -> (Operand, u16) {
        let b = self.u8(1);
        let (md, rm) = (b >> 6, b & 7);
        match md {
            0 if rm == 6 => (Operand::Ptr(self.u16(2)), 4),
            0 => (Operand::ModRM(rm, 0), 2),
            1 => (Operand::ModRM(rm, self.u8(2) as i8 as i16), 3),
            2 => (Operand::ModRM(rm, self.u16(2) as i16), 4),
            _ => (reg(rm, w), 2),
        }
    }
    /// Decodes the reg and r/m operands, in (r/m, reg) order unless `to_reg` is set.
    fn regrm(&self, op: Op, to_reg: bool, w: bool) -> Instruction {
        let r = reg(self.reg_field(), w);
        let (m, len) = self.modrm(w);
        if to_reg { Instruction::binary(len, op, w, r, m) } else { Instruction::binary(len, op, w, m, r) }
    }
    /// Decodes the accumulator/immediate form used by the ALU and test opcodes.
    fn aimm(&self, op: Op, w: bool) -> Instruction {
        if w {
            Instruction::binary(3, op, w, Operand::Reg16(0), Operand::Imm16(self.u16(1)))
        } else {
            Instruction::binary(2, op, w, Operand::Reg8(0), Operand::Imm8(self.u8(1)))
        }
    }
    fn imm(&self, off: u16, w: bool) -> Operand {
        if w { Operand::Imm16(self.u16(off)) } else { Operand::Imm8(self.u8(off)) }
    }
}

fn reg(r: u8, w: bool) -> Operand {
    if w { Operand::Reg16(r) } else { Operand::Reg8(r) }
}

/// Decodes the instruction at `addr`.
///
/// This never fails: bytes that are not an instruction decode to `Op::Undefined` with length 1.
/// Bytes past the end of `code` read as zero.
pub fn decode(code: &[u8], addr: u16) -> Instruction {
    let r = Reader { code, addr };
    let b = r.u8(0);
    let w = b & 1 != 0;
    match b {
        // add/or/adc/sbb/and/sub/xor/cmp in their six forms each
        0x00..=0x3f if b & 7 < 6 => {
            let op = ALU[b as usize >> 3];
            if b & 4 != 0 { r.aimm(op, w) } else { r.regrm(op, b & 2 != 0, w) }
        }
        0x06 | 0x0e | 0x16 | 0x1e => Instruction::unary(1, Op::Push, true, Operand::SReg((b >> 3) & 3)),
        0x07 | 0x17 | 0x1f => Instruction::unary(1, Op::Pop, true, Operand::SReg((b >> 3) & 3)),
        0x26 | 0x2e | 0x36 | 0x3e => Instruction::new(1, Op::Prefix(Prefix::Seg((b >> 3) & 3))),
        0x27 => Instruction::new(1, Op::Daa),
        0x2f => Instruction::new(1, Op::Das),
        0x37 => Instruction::new(1, Op::Aaa),
        0x3f => Instruction::new(1, Op::Aas),
        0x40..=0x47 => Instruction::unary(1, Op::Inc, true, Operand::Reg16(b & 7)),
        0x48..=0x4f => Instruction::unary(1, Op::Dec, true, Operand::Reg16(b & 7)),
        0x50..=0x57 => Instruction::unary(1, Op::Push, true, Operand::Reg16(b & 7)),
        0x58..=0x5f => Instruction::unary(1, Op::Pop, true, Operand::Reg16(b & 7)),
        0x70..=0x7f => Instruction::unary(2, Op::Jcc(b & 15), false, r.rel8(2)),
        0x80..=0x83 => {
            let (m, len) = r.modrm(w);
            let op = ALU[r.reg_field() as usize];
            match b {
                0x81 => Instruction::binary(len + 2, op, w, m, Operand::Imm16(r.u16(len))),
                0x83 => Instruction::binary(len + 1, op, w, m, Operand::Imm16(r.u8(len) as i8 as u16)),
                _ => Instruction::binary(len + 1, op, w, m, Operand::Imm8(r.u8(len))),
            }
        }
        0x84 | 0x85 => r.regrm(Op::Test, false, w),
        0x86 | 0x87 => r.regrm(Op::Xchg, false, w),
        0x88..=0x8b => r.regrm(Op::Mov, b & 2 != 0, w),
        0x8c | 0x8e => {
            let (m, len) = r.modrm(true);
            let s = Operand::SReg(r.reg_field() & 3);
            if b == 0x8c { Instruction::binary(len, Op::Mov, true, m, s) } else { Instruction::binary(len, Op::Mov, true, s, m) }
        }
        0x8d => match r.modrm(true) {
            (m, len) if m.is_memory() => Instruction::binary(len, Op::Lea, true, Operand::Reg16(r.reg_field()), m),
            _ => Instruction::undefined(),
        },
        0x8f if r.reg_field() == 0 => {
            let (m, len) = r.modrm(true);
            Instruction::unary(len, Op::Pop, true, m)
        }
        0x90 => Instruction::new(1, Op::Nop),
        0x91..=0x97 => Instruction::binary(1, Op::Xchg, true, Operand::Reg16(b & 7), Operand::Reg16(0)),
        0x98 => Instruction::new(1, Op::Cbw),
        0x99 => Instruction::new(1, Op::Cwd),
        0x9a => Instruction::unary(5, Op::Callf, true, Operand::Far(r.u16(1), r.u16(3))),
        0x9b => Instruction::new(1, Op::Wait),
        0x9c => Instruction::new(1, Op::Pushf),
        0x9d => Instruction::new(1, Op::Popf),
        0x9e => Instruction::new(1, Op::Sahf),
        0x9f => Instruction::new(1, Op::Lahf),
        0xa0 | 0xa1 => Instruction::binary(3, Op::Mov, w, reg(0, w), Operand::Ptr(r.u16(1))),
        0xa2 | 0xa3 => Instruction::binary(3, Op::Mov, w, Operand::Ptr(r.u16(1)), reg(0, w)),
        0xa4 | 0xa5 => Instruction { w, ..Instruction::new(1, Op::Movs) },
        0xa6 | 0xa7 => Instruction { w, ..Instruction::new(1, Op::Cmps) },
        0xa8 | 0xa9 => r.aimm(Op::Test, w),
        0xaa | 0xab => Instruction { w, ..Instruction::new(1, Op::Stos) },
        0xac | 0xad => Instruction { w, ..Instruction::new(1, Op::Lods) },
        0xae | 0xaf => Instruction { w, ..Instruction::new(1, Op::Scas) },
        0xb0..=0xb7 => Instruction::binary(2, Op::Mov, false, Operand::Reg8(b & 7), Operand::Imm8(r.u8(1))),
        0xb8..=0xbf => Instruction::binary(3, Op::Mov, true, Operand::Reg16(b & 7), Operand::Imm16(r.u16(1))),
        0xc0 | 0xc1 | 0xd0..=0xd3 => match SHIFTS[r.reg_field() as usize] {
            Op::Undefined => Instruction::undefined(),
            op => {
                let (m, len) = r.modrm(w);
                match b {
                    0xc0 | 0xc1 => Instruction::binary(len + 1, op, w, m, Operand::Imm8(r.u8(len))),
                    0xd0 | 0xd1 => Instruction::binary(len, op, w, m, Operand::Imm8(1)),
                    _ => Instruction::binary(len, op, w, m, Operand::Reg8(1)),
                }
            }
        },
        0xc2 => Instruction::unary(3, Op::Ret, true, Operand::Imm16(r.u16(1))),
        0xc3 => Instruction::new(1, Op::Ret),
        0xc4 | 0xc5 => match r.modrm(true) {
            (m, len) if m.is_memory() => {
                let op = if b == 0xc4 { Op::Les } else { Op::Lds };
                Instruction::binary(len, op, true, Operand::Reg16(r.reg_field()), m)
            }
            _ => Instruction::undefined(),
        },
        0xc6 | 0xc7 if r.reg_field() == 0 => {
            let (m, len) = r.modrm(w);
            Instruction::binary(len + 1 + w as u16, Op::Mov, w, m, r.imm(len, w))
        }
        0xc8 => Instruction::binary(4, Op::Enter, true, Operand::Imm16(r.u16(1)), Operand::Imm8(r.u8(3))),
        0xc9 => Instruction::new(1, Op::Leave),
        0xca => Instruction::unary(3, Op::Retf, true, Operand::Imm16(r.u16(1))),
        0xcb => Instruction::new(1, Op::Retf),
        0xcc => Instruction::new(1, Op::Int3),
        0xcd => Instruction::unary(2, Op::Int, false, Operand::Imm8(r.u8(1))),
        0xce => Instruction::new(1, Op::Into),
        0xcf => Instruction::new(1, Op::Iret),
        0xd4 if r.u8(1) == 0x0a => Instruction::new(2, Op::Aam),
        0xd5 if r.u8(1) == 0x0a => Instruction::new(2, Op::Aad),
        0xd7 => Instruction::new(1, Op::Xlat),
        0xd8..=0xdf => Instruction::new(2, Op::Esc),
        0xe0 => Instruction::unary(2, Op::Loopnz, false, r.rel8(2)),
        0xe1 => Instruction::unary(2, Op::Loopz, false, r.rel8(2)),
        0xe2 => Instruction::unary(2, Op::Loop, false, r.rel8(2)),
        0xe3 => Instruction::unary(2, Op::Jcxz, false, r.rel8(2)),
        0xe4 | 0xe5 => Instruction::binary(2, Op::In, w, reg(0, w), Operand::Imm8(r.u8(1))),
        0xe6 | 0xe7 => Instruction::binary(2, Op::Out, w, Operand::Imm8(r.u8(1)), reg(0, w)),
        0xe8 => Instruction::unary(3, Op::Call, true, r.rel16(3)),
        0xe9 => Instruction::unary(3, Op::Jmp, true, r.rel16(3)),
        0xea => Instruction::unary(5, Op::Jmpf, true, Operand::Far(r.u16(1), r.u16(3))),
        0xeb => Instruction::unary(2, Op::JmpShort, false, r.rel8(2)),
        0xec | 0xed => Instruction::binary(1, Op::In, w, reg(0, w), Operand::Reg16(2)),
        0xee | 0xef => Instruction::binary(1, Op::Out, w, Operand::Reg16(2), reg(0, w)),
        0xf0 => Instruction::new(1, Op::Prefix(Prefix::Lock)),
        0xf2 => Instruction::new(1, Op::Prefix(Prefix::Repne)),
        0xf3 => Instruction::new(1, Op::Prefix(Prefix::Rep)),
        0xf4 => Instruction::new(1, Op::Hlt),
        0xf5 => Instruction::new(1, Op::Cmc),
        0xf6 | 0xf7 => {
            let (m, len) = r.modrm(w);
            match r.reg_field() {
                0 => Instruction::binary(len + 1 + w as u16, Op::Test, w, m, r.imm(len, w)),
                1 => Instruction::undefined(),
                f => {
                    let op = [Op::Not, Op::Neg, Op::Mul, Op::Imul, Op::Div, Op::Idiv][f as usize - 2];
                    Instruction::unary(len, op, w, m)
                }
            }
        }
        0xf8 => Instruction::new(1, Op::Clc),
        0xf9 => Instruction::new(1, Op::Stc),
        0xfa => Instruction::new(1, Op::Cli),
        0xfb => Instruction::new(1, Op::Sti),
        0xfc => Instruction::new(1, Op::Cld),
        0xfd => Instruction::new(1, Op::Std),
        0xfe | 0xff => {
            let (m, len) = r.modrm(w);
            match (w, r.reg_field()) {
                (_, 0) => Instruction::unary(len, Op::Inc, w, m),
                (_, 1) => Instruction::unary(len, Op::Dec, w, m),
                (true, 2) => Instruction::unary(len, Op::Call, true, m),
                (true, 3) => Instruction::unary(len, Op::Callf, true, m),
                (true, 4) => Instruction::unary(len, Op::Jmp, true, m),
                (true, 5) => Instruction::unary(len, Op::Jmpf, true, m),
                (true, 6) => Instruction::unary(len, Op::Push, true, m),
                _ => Instruction::undefined(),
            }
        }
        _ => Instruction::undefined(),
    }
}

/// Decodes the instruction at `addr` with any prefix bytes folded into the instruction they modify.
/// A repeat prefix takes precedence over segment overrides and lock, which have no effect.
pub fn decode_fused(code: &[u8], addr: u16) -> Instruction {
    let mut len = 0;
    let mut prefix: Option<Prefix> = None;
    loop {
        let mut inst = decode(code, addr.wrapping_add(len));
        match inst.op {
            Op::Prefix(p) if len < MAX_PREFIX_BYTES => {
                len += inst.len;
                if !prefix.map_or(false, Prefix::is_repeat) {
                    prefix = Some(p);
                }
            }
            _ => {
                inst.len += len;
                if prefix.is_some() {
                    inst.prefix = prefix;
                }
                return inst;
            }
        }
    }
}
