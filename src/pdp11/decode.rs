//! Decoding of PDP-11 machine instructions.

use std::fmt;

pub const REGS: [&str; 8] = ["r0", "r1", "r2", "r3", "r4", "r5", "sp", "pc"];
const BRANCHES: [&str; 16] = ["br", "bne", "beq", "bge", "blt", "bgt", "ble", "(undefined)",
                              "bpl", "bmi", "bhi", "blos", "bvc", "bvs", "bcc", "bcs"];

/// An instruction operand.
/// The program-counter forms of modes 2, 3, 6 and 7 are resolved during decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    /// One of the eight addressing modes on a register.
    /// `index` holds the extension word of the index modes (6 and 7).
    Mode { mode: u8, reg: u8, index: u16 },
    /// `$n`: pc mode 2.
    Imm(u16),
    /// `*$n`: pc mode 3.
    Abs(u16),
    /// `x`: pc mode 6, holding the resolved target address.
    Rel(u16),
    /// `*x`: pc mode 7, holding the resolved address of the pointer.
    RelDeferred(u16),
    /// A branch target.
    Addr(u16),
}
impl Operand {
    pub fn reg(r: u8) -> Self {
        Operand::Mode { mode: 0, reg: r, index: 0 }
    }
}
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Operand::Imm(v) => write!(f, "${:04x}", v),
            Operand::Abs(a) => write!(f, "*${:04x}", a),
            Operand::Rel(a) | Operand::Addr(a) => write!(f, "{:04x}", a),
            Operand::RelDeferred(a) => write!(f, "*{:04x}", a),
            Operand::Mode { mode, reg, index } => {
                let rn = REGS[reg as usize & 7];
                match mode {
                    0 => f.write_str(rn),
                    1 => write!(f, "({})", rn),
                    2 => write!(f, "({})+", rn),
                    3 => write!(f, "*({})+", rn),
                    4 => write!(f, "-({})", rn),
                    5 => write!(f, "*-({})", rn),
                    6 => write!(f, "{:04x}({})", index, rn),
                    _ => write!(f, "*{:04x}({})", index, rn),
                }
            }
        }
    }
}

/// Instruction mnemonics. Byte forms are the same op with `Instruction::byte` set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Mov, Cmp, Bit, Bic, Bis, Add, Sub,
    Mul, Div, Ash, Ashc, Xor, Sob,
    Clr, Com, Inc, Dec, Neg, Adc, Sbc, Tst, Ror, Rol, Asr, Asl, Swab, Sxt,
    Mark,
    /// Conditional branch by condition index (br bne beq bge blt bgt ble - bpl bmi bhi blos bvc bvs bcc bcs).
    Branch(u8),
    Jmp, Jsr, Rts,
    /// Clear condition codes by mask (nzvc = 8 4 2 1).
    Clear(u8),
    /// Set condition codes by mask.
    Set(u8),
    Halt, Wait, Rti, Bpt, Iot, Reset, Rtt,
    Mfpi, Mtpi, Mfps, Mtps, Mfpd, Mtpd,
    Emt(u8),
    /// `sys n`, the trap instruction.
    Sys(u8),
    /// Floating point unit instruction, executed as a no-op.
    Fpu,
    Undefined,
}
impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Mov => "mov", Op::Cmp => "cmp", Op::Bit => "bit", Op::Bic => "bic", Op::Bis => "bis",
            Op::Add => "add", Op::Sub => "sub",
            Op::Mul => "mul", Op::Div => "div", Op::Ash => "ash", Op::Ashc => "ashc", Op::Xor => "xor", Op::Sob => "sob",
            Op::Clr => "clr", Op::Com => "com", Op::Inc => "inc", Op::Dec => "dec", Op::Neg => "neg",
            Op::Adc => "adc", Op::Sbc => "sbc", Op::Tst => "tst", Op::Ror => "ror", Op::Rol => "rol",
            Op::Asr => "asr", Op::Asl => "asl", Op::Swab => "swab", Op::Sxt => "sxt",
            Op::Mark => "mark",
            Op::Branch(c) => BRANCHES[c as usize & 15],
            Op::Jmp => "jmp", Op::Jsr => "jsr", Op::Rts => "rts",
            Op::Clear(0) | Op::Set(0) => "nop",
            Op::Clear(0o17) => "ccc", Op::Set(0o17) => "scc",
            Op::Clear(1) => "clc", Op::Clear(2) => "clv", Op::Clear(4) => "clz", Op::Clear(8) => "cln",
            Op::Set(1) => "sec", Op::Set(2) => "sev", Op::Set(4) => "sez", Op::Set(8) => "sen",
            Op::Clear(_) => "cl", Op::Set(_) => "se",
            Op::Halt => "halt", Op::Wait => "wait", Op::Rti => "rti", Op::Bpt => "bpt", Op::Iot => "iot",
            Op::Reset => "reset", Op::Rtt => "rtt",
            Op::Mfpi => "mfpi", Op::Mtpi => "mtpi", Op::Mfps => "mfps", Op::Mtps => "mtps", Op::Mfpd => "mfpd", Op::Mtpd => "mtpd",
            Op::Emt(_) => "emt", Op::Sys(_) => "sys",
            Op::Fpu => "(fpu)",
            Op::Undefined => "(undefined)",
        }
    }
}

/// One decoded PDP-11 instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    /// Byte form (movb, clrb, ...).
    pub byte: bool,
    /// Encoded length in bytes, including extension words.
    pub len: u16,
    pub opr1: Option<Operand>,
    pub opr2: Option<Operand>,
}
impl Instruction {
    fn new(len: u16, op: Op) -> Self {
        Self { op, byte: false, len, opr1: None, opr2: None }
    }
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.op {
            Op::Sys(n) => return write!(f, "sys {}", n),
            Op::Emt(n) => return write!(f, "emt {:o}", n),
            Op::Mark => if let Some(Operand::Imm(n)) = self.opr1 { return write!(f, "mark {}", n) },
            Op::Clear(m) | Op::Set(m) if m.count_ones() > 1 && m != 0o17 => {
                f.write_str(self.op.name())?;
                for (bit, c) in [(8, 'n'), (4, 'z'), (2, 'v'), (1, 'c')] {
                    if m & bit != 0 { write!(f, "{}", c)?; }
                }
                return Ok(());
            }
            _ => (),
        }
        f.write_str(self.op.name())?;
        if self.byte { f.write_str("b")?; }
        if let Some(a) = self.opr1 {
            write!(f, " {}", a)?;
            if let Some(b) = self.opr2 {
                write!(f, ", {}", b)?;
            }
        }
        Ok(())
    }
}

/* single-operand group 0050-0063, same order for the byte forms 1050-1063 */
const SINGLE: [Op; 12] = [
    Op::Clr, Op::Com, Op::Inc, Op::Dec, Op::Neg, Op::Adc, Op::Sbc, Op::Tst,
    Op::Ror, Op::Rol, Op::Asr, Op::Asl,
];

/// Bounded view of the code words around one instruction.
struct Reader<'a> {
    code: &'a [u8],
    addr: u16,
}
impl Reader<'_> {
    fn u16(&self, off: u16) -> u16 {
        let at = self.addr as usize + off as usize;
        let b = |i: usize| self.code.get(i & 0xffff).copied().unwrap_or(0);
        u16::from_le_bytes([b(at), b(at + 1)])
    }
    /// Decodes a 6-bit mode/register `field`, consuming an extension word at `*off` if it needs one.
    fn operand(&self, field: u16, off: &mut u16) -> Operand {
        let (mode, reg) = (((field >> 3) & 7) as u8, (field & 7) as u8);
        if !matches!((mode, reg), (2, 7) | (3, 7) | (6, _) | (7, _)) {
            return Operand::Mode { mode, reg, index: 0 };
        }
        let x = self.u16(*off);
        *off += 2;
        match (mode, reg) {
            (2, 7) => Operand::Imm(x),
            (3, 7) => Operand::Abs(x),
            (6, 7) => Operand::Rel(self.addr.wrapping_add(*off).wrapping_add(x)),
            (7, 7) => Operand::RelDeferred(self.addr.wrapping_add(*off).wrapping_add(x)),
            _ => Operand::Mode { mode, reg, index: x },
        }
    }
    fn branch(&self, w: u16) -> Operand {
        Operand::Addr(self.addr.wrapping_add(2).wrapping_add(((w as u8 as i8 as i16) * 2) as u16))
    }
}

fn single(r: &Reader, op: Op, byte: bool, w: u16) -> Instruction {
    let mut len = 2;
    let opr = r.operand(w & 0o77, &mut len);
    Instruction { op, byte, len, opr1: Some(opr), opr2: None }
}
fn double(r: &Reader, op: Op, byte: bool, w: u16) -> Instruction {
    let mut len = 2;
    let src = r.operand((w >> 6) & 0o77, &mut len);
    let dst = r.operand(w & 0o77, &mut len);
    Instruction { op, byte, len, opr1: Some(src), opr2: Some(dst) }
}
/// Register-source form of the EIS group: `op src, r` for mul/div/ash/ashc, `xor r, dst` for xor.
fn register(r: &Reader, op: Op, w: u16) -> Instruction {
    let mut len = 2;
    let opr = r.operand(w & 0o77, &mut len);
    let reg = Operand::reg(((w >> 6) & 7) as u8);
    if op == Op::Xor {
        Instruction { op, byte: false, len, opr1: Some(reg), opr2: Some(opr) }
    } else {
        Instruction { op, byte: false, len, opr1: Some(opr), opr2: Some(reg) }
    }
}

/// Decodes the instruction at `addr`.
///
/// This never fails: words that are not an instruction decode to `Op::Undefined` with length 2.
/// Bytes past the end of `code` read as zero.
pub fn decode(code: &[u8], addr: u16) -> Instruction {
    let r = Reader { code, addr };
    let w = r.u16(0);
    let byte = w & 0o100000 != 0;
    match w >> 12 {
        0o01..=0o06 | 0o11..=0o16 => {
            let op = match (w >> 12) & 7 {
                1 => Op::Mov,
                2 => Op::Cmp,
                3 => Op::Bit,
                4 => Op::Bic,
                5 => Op::Bis,
                _ if byte => return double(&r, Op::Sub, false, w),
                _ => Op::Add,
            };
            return double(&r, op, byte, w);
        }
        0o07 => {
            return match (w >> 9) & 7 {
                0 => register(&r, Op::Mul, w),
                1 => register(&r, Op::Div, w),
                2 => register(&r, Op::Ash, w),
                3 => register(&r, Op::Ashc, w),
                4 => register(&r, Op::Xor, w),
                7 => {
                    let reg = Operand::reg(((w >> 6) & 7) as u8);
                    let target = addr.wrapping_add(2).wrapping_sub((w & 0o77) * 2);
                    Instruction { op: Op::Sob, byte: false, len: 2, opr1: Some(reg), opr2: Some(Operand::Addr(target)) }
                }
                _ => Instruction::new(2, Op::Undefined),
            };
        }
        0o17 => {
            let mut len = 2;
            r.operand(w & 0o77, &mut len);
            return Instruction::new(len, Op::Fpu);
        }
        _ => (),
    }

    // branches: 000400-003777 and 100000-103777
    if w & 0o074000 == 0 && (byte || w & 0o3400 != 0) {
        let cond = if byte { 8 | ((w >> 8) & 7) as u8 } else { ((w >> 8) & 7) as u8 - 1 };
        return Instruction { op: Op::Branch(cond), byte: false, len: 2, opr1: Some(r.branch(w)), opr2: None };
    }

    match w {
        0o000000 => Instruction::new(2, Op::Halt),
        0o000001 => Instruction::new(2, Op::Wait),
        0o000002 => Instruction::new(2, Op::Rti),
        0o000003 => Instruction::new(2, Op::Bpt),
        0o000004 => Instruction::new(2, Op::Iot),
        0o000005 => Instruction::new(2, Op::Reset),
        0o000006 => Instruction::new(2, Op::Rtt),
        0o000100..=0o000177 if w & 0o70 != 0 => single(&r, Op::Jmp, false, w),
        0o000200..=0o000207 => Instruction { opr1: Some(Operand::reg((w & 7) as u8)), ..Instruction::new(2, Op::Rts) },
        0o000240..=0o000257 => Instruction::new(2, Op::Clear((w & 0o17) as u8)),
        0o000260..=0o000277 => Instruction::new(2, Op::Set((w & 0o17) as u8)),
        0o000300..=0o000377 => single(&r, Op::Swab, false, w),
        0o004000..=0o004777 if w & 0o70 != 0 => {
            let mut len = 2;
            let dst = r.operand(w & 0o77, &mut len);
            Instruction { op: Op::Jsr, byte: false, len, opr1: Some(Operand::reg(((w >> 6) & 7) as u8)), opr2: Some(dst) }
        }
        0o006400..=0o006477 => Instruction { opr1: Some(Operand::Imm(w & 0o77)), ..Instruction::new(2, Op::Mark) },
        0o006500..=0o006577 => single(&r, Op::Mfpi, false, w),
        0o006600..=0o006677 => single(&r, Op::Mtpi, false, w),
        0o006700..=0o006777 => single(&r, Op::Sxt, false, w),
        0o106400..=0o106477 => single(&r, Op::Mtps, false, w),
        0o106500..=0o106577 => single(&r, Op::Mfpd, false, w),
        0o106600..=0o106677 => single(&r, Op::Mtpd, false, w),
        0o106700..=0o106777 => single(&r, Op::Mfps, false, w),
        0o005000..=0o006377 | 0o105000..=0o106377 => {
            let op = SINGLE[((w >> 6) & 0o77) as usize - 0o50];
            single(&r, op, byte, w)
        }
        0o104000..=0o104377 => Instruction::new(2, Op::Emt(w as u8)),
        0o104400..=0o104777 => Instruction::new(2, Op::Sys(w as u8)),
        _ => Instruction::new(2, Op::Undefined),
    }
}
