use super::*;
use crate::os::UnixV6Pdp11;
use crate::pdp11::*;

use pretty_assertions::assert_eq;

fn run(ws: &[u16], cycles: u64) -> (Process<UnixV6Pdp11>, StopReason) {
    let mut p = start_raw::<UnixV6Pdp11>(&words(ws));
    let (_, stop) = p.execute_cycles(cycles);
    (p, stop)
}
fn listing(ws: &[u16], addr: u16) -> (String, u16) {
    let i = decode(&words(ws), addr);
    (i.to_string(), i.len)
}

#[test]
fn test_decode_operands() {
    assert_eq!(listing(&[0o010001], 0), ("mov r0, r1".into(), 2));
    assert_eq!(listing(&[0o012700, 5], 0), ("mov $0005, r0".into(), 4));
    assert_eq!(listing(&[0o112142], 0), ("movb (r1)+, -(r2)".into(), 2));
    assert_eq!(listing(&[0o016100, 0o10], 0), ("mov 0008(r1), r0".into(), 4));
    assert_eq!(listing(&[0o016700, 0o10], 0), ("mov 000c, r0".into(), 4));
    assert_eq!(listing(&[0o017700, 0o10], 0), ("mov *000c, r0".into(), 4));
    assert_eq!(listing(&[0o013700, 0o400], 0), ("mov *$0100, r0".into(), 4));
    assert_eq!(listing(&[0o026727, 0o2, 0o4], 0), ("cmp 0006, $0004".into(), 6));
    assert_eq!(listing(&[0o105000], 0), ("clrb r0".into(), 2));
    assert_eq!(listing(&[0o070027, 0o400], 0), ("mul $0100, r0".into(), 4));
    assert_eq!(listing(&[0o074201], 0), ("xor r2, r1".into(), 2));
}

#[test]
fn test_decode_branches() {
    let mut ws = vec![0; 0x21];
    ws[0x20] = 0o000777;
    let i = decode(&words(&ws), 0x40);
    assert_eq!(i.op, Op::Branch(0));
    assert_eq!(i.to_string(), "br 0040");

    let i = decode(&words(&[0o103403]), 0);
    assert_eq!(i.to_string(), "bcs 0008");
    assert_eq!(decode(&words(&[0o100001]), 0).to_string(), "bpl 0004");
    assert_eq!(decode(&words(&[0o001402]), 0).to_string(), "beq 0006");

    let mut ws = vec![0; 9];
    ws[8] = 0o077102;
    let i = decode(&words(&ws), 0x10);
    assert_eq!(i.op, Op::Sob);
    assert_eq!(i.opr2, Some(Operand::Addr(0x0e)));
}

#[test]
fn test_decode_wraps_at_segment_end() {
    let mut code = vec![0; 0x10000];
    code[0xfffe..].copy_from_slice(&0o012700u16.to_le_bytes());
    code[..2].copy_from_slice(&5u16.to_le_bytes());
    let i = decode(&code, 0xfffe);
    assert_eq!(i.len, 4);
    assert_eq!(i.to_string(), "mov $0005, r0");
}

#[test]
fn test_decode_misc() {
    assert_eq!(listing(&[0o104401], 0).0, "sys 1");
    assert_eq!(listing(&[0o104430], 0).0, "sys 24");
    assert_eq!(listing(&[0o104005], 0).0, "emt 5");
    assert_eq!(listing(&[0o006403], 0).0, "mark 3");
    assert_eq!(listing(&[0o000241], 0).0, "clc");
    assert_eq!(listing(&[0o000257], 0).0, "ccc");
    assert_eq!(listing(&[0o000243], 0).0, "clvc");
    assert_eq!(listing(&[0o000240], 0).0, "nop");
    assert_eq!(listing(&[0o000270], 0).0, "sen");

    // jmp and jsr need a memory operand
    assert_eq!(decode(&words(&[0o000100]), 0).op, Op::Undefined);
    assert_eq!(decode(&words(&[0o004500]), 0).op, Op::Undefined);
    assert_eq!(decode(&words(&[0o000007]), 0).op, Op::Undefined);

    // floating point instructions count their operand's extension word
    assert_eq!(listing(&[0o172467, 0o10], 0).1, 4);
    assert_eq!(listing(&[0o170011], 0).1, 2);
}

#[test]
fn test_autoincrement_steps() {
    let mut p = start_raw::<UnixV6Pdp11>(&words(&[
        0o012701, 0o400,    // mov $100h, r1
        0o112100,           // movb (r1)+, r0
        0o114103,           // movb -(r1), r3
        0o012706, 0o1000,   // mov $200h, sp
        0o105726,           // tstb (sp)+
    ]));
    p.memory.set_u8(0x100, 0x80);
    assert_eq!(p.execute_cycles(5).1, StopReason::MaxCycles);
    assert_eq!(p.cpu.r[0], 0xff80);
    assert_eq!(p.cpu.r[1], 0x100);
    assert_eq!(p.cpu.r[3], 0xff80);
    assert_eq!(p.cpu.r[Pdp11::SP], 0x202);
    assert!(p.cpu.psw.get_z());
}

#[test]
fn test_byte_register_write() {
    let (p, _) = run(&[
        0o012700, 0x1234,   // mov $1234h, r0
        0o105000,           // clrb r0
        0o105200,           // incb r0
    ], 3);
    assert_eq!(p.cpu.r[0], 0x1201);
    assert!(!p.cpu.psw.get_z());
}

#[test]
fn test_double_operand_flags() {
    let mut c = Pdp11::default();
    assert_eq!(c.double(Op::Cmp, false, 1, 2), None);
    assert!(c.psw.get_n() && c.psw.get_c() && !c.psw.get_v() && !c.psw.get_z());

    assert_eq!(c.double(Op::Cmp, false, 0x8000, 1), None);
    assert!(c.psw.get_v() && !c.psw.get_c() && !c.psw.get_n());

    assert_eq!(c.double(Op::Sub, false, 7, 5), Some(0xfffe));
    assert!(c.psw.get_c() && c.psw.get_n());

    assert_eq!(c.double(Op::Add, false, 0x7fff, 1), Some(0x8000));
    assert!(c.psw.get_v() && c.psw.get_n() && !c.psw.get_c());

    assert_eq!(c.double(Op::Add, true, 0xff, 1), Some(0));
    assert!(c.psw.get_z() && c.psw.get_c());

    assert_eq!(c.double(Op::Bic, false, 0x0f, 0xff), Some(0xf0));
    assert_eq!(c.double(Op::Bis, false, 0x0f, 0xf0), Some(0xff));
    assert_eq!(c.double(Op::Bit, false, 0x10, 0x01), None);
    assert!(c.psw.get_z());
}

#[test]
fn test_single_operand_flags() {
    let mut c = Pdp11::default();
    assert_eq!(c.single(Op::Neg, false, 1), Some(0xffff));
    assert!(c.psw.get_c() && c.psw.get_n());
    assert_eq!(c.single(Op::Neg, false, 0x8000), Some(0x8000));
    assert!(c.psw.get_v());

    c.psw.set_c();
    assert_eq!(c.single(Op::Inc, false, 0x7fff), Some(0x8000));
    assert!(c.psw.get_v() && c.psw.get_c());
    assert_eq!(c.single(Op::Dec, false, 0), Some(0xffff));
    assert!(!c.psw.get_v() && c.psw.get_c());

    assert_eq!(c.single(Op::Tst, false, 5), None);
    assert!(!c.psw.get_c() && !c.psw.get_z());

    c.psw.set_c();
    assert_eq!(c.single(Op::Ror, false, 1), Some(0x8000));
    assert!(c.psw.get_c() && c.psw.get_n() && !c.psw.get_v());
    assert_eq!(c.single(Op::Asl, false, 0x4000), Some(0x8000));
    assert!(!c.psw.get_c() && c.psw.get_v());
    assert_eq!(c.single(Op::Asr, false, 0x8001), Some(0xc000));
    assert!(c.psw.get_c() && !c.psw.get_v());
    assert_eq!(c.single(Op::Com, true, 0), Some(0xff));
    assert!(c.psw.get_c() && c.psw.get_n());

    assert_eq!(c.single(Op::Adc, false, 0xffff), Some(0));
    assert!(c.psw.get_c() && c.psw.get_z());
    assert_eq!(c.single(Op::Sbc, false, 0), Some(0xffff));
    assert!(c.psw.get_c());
}

#[test]
fn test_branch_conditions() {
    let mut c = Pdp11::default();
    c.psw.set_n();
    assert!(!c.condition(3) && c.condition(4));
    assert!(c.condition(9) && !c.condition(8));

    c.psw = Default::default();
    c.psw.set_z();
    assert!(c.condition(2) && c.condition(6) && !c.condition(5));

    c.psw = Default::default();
    c.psw.set_c();
    assert!(c.condition(15) && c.condition(11) && !c.condition(10));
    assert!(c.condition(0) && !c.condition(7));
}

#[test]
fn test_mul() {
    let (p, _) = run(&[
        0o012700, 0o400,    // mov $100h, r0
        0o070027, 0o400,    // mul $100h, r0
    ], 2);
    assert_eq!((p.cpu.r[0], p.cpu.r[1]), (1, 0));
    assert!(p.cpu.psw.get_c());

    let (p, _) = run(&[
        0o012701, 3,        // mov $3, r1
        0o070127, 0o177776, // mul $-2, r1
    ], 2);
    assert_eq!(p.cpu.r[1], 0xfffa);
    assert!(p.cpu.psw.get_n() && !p.cpu.psw.get_c());
}

#[test]
fn test_div() {
    let (p, _) = run(&[
        0o005000,           // clr r0
        0o012701, 7,        // mov $7, r1
        0o071027, 2,        // div $2, r0
    ], 3);
    assert_eq!((p.cpu.r[0], p.cpu.r[1]), (3, 1));

    let (p, _) = run(&[
        0o012700, 0o177777, // mov $-1, r0
        0o012701, 0o177771, // mov $-7, r1
        0o071027, 2,        // div $2, r0
    ], 3);
    assert_eq!((p.cpu.r[0], p.cpu.r[1]), (0xfffd, 0xffff));
    assert!(p.cpu.psw.get_n());

    let (_, stop) = run(&[0o071027, 0], 1);
    assert_eq!(stop, StopReason::Error(ExecError::DivideByZero));

    let (p, stop) = run(&[
        0o012700, 1,        // mov $1, r0
        0o005001,           // clr r1
        0o071027, 1,        // div $1, r0
    ], 3);
    assert_eq!(stop, StopReason::Error(ExecError::DivisionOverflow));
    assert!(p.cpu.psw.get_v());
}

#[test]
fn test_ash() {
    let (p, _) = run(&[
        0o012700, 1,        // mov $1, r0
        0o072027, 3,        // ash $3, r0
    ], 2);
    assert_eq!(p.cpu.r[0], 8);

    let (p, _) = run(&[
        0o012700, 0o100000, // mov $100000, r0
        0o072027, 0o76,     // ash $-2, r0
    ], 2);
    assert_eq!(p.cpu.r[0], 0xe000);
    assert!(p.cpu.psw.get_n());

    let (p, _) = run(&[
        0o012700, 1,        // mov $1, r0
        0o005001,           // clr r1
        0o073027, 0o77,     // ashc $-1, r0
    ], 3);
    assert_eq!((p.cpu.r[0], p.cpu.r[1]), (0, 0x8000));
}

#[test]
fn test_sob_loop() {
    let (p, stop) = run(&[
        0o012701, 3,        // mov $3, r1
        0o005000,           // clr r0
        0o005200,           // inc r0
        0o077102,           // sob r1, .-2
    ], 8);
    assert_eq!(stop, StopReason::MaxCycles);
    assert_eq!((p.cpu.r[0], p.cpu.r[1]), (3, 0));
    assert_eq!(p.cpu.r[Pdp11::PC], 10);
}

#[test]
fn test_jsr_rts() {
    let (p, stop) = run(&[
        0o004767, 6,        // jsr pc, sub
        0o012703, 1,        // mov $1, r3
        0o000000,           // halt
        0o012702, 9,        // sub: mov $9, r2
        0o000207,           // rts pc
    ], 4);
    assert_eq!(stop, StopReason::MaxCycles);
    assert_eq!((p.cpu.r[2], p.cpu.r[3]), (9, 1));
    assert_eq!(p.cpu.r[Pdp11::PC], 8);
    assert_eq!(p.cpu.r[Pdp11::SP], p.cpu.start_sp);
}

#[test]
fn test_rts_from_entry_terminates() {
    let (p, stop) = run(&[0o000207], 10);
    assert_eq!(stop, StopReason::Terminated(0));
    assert_eq!(p.get_state(), State::Terminated(0));
}

#[test]
fn test_swab_sxt() {
    let (p, _) = run(&[
        0o012700, 0x1280,   // mov $1280h, r0
        0o000300,           // swab r0
    ], 2);
    assert_eq!(p.cpu.r[0], 0x8012);
    assert!(!p.cpu.psw.get_n() && !p.cpu.psw.get_z());

    let (p, _) = run(&[
        0o000270,           // sen
        0o006701,           // sxt r1
    ], 2);
    assert_eq!(p.cpu.r[1], 0xffff);
    assert!(!p.cpu.psw.get_z());
}

#[test]
fn test_bad_instructions() {
    assert_eq!(run(&[0o000007], 1).1, StopReason::Error(ExecError::UndefinedInstruction));
    assert_eq!(run(&[0o000000], 1).1, StopReason::Error(ExecError::UnimplementedInstruction));
    assert_eq!(run(&[0o104005], 1).1, StopReason::Error(ExecError::UnimplementedInstruction));
    // floating point is skipped
    assert_eq!(run(&[0o170011, 0o000207], 5).1, StopReason::Terminated(0));
}

#[test]
fn test_register_dump() {
    let mut c = Pdp11::default();
    c.r[0] = 0x12;
    c.psw.set_z();
    let s = c.to_string();
    assert!(s.starts_with("r0=0012 r1=0000"));
    assert!(s.ends_with("-Z--"));
}
