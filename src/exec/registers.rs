//! Emulated hardware registers shared by the two instruction sets.

/// A 16-bit general-purpose register with the 8086 byte partitioning.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Register16(pub u16);
impl Register16 {
    /// Gets the full 16-bit value.
    pub const fn get_x16(self) -> u16 {
        self.0
    }
    /// Sets the full 16-bit value.
    pub fn set_x16(&mut self, val: u16) {
        self.0 = val;
    }

    /// Gets the low 8-bits.
    pub const fn get_x8(self) -> u8 {
        self.0 as u8
    }
    /// Sets the low 8-bits (without modifying the high byte).
    pub fn set_x8(&mut self, val: u8) {
        self.0 = (self.0 & 0xff00) | (val as u16);
    }

    /// Gets bits 8-15.
    pub const fn get_x8h(self) -> u8 {
        (self.0 >> 8) as u8
    }
    /// Sets bits 8-15 (without modifying the low byte).
    pub fn set_x8h(&mut self, val: u8) {
        self.0 = (self.0 & 0x00ff) | ((val as u16) << 8);
    }
}

#[test]
fn test_register16() {
    let mut r = Register16::default();
    assert_eq!(r.get_x16(), 0);

    r.set_x16(0x8692);
    assert_eq!(r.get_x16(), 0x8692);
    assert_eq!(r.get_x8(), 0x92);
    assert_eq!(r.get_x8h(), 0x86);

    r.set_x8(0xf5);
    assert_eq!(r.get_x16(), 0x86f5);
    assert_eq!(r.get_x8h(), 0x86);

    r.set_x8h(0x12);
    assert_eq!(r.get_x16(), 0x12f5);
    assert_eq!(r.get_x8(), 0xf5);
}

macro_rules! impl_flag {
    ($mask_name:ident, $set:ident, $clear:ident, $flip:ident, $get:ident, $assign:ident => $from:ty [ $mask:literal ]) => {
        pub const $mask_name: $from = $mask;
        pub fn $set(&mut self) { self.0 |= $mask }
        pub fn $clear(&mut self) { self.0 &= !$mask }
        pub fn $flip(&mut self) { self.0 ^= $mask }
        pub const fn $get(self) -> bool { (self.0 & $mask) != 0 }
        pub fn $assign(&mut self, value: bool) {
            if value { self.$set() } else { self.$clear() }
        }
    }
}

/// The 8086 FLAGS register, in the real hardware bit layout.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Flags(pub u16);
impl Flags {
    impl_flag! { MASK_CF, set_cf, clear_cf, flip_cf, get_cf, assign_cf => u16 [0x0001] }
    impl_flag! { MASK_PF, set_pf, clear_pf, flip_pf, get_pf, assign_pf => u16 [0x0004] }
    impl_flag! { MASK_AF, set_af, clear_af, flip_af, get_af, assign_af => u16 [0x0010] }
    impl_flag! { MASK_ZF, set_zf, clear_zf, flip_zf, get_zf, assign_zf => u16 [0x0040] }
    impl_flag! { MASK_SF, set_sf, clear_sf, flip_sf, get_sf, assign_sf => u16 [0x0080] }
    impl_flag! { MASK_TF, set_tf, clear_tf, flip_tf, get_tf, assign_tf => u16 [0x0100] }
    impl_flag! { MASK_IF, set_if, clear_if, flip_if, get_if, assign_if => u16 [0x0200] }
    impl_flag! { MASK_DF, set_df, clear_df, flip_df, get_df, assign_df => u16 [0x0400] }
    impl_flag! { MASK_OF, set_of, clear_of, flip_of, get_of, assign_of => u16 [0x0800] }

    /// Bits that always read as set on the 8086 (bit 1 and the unused top nibble).
    pub const RESERVED: u16 = 0xf002;

    // -------------------------------------------------------------------------------------

    /// Checks the "below" condition.
    pub const fn condition_b(self) -> bool { self.get_cf() }
    /// Checks the "below or equal" condition.
    pub const fn condition_be(self) -> bool { self.get_cf() || self.get_zf() }
    /// Checks the "above" condition.
    pub const fn condition_a(self) -> bool { !self.condition_be() }
    /// Checks the "above or equal" condition.
    pub const fn condition_ae(self) -> bool { !self.condition_b() }

    // -------------------------------------------------------------------------------------

    /// Checks the "less than" condition.
    pub const fn condition_l(self) -> bool { self.get_sf() != self.get_of() }
    /// Checks the "less or equal" condition.
    pub const fn condition_le(self) -> bool { self.get_zf() || (self.get_sf() != self.get_of()) }
    /// Checks the "greater than" condition.
    pub const fn condition_g(self) -> bool { !self.condition_le() }
    /// Checks the "greater or equal" condition.
    pub const fn condition_ge(self) -> bool { !self.condition_l() }
}

/// The PDP-11 processor status word (only the condition codes are modeled).
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Psw(pub u16);
impl Psw {
    impl_flag! { MASK_C, set_c, clear_c, flip_c, get_c, assign_c => u16 [0x0001] }
    impl_flag! { MASK_V, set_v, clear_v, flip_v, get_v, assign_v => u16 [0x0002] }
    impl_flag! { MASK_Z, set_z, clear_z, flip_z, get_z, assign_z => u16 [0x0004] }
    impl_flag! { MASK_N, set_n, clear_n, flip_n, get_n, assign_n => u16 [0x0008] }

    /// Unsigned "higher" (bhi).
    pub const fn condition_hi(self) -> bool { !self.get_c() && !self.get_z() }
    /// Signed "greater or equal" (bge).
    pub const fn condition_ge(self) -> bool { self.get_n() == self.get_v() }
    /// Signed "greater than" (bgt).
    pub const fn condition_gt(self) -> bool { !self.get_z() && self.condition_ge() }
}

#[test]
fn test_flags() {
    let mut f = Flags::default();
    f.set_cf();
    f.set_zf();
    assert_eq!(f.0, 0x41);
    assert!(f.condition_be());
    assert!(!f.condition_a());
    f.assign_of(true);
    assert!(f.condition_l());
    f.flip_cf();
    assert!(!f.get_cf());

    let mut p = Psw::default();
    p.set_n();
    p.set_v();
    assert_eq!(p.0, 0o12);
    assert!(p.condition_ge());
    p.clear_v();
    assert!(!p.condition_ge());
}
