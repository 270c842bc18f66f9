use std::fmt;

use num_traits::{CheckedDiv, CheckedRem};

/// Returns the quotient and remainder of `a` divided by `b`, or `None` if the division is undefined
/// (division by zero, or the signed minimum divided by minus one).
pub(crate) fn quotient_and_remainder<T: CheckedDiv + CheckedRem>(a: T, b: T) -> Option<(T, T)> {
    Some((a.checked_div(&b)?, a.checked_rem(&b)?))
}

/// Displays a slice with a separator between the items.
pub(crate) struct Punctuated<'a, T> {
    vals: &'a [T],
    sep: &'static str,
}
impl<'a, T> Punctuated<'a, T> {
    pub(crate) fn join(vals: &'a [T], sep: &'static str) -> Self {
        Self { vals, sep }
    }
}
impl<'a, T: fmt::Debug> fmt::Display for Punctuated<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.vals {
            [] => Ok(()),
            [prev @ .., last] => {
                for x in prev {
                    write!(f, "{:?}{}", x, self.sep)?;
                }
                write!(f, "{:?}", last)
            }
        }
    }
}

#[test]
fn test_quotient_and_remainder() {
    assert_eq!(quotient_and_remainder(7u16, 2), Some((3, 1)));
    assert_eq!(quotient_and_remainder(-7i16, 2), Some((-3, -1)));
    assert_eq!(quotient_and_remainder(7u16, 0), None);
    assert_eq!(quotient_and_remainder(i32::MIN, -1), None);
}
#[test]
fn test_punctuated() {
    assert_eq!(format!("{}", Punctuated::join(&[] as &[&str], ", ")), "");
    assert_eq!(format!("{}", Punctuated::join(&["ls"], ", ")), "\"ls\"");
    assert_eq!(format!("{}", Punctuated::join(&["ls", "-l", "/"], ", ")), "\"ls\", \"-l\", \"/\"");
}
