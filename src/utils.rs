/// Align downwards.
///
/// Returns the greatest x with alignment `align` so that x <= addr.
/// The alignment must be a power of 2.
pub fn align_down(addr: usize, align: usize) -> usize {
    if align.is_power_of_two() {
        addr & !(align - 1)
    } else if align == 0 {
        addr
    } else {
        panic!("`align` must be a power of 2");
    }
}

/// Align upwards.
///
/// Returns the smallest x with alignment `align` so that x >= addr, or
/// `None` if that value does not fit in a `usize`.
/// The alignment must be a power of 2.
pub fn align_up(addr: usize, align: usize) -> Option<usize> {
    match align {
        0 => Some(addr),
        _ => addr.checked_add(align - 1).map(|a| align_down(a, align)),
    }
}
