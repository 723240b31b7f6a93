//Patches a 32-bit little endian value at the given offset in a code buffer.
#[inline]
pub(crate) fn set_int(code: &mut [u8], offset: usize, value: i32) {
	code[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

//Patches a 64-bit little endian value at the given offset in a code buffer.
#[inline]
pub(crate) fn set_long(code: &mut [u8], offset: usize, value: i64) {
	code[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn get_int(code: &[u8], offset: usize) -> i32 {
	i32::from_le_bytes(code[offset..offset + 4].try_into().unwrap())
}

pub(crate) fn fmt_debug_cell<T: std::fmt::Debug + Copy>(
	cell: &std::cell::Cell<T>,
	fmt: &mut std::fmt::Formatter,
) -> std::fmt::Result {
	std::fmt::Debug::fmt(&cell.get(), fmt)
}

#[inline]
pub(crate) const fn round_to_multiple_of<const MULTIPLE: usize>(value: usize) -> usize {
	((value + (MULTIPLE - 1)) / MULTIPLE) * MULTIPLE
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn patching() {
		let mut code = vec![0u8; 8];
		set_int(&mut code, 2, 4711);
		assert_eq!(&code[2..6], &[0x67, 0x12, 0x00, 0x00]);
		assert_eq!(get_int(&code, 2), 4711);
	}

	#[test]
	fn rounding() {
		assert_eq!(round_to_multiple_of::<16>(0), 0);
		assert_eq!(round_to_multiple_of::<16>(1), 16);
		assert_eq!(round_to_multiple_of::<16>(16), 16);
		assert_eq!(round_to_multiple_of::<16>(17), 32);
	}
}
