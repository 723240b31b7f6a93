use std::io;

use memmap2::MmapMut;

/// A contiguous managed heap with a bump-pointer frontier, backed by an
/// anonymous mapping so its bounds stay fixed for the lifetime of the
/// collector (emitted code embeds them).
pub struct ManagedHeap {
	data: MmapMut,
	size: usize,
	next: usize,
}

impl ManagedHeap {
	pub fn new(size: usize) -> io::Result<Self> {
		Ok(ManagedHeap { data: MmapMut::map_anon(size)?, size, next: 0 })
	}

	#[inline]
	pub fn start(&self) -> usize {
		self.data.as_ptr() as usize
	}

	#[inline]
	pub fn end(&self) -> usize {
		self.start() + self.size
	}

	#[inline]
	pub fn size(&self) -> usize {
		self.size
	}

	#[inline]
	pub fn used(&self) -> usize {
		self.next
	}

	#[inline]
	pub fn free(&self) -> usize {
		self.size - self.next
	}

	pub fn contains(&self, address: usize) -> bool {
		(self.start()..self.end()).contains(&address)
	}

	/// Bump-allocates zeroed memory, or `None` when the heap is full.
	pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
		if self.next + size > self.size {
			return None;
		}

		let offset = self.next;
		self.next += size;
		self.data[offset..offset + size].fill(0);
		Some(unsafe { self.data.as_mut_ptr().add(offset) })
	}

	/// Resets the frontier; the contents become garbage.
	pub fn reset(&mut self) {
		self.next = 0;
	}

	pub fn set_used(&mut self, used: usize) {
		debug_assert!(used <= self.size);
		self.next = used;
	}

	pub fn data(&self) -> &[u8] {
		&self.data
	}

	pub fn data_mut(&mut self) -> &mut [u8] {
		&mut self.data
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bump_allocation() {
		let mut heap = ManagedHeap::new(64).unwrap();
		let first = heap.allocate(16).unwrap();
		let second = heap.allocate(16).unwrap();

		assert_eq!(second as usize - first as usize, 16);
		assert_eq!(heap.used(), 32);
		assert!(heap.contains(first as usize));
		assert!(heap.allocate(64).is_none());

		heap.reset();
		assert_eq!(heap.used(), 0);
		assert!(heap.allocate(64).is_some());
	}

	#[test]
	fn allocations_are_zeroed() {
		let mut heap = ManagedHeap::new(32).unwrap();
		let ptr = heap.allocate(8).unwrap();
		unsafe {
			std::ptr::write_bytes(ptr, 0xFF, 8);
		}

		heap.reset();
		let ptr = heap.allocate(8).unwrap();
		let bytes = unsafe { std::slice::from_raw_parts(ptr, 8) };
		assert_eq!(bytes, [0; 8]);
	}
}
