use std::io;

use memmap2::{Mmap, MmapMut};

use crate::utilities::round_to_multiple_of;

const PAGE_SIZE: usize = 4096;

//A code page is either still being filled (writable) or frozen (executable);
//it is never both at once.
enum PageState {
	Writable(MmapMut),
	Executable(Mmap),
	Transitioning,
}

/// A page of code memory, bump-allocated into while writable and flipped to
/// read+execute once its contents are linked.
pub struct CodePage {
	state: PageState,
	size: usize,
	used: usize,
}

impl CodePage {
	fn new(size: usize) -> io::Result<Self> {
		let map = MmapMut::map_anon(size)?;
		Ok(CodePage { state: PageState::Writable(map), size, used: 0 })
	}

	pub fn start(&self) -> *const u8 {
		match &self.state {
			PageState::Writable(map) => map.as_ptr(),
			PageState::Executable(map) => map.as_ptr(),
			PageState::Transitioning => unreachable!(),
		}
	}

	pub fn size(&self) -> usize {
		self.size
	}

	pub fn used(&self) -> usize {
		self.used
	}

	pub fn is_writable(&self) -> bool {
		matches!(self.state, PageState::Writable(_))
	}

	pub fn contains(&self, address: *const u8) -> bool {
		let start = self.start() as usize;
		(start..start + self.size).contains(&(address as usize))
	}

	fn allocate(&mut self, size: usize) -> Option<*mut u8> {
		if self.used + size > self.size {
			return None;
		}

		let address = self.start() as usize + self.used;
		self.used += size;
		Some(address as *mut u8)
	}

	pub fn make_executable(&mut self) -> io::Result<()> {
		match std::mem::replace(&mut self.state, PageState::Transitioning) {
			PageState::Writable(map) => {
				self.state = PageState::Executable(map.make_exec()?);
				Ok(())
			}
			state => {
				self.state = state;
				Ok(())
			}
		}
	}

	pub fn make_writable(&mut self) -> io::Result<()> {
		match std::mem::replace(&mut self.state, PageState::Transitioning) {
			PageState::Executable(map) => {
				self.state = PageState::Writable(map.make_mut()?);
				Ok(())
			}
			state => {
				self.state = state;
				Ok(())
			}
		}
	}
}

/// Owns the pages that hold emitted machine code. Emission targets writable
/// pages; the linker flips everything to read+execute, and runtime patching
/// (lazy compilation) flips a single page back around the write.
#[derive(Default)]
pub struct MemoryManager {
	pages: Vec<CodePage>,
}

impl MemoryManager {
	pub fn new() -> Self {
		MemoryManager { pages: Vec::new() }
	}

	/// Allocates writable code memory of the given size.
	pub fn allocate_writable(&mut self, size: usize) -> io::Result<*mut u8> {
		for page in &mut self.pages {
			if page.is_writable() {
				if let Some(memory) = page.allocate(size) {
					return Ok(memory);
				}
			}
		}

		let page_size = round_to_multiple_of::<PAGE_SIZE>(size);
		self.pages.push(CodePage::new(page_size)?);
		Ok(self.pages.last_mut().unwrap().allocate(size).unwrap())
	}

	/// Flips every page to read+execute.
	pub fn make_executable_all(&mut self) -> io::Result<()> {
		for page in &mut self.pages {
			page.make_executable()?;
		}
		Ok(())
	}

	/// Makes the page containing the given address writable again, for
	/// runtime patching.
	pub fn make_writable_containing(&mut self, address: *const u8) -> io::Result<()> {
		for page in &mut self.pages {
			if page.contains(address) {
				return page.make_writable();
			}
		}
		Ok(())
	}

	/// Restores read+execute on the page containing the given address.
	pub fn make_executable_containing(&mut self, address: *const u8) -> io::Result<()> {
		for page in &mut self.pages {
			if page.contains(address) {
				return page.make_executable();
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allocations_share_pages() {
		let mut manager = MemoryManager::new();
		let first = manager.allocate_writable(100).unwrap();
		let second = manager.allocate_writable(100).unwrap();

		assert_eq!(manager.pages.len(), 1);
		assert_eq!(second as usize - first as usize, 100);
	}

	#[test]
	fn large_allocations_get_their_own_page() {
		let mut manager = MemoryManager::new();
		manager.allocate_writable(100).unwrap();
		manager.allocate_writable(PAGE_SIZE * 2).unwrap();
		assert_eq!(manager.pages.len(), 2);
	}

	#[test]
	fn protection_flips() {
		let mut manager = MemoryManager::new();
		let memory = manager.allocate_writable(16).unwrap();
		unsafe { *memory = 0xC3 };

		manager.make_executable_all().unwrap();
		assert!(!manager.pages[0].is_writable());

		manager.make_writable_containing(memory).unwrap();
		assert!(manager.pages[0].is_writable());
		unsafe { *memory = 0x90 };

		manager.make_executable_containing(memory).unwrap();
		assert!(!manager.pages[0].is_writable());
	}
}
