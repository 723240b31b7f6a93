mod generation;
mod handles;
mod heap;

pub use generation::*;
pub use handles::*;
pub use heap::*;

use std::io;

use fxhash::FxHashSet;
use nohash_hasher::IntMap;
use tracing::{debug, trace};

use crate::model::{ManagedFunction, Type};
use crate::runtime::{CallStack, StackFrame};
use crate::ARRAY_LENGTH_SIZE;

/// The call site the collector walks roots from: the allocating frame's
/// base pointer plus the function and instruction index naming its verified
/// type information.
#[derive(Debug, Copy, Clone)]
pub struct GcRuntimeInformation<'l> {
	pub base_ptr: *mut u64,
	pub function: &'l ManagedFunction<'l>,
	pub instruction_index: usize,
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Default, Copy, Clone)]
pub struct GcStats {
	pub collections: usize,
	pub deallocated_objects: usize,
	pub promoted_objects: usize,
}

//Objects surviving this many young collections move to the old generation.
const PROMOTION_AGE: u8 = 3;

//A young collection starts when the poll sees occupancy above this fraction.
const COLLECTION_NUMERATOR: usize = 3;
const COLLECTION_DENOMINATOR: usize = 4;

/// A precise, generational, compacting collector with two generations.
///
/// The young generation evacuates survivors into its shadow space and swaps;
/// objects over the promotion age move into the old generation. The old
/// generation slide-compacts in place (through its shadow as scratch) so the
/// heap bounds and card table embedded in emitted code stay valid. Roots are
/// found by walking the call stack ring and frame pointer chain against the
/// verifier's per-call-site operand type snapshots; old-to-young references
/// are found through the card table.
pub struct GarbageCollector<'l> {
	young: CollectorGeneration,
	old: CollectorGeneration,
	handles: IntMap<usize, ObjectHandle<'l>>,
	runtime_information: Option<GcRuntimeInformation<'l>>,
	stats: GcStats,
}

impl<'l> GarbageCollector<'l> {
	pub fn new(young_size: usize, old_size: usize, card_size: usize) -> io::Result<Self> {
		Ok(GarbageCollector {
			young: CollectorGeneration::new(young_size, card_size, false)?,
			old: CollectorGeneration::new(old_size, card_size, true)?,
			handles: IntMap::default(),
			runtime_information: None,
			stats: GcStats::default(),
		})
	}

	#[inline]
	pub fn old_generation(&self) -> &CollectorGeneration {
		&self.old
	}

	#[inline]
	pub fn young_generation(&self) -> &CollectorGeneration {
		&self.young
	}

	#[inline]
	pub fn stats(&self) -> GcStats {
		self.stats
	}

	/// The number of live objects the collector currently owns.
	pub fn num_objects(&self) -> usize {
		self.handles.len()
	}

	pub fn get_handle(&self, ptr: *const u8) -> Option<&ObjectHandle<'l>> {
		self.handles.get(&(ptr as usize))
	}

	/// Saves the current call site. Emitted polls call this before every
	/// allocation so a collection triggered from inside the allocator can
	/// still walk the stack precisely.
	pub fn set_runtime_information(&mut self, information: GcRuntimeInformation<'l>) {
		self.runtime_information = Some(information);
	}

	/// Whether the young generation is full enough for the poll to collect.
	pub fn needs_collection(&self) -> bool {
		self.young.heap().used() * COLLECTION_DENOMINATOR >= self.young.heap().size() * COLLECTION_NUMERATOR
	}

	/// Allocates a new array of the given array type and length.
	pub fn new_array(&mut self, array_type: &'l Type<'l>, length: i32, call_stack: &CallStack<'l>) -> *mut u8 {
		let element_type = array_type.element_type().expect("array allocation requires an array type");
		let size = ARRAY_LENGTH_SIZE + length as usize * element_type.size();

		let ptr = self.allocate(array_type, size, call_stack);
		unsafe {
			set_array_length(ptr, length);
		}

		trace!(ty = array_type.name(), length, size, "allocated array");
		ptr
	}

	/// Allocates a new instance of the given class type.
	pub fn new_class(&mut self, class_type: &'l Type<'l>, call_stack: &CallStack<'l>) -> *mut u8 {
		let size = class_type.metadata().expect("class allocation requires a class type").size();
		let ptr = self.allocate(class_type, size, call_stack);

		trace!(ty = class_type.name(), size, "allocated object");
		ptr
	}

	/// Makes sure the young generation can take `size` more bytes without a
	/// collection, collecting now if it cannot. Used before multi-part
	/// allocations that must not move halfway through.
	pub fn ensure_young_capacity(&mut self, size: usize, call_stack: &CallStack<'l>) {
		if self.young.heap().free() < size {
			self.collect(0, call_stack);
		}
		if self.young.heap().free() < size {
			self.collect(1, call_stack);
		}
	}

	fn allocate(&mut self, ty: &'l Type<'l>, size: usize, call_stack: &CallStack<'l>) -> *mut u8 {
		//Even empty objects need a distinct address
		let size = size.max(1);
		if size > self.young.heap().size() {
			crate::runtime::fatal_runtime_error("Out of memory.");
		}

		//Bump allocate, collecting the young generation and then the whole
		//heap when space runs out
		let mut generation = 0;
		loop {
			if let Some(ptr) = self.young.heap_mut().allocate(size) {
				self.handles.insert(
					ptr as usize,
					ObjectHandle { ptr, size, ty, generation: Generation::Young, age: 0 },
				);
				return ptr;
			}

			if generation > 1 {
				crate::runtime::fatal_runtime_error("Out of memory.");
			}

			self.collect(generation, call_stack);
			generation += 1;
		}
	}

	/// Runs a collection of the given generation: 0 collects the young
	/// generation, anything above collects both.
	pub fn collect(&mut self, generation: i32, call_stack: &CallStack<'l>) {
		let Some(information) = self.runtime_information else {
			return;
		};

		self.stats.collections += 1;
		if generation == 0 {
			self.collect_young(information, call_stack);
		} else {
			self.collect_full(information, call_stack);
		}
	}

	//The addresses of every stack slot holding a reference, found by pairing
	//the call stack ring with the frame pointer chain.
	fn stack_reference_slots(
		&self,
		information: &GcRuntimeInformation<'l>,
		call_stack: &CallStack<'l>,
	) -> Vec<*mut usize> {
		let mut slots = Vec::new();

		let mut frame = StackFrame::new(information.base_ptr, information.function, information.instruction_index);
		slots.extend(frame.reference_slots());

		for entry in call_stack.entries_from_top() {
			let function = unsafe { &*entry.function };
			frame = StackFrame::new(frame.previous_base_ptr(), function, entry.call_point);
			slots.extend(frame.reference_slots());
		}

		slots
	}

	//The addresses of old generation slots in marked cards that point into
	//the young generation.
	fn card_reference_slots(&self) -> Vec<*mut usize> {
		let mut slots = Vec::new();
		let marked: FxHashSet<usize> = self.old.marked_cards().into_iter().collect();
		if marked.is_empty() {
			return slots;
		}

		for handle in self.handles.values() {
			if handle.generation != Generation::Old {
				continue;
			}

			let (first, last) = self.old.card_span(handle.ptr as usize, handle.size);
			if !(first..=last).any(|card| marked.contains(&card)) {
				continue;
			}

			for slot in handle.reference_slots() {
				let value = unsafe { *slot };
				if self.young.heap().contains(value) {
					slots.push(slot);
				}
			}
		}

		slots
	}

	//Computes the transitively reachable objects from the given root slots.
	//When restricted to the young generation, edges out of old objects are
	//not followed (the card table names those separately).
	fn compute_reachable(&self, root_slots: &[*mut usize], young_only: bool) -> Vec<usize> {
		let mut visited = FxHashSet::default();
		let mut work: Vec<usize> = root_slots.iter().map(|slot| unsafe { **slot }).collect();

		while let Some(address) = work.pop() {
			let Some(handle) = self.handles.get(&address) else {
				continue;
			};

			if young_only && handle.generation != Generation::Young {
				continue;
			}

			if !visited.insert(address) {
				continue;
			}

			for slot in handle.reference_slots() {
				let value = unsafe { *slot };
				if value != 0 {
					work.push(value);
				}
			}
		}

		let mut reachable: Vec<usize> = visited.into_iter().collect();
		reachable.sort_unstable();
		reachable
	}

	//Rewrites every slot whose value was relocated.
	fn update_slots(slots: &[*mut usize], forwarding: &IntMap<usize, usize>) {
		for &slot in slots {
			let value = unsafe { *slot };
			if let Some(&new_address) = forwarding.get(&value) {
				unsafe {
					*slot = new_address;
				}
			}
		}
	}

	//Rewrites the reference slots inside every surviving object.
	fn update_object_references(&self, addresses: &[usize], forwarding: &IntMap<usize, usize>) {
		for address in addresses {
			let handle = &self.handles[address];
			Self::update_slots(&handle.reference_slots(), forwarding);
		}
	}

	//Marks the cards of old objects that reference young objects.
	fn remark_cards(&mut self) {
		let mut addresses = Vec::new();
		for handle in self.handles.values() {
			if handle.generation != Generation::Old {
				continue;
			}

			for slot in handle.reference_slots() {
				let value = unsafe { *slot };
				if self.young.heap().contains(value) {
					addresses.push(slot as usize);
				}
			}
		}

		for address in addresses {
			self.old.mark_card_at(address);
		}
	}

	fn collect_young(&mut self, information: GcRuntimeInformation<'l>, call_stack: &CallStack<'l>) {
		let mut root_slots = self.stack_reference_slots(&information, call_stack);
		root_slots.extend(self.card_reference_slots());

		let reachable = self.compute_reachable(&root_slots, true);

		//Evacuate survivors: into the old generation frontier once old
		//enough, otherwise into the shadow space
		let mut forwarding: IntMap<usize, usize> = IntMap::default();
		let mut promoted = 0usize;

		for &address in &reachable {
			let handle = self.handles[&address];

			let destination = if handle.age + 1 >= PROMOTION_AGE {
				match self.old.heap_mut().allocate(handle.size) {
					Some(ptr) => {
						promoted += 1;
						ptr
					}
					//The old generation is full: abandon the partial copies
					//(nothing references them yet) and escalate
					None => {
						self.young.shadow_mut().reset();
						self.collect_full(information, call_stack);
						return;
					}
				}
			} else {
				self.young.shadow_mut().allocate(handle.size).expect("the shadow space mirrors the young heap")
			};

			unsafe {
				std::ptr::copy_nonoverlapping(handle.ptr, destination, handle.size);
			}
			forwarding.insert(address, destination as usize);
		}

		//Rebuild the handle table for the moved objects
		let mut deallocated = 0usize;
		let young_handles: Vec<usize> = self
			.handles
			.iter()
			.filter(|(_, handle)| handle.generation == Generation::Young)
			.map(|(&address, _)| address)
			.collect();

		for address in young_handles {
			let handle = self.handles.remove(&address).unwrap();
			match forwarding.get(&address) {
				Some(&new_address) => {
					let promoted_now = handle.age + 1 >= PROMOTION_AGE;
					self.handles.insert(
						new_address,
						ObjectHandle {
							ptr: new_address as *mut u8,
							age: handle.age + 1,
							generation: if promoted_now { Generation::Old } else { Generation::Young },
							..handle
						},
					);
				}
				None => deallocated += 1,
			}
		}

		//Point every root and every survivor at the new locations
		Self::update_slots(&root_slots, &forwarding);
		let new_addresses: Vec<usize> = forwarding.values().copied().collect();
		self.update_object_references(&new_addresses, &forwarding);

		self.young.swap_spaces();

		//Rebuild the remembered set for the survivors
		self.old.clear_cards();
		self.remark_cards();

		self.stats.deallocated_objects += deallocated;
		self.stats.promoted_objects += promoted;
		debug!(deallocated, promoted, live = self.handles.len(), "young collection");
	}

	fn collect_full(&mut self, information: GcRuntimeInformation<'l>, call_stack: &CallStack<'l>) {
		let root_slots = self.stack_reference_slots(&information, call_stack);
		let reachable = self.compute_reachable(&root_slots, false);
		let reachable_set: FxHashSet<usize> = reachable.iter().copied().collect();

		let mut forwarding: IntMap<usize, usize> = IntMap::default();

		//Slide-compact the old generation through its shadow scratch space,
		//keeping the heap bounds embedded in emitted code valid
		let old_live: Vec<usize> = reachable
			.iter()
			.copied()
			.filter(|address| self.handles[address].generation == Generation::Old)
			.collect();

		let old_heap_start = self.old.heap().start();
		let mut offset = 0usize;
		for &address in &old_live {
			let handle = self.handles[&address];
			let scratch = self.old.shadow_mut().allocate(handle.size).expect("the scratch space mirrors the old heap");
			unsafe {
				std::ptr::copy_nonoverlapping(handle.ptr, scratch, handle.size);
			}
			forwarding.insert(address, old_heap_start + offset);
			offset += handle.size;
		}

		let compacted = offset;
		{
			let (scratch_ptr, scratch_len) = {
				let shadow = self.old.shadow_mut();
				(shadow.data().as_ptr(), compacted)
			};
			unsafe {
				std::ptr::copy_nonoverlapping(scratch_ptr, self.old.heap_mut().data_mut().as_mut_ptr(), scratch_len);
			}
			self.old.heap_mut().set_used(compacted);
			self.old.shadow_mut().reset();
		}

		//Young survivors promote by age as usual; the rest compact into the
		//young shadow space
		let young_live: Vec<usize> = reachable
			.iter()
			.copied()
			.filter(|address| self.handles[address].generation == Generation::Young)
			.collect();

		let mut promoted = 0usize;
		for &address in &young_live {
			let handle = self.handles[&address];

			let destination = if handle.age + 1 >= PROMOTION_AGE {
				match self.old.heap_mut().allocate(handle.size) {
					Some(ptr) => {
						promoted += 1;
						ptr
					}
					None => crate::runtime::fatal_runtime_error("Out of memory."),
				}
			} else {
				self.young.shadow_mut().allocate(handle.size).expect("the shadow space mirrors the young heap")
			};

			unsafe {
				std::ptr::copy_nonoverlapping(handle.ptr, destination, handle.size);
			}
			forwarding.insert(address, destination as usize);
		}

		//Rebuild the handle table
		let mut deallocated = 0usize;
		let all_handles: Vec<usize> = self.handles.keys().copied().collect();
		for address in all_handles {
			let handle = self.handles.remove(&address).unwrap();

			if !reachable_set.contains(&address) {
				deallocated += 1;
				continue;
			}

			let new_address = forwarding[&address];
			let (generation, age) = match handle.generation {
				Generation::Old => (Generation::Old, handle.age),
				Generation::Young if handle.age + 1 >= PROMOTION_AGE => (Generation::Old, handle.age + 1),
				Generation::Young => (Generation::Young, handle.age + 1),
			};

			self.handles.insert(
				new_address,
				ObjectHandle { ptr: new_address as *mut u8, generation, age, ..handle },
			);
		}

		Self::update_slots(&root_slots, &forwarding);
		let new_addresses: Vec<usize> = self.handles.keys().copied().collect();
		self.update_object_references(&new_addresses, &forwarding);

		self.young.swap_spaces();
		self.old.clear_cards();
		self.remark_cards();

		self.stats.deallocated_objects += deallocated;
		self.stats.promoted_objects += promoted;
		debug!(deallocated, promoted, live = self.handles.len(), "full collection");
	}
}

#[cfg(test)]
mod tests {
	use bumpalo::Bump;

	use super::*;
	use crate::loader::{define_functions, load_managed_functions, parse_assembly, Verifier};
	use crate::model::{Binder, ClassProvider, TypeProvider};

	//Builds a verified function whose frame has a single reference local, and
	//a buffer standing in for its native frame.
	struct FrameFixture<'l> {
		function: &'l ManagedFunction<'l>,
		frame: Vec<u64>,
	}

	impl<'l> FrameFixture<'l> {
		fn new(bump: &'l Bump, types: &TypeProvider<'l>, classes: &mut ClassProvider<'l>, binder: &mut Binder<'l>) -> Self {
			let assembly =
				parse_assembly("func main() Int { .locals 1 .local 0 Ref.Array[Int] ldint 0 ret }").unwrap();

			define_functions(&assembly, binder, classes, types, bump).unwrap();
			let functions = load_managed_functions(&assembly, binder, classes, types, bump).unwrap();
			let function = &*bump.alloc(functions.into_iter().next().unwrap().1);

			let verifier = Verifier::new(binder, classes, types, bump);
			verifier.verify_function(function).unwrap();

			FrameFixture { function, frame: vec![0u64; 16] }
		}

		//The frame pointer: local 0 sits one slot below it
		fn base_ptr(&mut self) -> *mut u64 {
			unsafe { self.frame.as_mut_ptr().add(15) }
		}

		fn local_slot(&mut self) -> *mut u64 {
			unsafe { self.frame.as_mut_ptr().add(14) }
		}

		fn information(&mut self) -> GcRuntimeInformation<'l> {
			GcRuntimeInformation { base_ptr: self.base_ptr(), function: self.function, instruction_index: 1 }
		}
	}

	#[test]
	fn unreachable_objects_are_collected() {
		let bump = Bump::new();
		let types = TypeProvider::new();
		let mut classes = ClassProvider::new();
		let mut binder = Binder::new();
		let mut fixture = FrameFixture::new(&bump, &types, &mut classes, &mut binder);

		let call_stack = CallStack::new(16);
		let mut gc = GarbageCollector::new(1 << 16, 1 << 16, 1024).unwrap();
		let array_type = types.make_type("Ref.Array[Int]", &classes, &bump).unwrap();

		//Allocate a chain of arrays, keeping only the last one reachable
		let count = 10;
		let mut last = std::ptr::null_mut();
		for _ in 0..count {
			last = gc.new_array(array_type, 4, &call_stack);
		}
		unsafe { *fixture.local_slot() = last as u64 };
		assert_eq!(gc.num_objects(), count);

		let information = fixture.information();
		gc.set_runtime_information(information);
		gc.collect(0, &call_stack);

		assert_eq!(gc.num_objects(), 1);
		assert_eq!(gc.stats().deallocated_objects, count - 1);

		//The root was updated to the survivor's new location
		let moved = unsafe { *fixture.local_slot() } as *const u8;
		let handle = gc.get_handle(moved).unwrap();
		assert_eq!(handle.generation, Generation::Young);
		assert_eq!(unsafe { array_length(moved) }, 4);
	}

	#[test]
	fn survivors_are_promoted_after_enough_collections() {
		let bump = Bump::new();
		let types = TypeProvider::new();
		let mut classes = ClassProvider::new();
		let mut binder = Binder::new();
		let mut fixture = FrameFixture::new(&bump, &types, &mut classes, &mut binder);

		let call_stack = CallStack::new(16);
		let mut gc = GarbageCollector::new(1 << 16, 1 << 16, 1024).unwrap();
		let array_type = types.make_type("Ref.Array[Int]", &classes, &bump).unwrap();

		let ptr = gc.new_array(array_type, 2, &call_stack);
		unsafe { *fixture.local_slot() = ptr as u64 };

		let information = fixture.information();
		gc.set_runtime_information(information);

		for _ in 0..PROMOTION_AGE {
			gc.collect(0, &call_stack);
		}

		let moved = unsafe { *fixture.local_slot() } as *const u8;
		let handle = gc.get_handle(moved).unwrap();
		assert_eq!(handle.generation, Generation::Old);
		assert!(gc.old_generation().heap().used() > 0);
		assert_eq!(gc.stats().promoted_objects, 1);
	}

	#[test]
	fn marked_cards_keep_young_objects_alive() {
		let bump = Bump::new();
		let types = TypeProvider::new();
		let mut classes = ClassProvider::new();
		let mut binder = Binder::new();
		let mut fixture = FrameFixture::new(&bump, &types, &mut classes, &mut binder);

		let call_stack = CallStack::new(16);
		let mut gc = GarbageCollector::new(1 << 16, 1 << 16, 1024).unwrap();
		let outer_type = types.make_type("Ref.Array[Ref.Array[Int]]", &classes, &bump).unwrap();
		let inner_type = types.make_type("Ref.Array[Int]", &classes, &bump).unwrap();

		//Promote a container array into the old generation
		let outer = gc.new_array(outer_type, 1, &call_stack);
		unsafe { *fixture.local_slot() = outer as u64 };

		let information = GcRuntimeInformation {
			base_ptr: fixture.base_ptr(),
			function: fixture.function,
			instruction_index: 1,
		};
		gc.set_runtime_information(information);
		for _ in 0..PROMOTION_AGE {
			gc.collect(0, &call_stack);
		}

		let outer = unsafe { *fixture.local_slot() } as *mut u8;
		assert_eq!(gc.get_handle(outer).unwrap().generation, Generation::Old);

		//Store a young array into the old container, marking its card the
		//way the emitted write barrier would
		let inner = gc.new_array(inner_type, 3, &call_stack);
		let element_slot = unsafe { outer.add(ARRAY_LENGTH_SIZE) } as *mut u64;
		unsafe { *element_slot = inner as u64 };
		gc.old.mark_card_at(element_slot as usize);

		//Drop the stack root to the inner array; only the card keeps it alive
		gc.collect(0, &call_stack);

		let stored = unsafe { *element_slot } as *const u8;
		let handle = gc.get_handle(stored).unwrap();
		assert_eq!(unsafe { array_length(stored) }, 3);
		assert_eq!(handle.generation, Generation::Young);
	}
}
