//! Allocator: free/used bit scanning over the block and inode bitmaps.
//!
//! Both allocators use first-fit over the lowest index.

use crate::bitmap;
use crate::image::Image;
use crate::image::BLOCK_COUNT;
use crate::inode;

/// Finds the first free block, marks it used, and returns its index.
/// Block 0 (the superblock) is never returned. `None` means the image is
/// full.
pub fn alloc_block(image: &mut Image) -> Option<u32> {
	let bits = image.block_bitmap_mut();
	for b in 1..BLOCK_COUNT {
		if bitmap::get(bits, b) == 0 {
			bitmap::set(bits, b, 1);
			return Some(b as u32);
		}
	}
	None
}

/// Marks block `b` as free.
pub fn free_block(image: &mut Image, b: u32) {
	bitmap::set(image.block_bitmap_mut(), b as usize, 0);
}

/// Finds the first free inode slot, marks it used, and returns its index.
/// `None` means the inode table is full.
pub fn alloc_inode(image: &mut Image) -> Option<u32> {
	let max = inode::max_inodes();
	let bits = image.inode_bitmap_mut();
	for i in 0..max {
		if bitmap::get(bits, i) == 0 {
			bitmap::set(bits, i, 1);
			return Some(i as u32);
		}
	}
	None
}

/// Marks inode `i` as free. Callers must have already released the inode's
/// data (see [`inode::free_inode`]); this only clears the bit.
pub fn free_inode_bit(image: &mut Image, i: u32) {
	bitmap::set(image.inode_bitmap_mut(), i as usize, 0);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::image::temp_image;

	#[test]
	fn alloc_block_never_returns_zero_and_is_first_fit() {
		let (_dir, mut image) = temp_image();
		// Block 0 (superblock) and the root's two direct blocks are already
		// taken by the time the image is initialized.
		let a = alloc_block(&mut image).unwrap();
		let b = alloc_block(&mut image).unwrap();
		assert!(a >= 1 && b >= 1);
		assert_ne!(a, b);
	}

	#[test]
	fn freed_block_is_reused_by_next_alloc() {
		let (_dir, mut image) = temp_image();
		let b = alloc_block(&mut image).unwrap();
		free_block(&mut image, b);
		let c = alloc_block(&mut image).unwrap();
		assert_eq!(b, c);
	}

	#[test]
	fn block_allocator_exhausts() {
		let (_dir, mut image) = temp_image();
		let mut count = 0;
		while alloc_block(&mut image).is_some() {
			count += 1;
			assert!(count <= BLOCK_COUNT);
		}
	}

	#[test]
	fn inode_allocator_assigns_root_first() {
		let (_dir, mut image) = temp_image();
		// Root inode 0 is already allocated by image::init.
		let next = alloc_inode(&mut image).unwrap();
		assert_eq!(next, 1);
	}
}
