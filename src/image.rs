//! Image layer: the backing file, fixed in size and memory-mapped.
//!
//! All other layers address storage through an [`Image`]; none of them keep
//! their own handle to the backing file or its descriptor.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::MmapMut;

use crate::bitmap;
use crate::directory;

/// Size in bytes of one block.
pub const BLOCK_SIZE: usize = 4096;
/// Number of blocks in the image, including the superblock.
pub const BLOCK_COUNT: usize = 256;
/// Total size of the image file in bytes.
pub const IMAGE_SIZE: u64 = (BLOCK_SIZE * BLOCK_COUNT) as u64;

/// Offset, within block 0, of the block-usage bitmap.
pub const BLOCK_BITMAP_OFFSET: usize = 0;
/// Length in bytes of each bitmap (covers up to 256 bits).
pub const BITMAP_LEN: usize = 32;
/// Offset, within block 0, of the inode-usage bitmap.
pub const INODE_BITMAP_OFFSET: usize = 32;
/// Offset, within block 0, of the inode table.
pub const INODE_TABLE_OFFSET: usize = 64;

/// The memory-mapped backing image of the filesystem.
pub struct Image {
	mmap: MmapMut,
}

impl Image {
	/// Opens (creating if absent) the image file at `path`, fixes its size
	/// to [`IMAGE_SIZE`], and maps it into memory. If the image is fresh
	/// (block bit 0 clear), the root directory is materialized.
	pub fn init(path: &Path) -> io::Result<Self> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(path)?;
		file.set_len(IMAGE_SIZE)?;

		let mmap = unsafe { MmapMut::map_mut(&file)? };
		let mut image = Self { mmap };

		if bitmap::get(image.block_bitmap(), 0) == 0 {
			bitmap::set(image.block_bitmap_mut(), 0, 1);
			directory::init(&mut image);
		}

		Ok(image)
	}

	/// Returns the byte range of block `i`.
	pub fn block(&self, i: usize) -> &[u8] {
		&self.mmap[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]
	}

	/// Returns the mutable byte range of block `i`.
	pub fn block_mut(&mut self, i: usize) -> &mut [u8] {
		&mut self.mmap[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]
	}

	/// Returns the block-usage bitmap.
	pub fn block_bitmap(&self) -> &[u8] {
		&self.mmap[BLOCK_BITMAP_OFFSET..BLOCK_BITMAP_OFFSET + BITMAP_LEN]
	}

	/// Returns the mutable block-usage bitmap.
	pub fn block_bitmap_mut(&mut self) -> &mut [u8] {
		&mut self.mmap[BLOCK_BITMAP_OFFSET..BLOCK_BITMAP_OFFSET + BITMAP_LEN]
	}

	/// Returns the inode-usage bitmap.
	pub fn inode_bitmap(&self) -> &[u8] {
		&self.mmap[INODE_BITMAP_OFFSET..INODE_BITMAP_OFFSET + BITMAP_LEN]
	}

	/// Returns the mutable inode-usage bitmap.
	pub fn inode_bitmap_mut(&mut self) -> &mut [u8] {
		&mut self.mmap[INODE_BITMAP_OFFSET..INODE_BITMAP_OFFSET + BITMAP_LEN]
	}

	/// Reads a `T` by value out of the mapping at byte offset `off`.
	///
	/// `T` must be a fixed-layout (`#[repr(C)]`) plain-data type; the read
	/// is unaligned since the mapping's base address isn't guaranteed to
	/// satisfy `T`'s alignment.
	pub fn read_at<T: Copy>(&self, off: usize) -> T {
		assert!(off + std::mem::size_of::<T>() <= self.mmap.len());
		let ptr = self.mmap.as_ptr().wrapping_add(off) as *const T;
		unsafe { ptr.read_unaligned() }
	}

	/// Writes `value` into the mapping at byte offset `off`.
	pub fn write_at<T: Copy>(&mut self, off: usize, value: &T) {
		assert!(off + std::mem::size_of::<T>() <= self.mmap.len());
		let ptr = self.mmap.as_mut_ptr().wrapping_add(off) as *mut T;
		unsafe { ptr.write_unaligned(*value) }
	}

	/// Flushes pending writes to the backing file.
	pub fn sync(&self) -> io::Result<()> {
		self.mmap.flush()
	}
}

#[cfg(test)]
pub(crate) fn temp_image() -> (tempfile::TempDir, Image) {
	let dir = tempfile::tempdir().expect("create temp dir");
	let path = dir.path().join("image.fs");
	let image = Image::init(&path).expect("init image");
	(dir, image)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn init_creates_exact_size_and_root() {
		let (_dir, image) = temp_image();
		assert_eq!(bitmap::get(image.block_bitmap(), 0), 1);
		assert_eq!(bitmap::get(image.inode_bitmap(), 0), 1);
	}

	#[test]
	fn image_file_is_exactly_the_fixed_size() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("image.fs");
		let _image = Image::init(&path).unwrap();
		let metadata = std::fs::metadata(&path).unwrap();
		assert_eq!(metadata.len(), IMAGE_SIZE);
	}

	#[test]
	fn reinit_of_existing_image_does_not_reset_it() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("image.fs");
		{
			let mut image = Image::init(&path).unwrap();
			image.write_at(INODE_TABLE_OFFSET + 1000, &42u32);
		}
		let image = Image::init(&path).unwrap();
		let v: u32 = image.read_at(INODE_TABLE_OFFSET + 1000);
		assert_eq!(v, 42);
	}
}
