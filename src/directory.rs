//! Directory layer: the fixed-slot entry table within a directory's data
//! block, plus path resolution built on top of it.

use crate::alloc;
use crate::image::Image;
use crate::image::BLOCK_SIZE;
use crate::inode;
use crate::inode::Inode;
use crate::inode::ROOT_INUM;
use crate::path;
use crate::util;

/// Length, including the terminating NUL, of a directory entry's name field.
pub const NAME_LEN: usize = 48;
/// Size in bytes of one directory entry.
pub const ENTRY_SIZE: usize = 64;
/// Number of entries that fit in one 4,096-byte directory block.
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;

/// A single fixed-size directory entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirEntry {
	name: [u8; NAME_LEN],
	inum: u32,
	_reserved: [u8; 12],
}

impl Default for DirEntry {
	fn default() -> Self {
		Self {
			name: [0; NAME_LEN],
			inum: 0,
			_reserved: [0; 12],
		}
	}
}

impl DirEntry {
	fn new(name: &str, inum: u32) -> Self {
		let mut e = Self::default();
		let bytes = name.as_bytes();
		let len = bytes.len().min(NAME_LEN - 1);
		e.name[..len].copy_from_slice(&bytes[..len]);
		e.inum = inum;
		e
	}

	fn is_free(&self) -> bool {
		self.inum == 0
	}

	fn name_str(&self) -> &str {
		let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
		std::str::from_utf8(&self.name[..len]).unwrap_or("")
	}
}

type Block = [DirEntry; ENTRIES_PER_BLOCK];

fn read_block(image: &Image, dir: &Inode) -> Block {
	image.read_at(dir.ptrs[0] as usize * BLOCK_SIZE)
}

fn write_block(image: &mut Image, dir: &Inode, block: &Block) {
	image.write_at(dir.ptrs[0] as usize * BLOCK_SIZE, block)
}

/// Materializes the root directory: allocates inode 0, its two direct
/// blocks, and a self-entry `"." -> 0`.
pub fn init(image: &mut Image) {
	let inum = inode::alloc_inode(image).expect("fresh image has a free inode slot");
	debug_assert_eq!(inum, ROOT_INUM, "root must be the first inode allocated");

	let root = Inode {
		refs: 1,
		mode: (libc::S_IFDIR | 0o755) as u32,
		ptrs: [
			alloc::alloc_block(image).expect("fresh image has free blocks"),
			alloc::alloc_block(image).expect("fresh image has free blocks"),
		],
		time: util::now_secs(),
		..Default::default()
	};
	inode::put(image, ROOT_INUM, &root);

	put(image, ROOT_INUM, ".", ROOT_INUM).expect("fresh root directory has free slots");
}

/// Inserts `name -> inum` into directory `dir_inum`'s first free slot.
/// Fails with `ENOSPC` if the directory is full.
pub fn put(image: &mut Image, dir_inum: u32, name: &str, inum: u32) -> Result<(), i32> {
	let dir = inode::get(image, dir_inum);
	let mut entries = read_block(image, &dir);

	let slot = entries.iter().position(DirEntry::is_free).ok_or(libc::ENOSPC)?;
	entries[slot] = DirEntry::new(name, inum);
	write_block(image, &dir, &entries);

	let mut dir = dir;
	dir.size += ENTRY_SIZE as u32;
	dir.time = util::now_secs();
	inode::put(image, dir_inum, &dir);
	Ok(())
}

/// Removes the entry named `name` from directory `dir_inum`, shifting
/// subsequent entries down by one slot and zeroing the vacated tail so the
/// empty-name sentinel `list` relies on stays contiguous.
pub fn delete(image: &mut Image, dir_inum: u32, name: &str) -> Result<(), i32> {
	let dir = inode::get(image, dir_inum);
	let mut entries = read_block(image, &dir);

	let slot = entries
		.iter()
		.position(|e| !e.is_free() && e.name_str() == name)
		.ok_or(libc::ENOENT)?;

	for i in slot..ENTRIES_PER_BLOCK - 1 {
		entries[i] = entries[i + 1];
	}
	entries[ENTRIES_PER_BLOCK - 1] = DirEntry::default();
	write_block(image, &dir, &entries);

	let mut dir = dir;
	dir.time = util::now_secs();
	inode::put(image, dir_inum, &dir);
	Ok(())
}

/// Looks up `name` within directory `dir_inum`. First match wins.
pub fn lookup(image: &Image, dir_inum: u32, name: &str) -> Result<u32, i32> {
	let dir = inode::get(image, dir_inum);
	let entries = read_block(image, &dir);
	entries
		.iter()
		.find(|e| !e.is_free() && e.name_str() == name)
		.map(|e| e.inum)
		.ok_or(libc::ENOENT)
}

/// Lists the names in directory `dir_inum`, stopping at the first slot
/// whose name is empty.
pub fn list(image: &Image, dir_inum: u32) -> Vec<String> {
	let dir = inode::get(image, dir_inum);
	let entries = read_block(image, &dir);
	entries
		.iter()
		.take_while(|e| !e.name_str().is_empty())
		.map(|e| e.name_str().to_owned())
		.collect()
}

/// Resolves an absolute path to an inode number.
pub fn tree_lookup(image: &Image, path: &str) -> Result<u32, i32> {
	if path == "/" {
		return Ok(ROOT_INUM);
	}
	let parent = parent_inode_of(image, path)?;
	lookup(image, parent, basename_of(path))
}

/// Returns the inode number of the directory containing `path`, by walking
/// every component but the last from the root.
pub fn parent_inode_of(image: &Image, path: &str) -> Result<u32, i32> {
	let comps = path::components(path);
	let mut cur = ROOT_INUM;
	if comps.is_empty() {
		return Ok(cur);
	}
	for c in &comps[..comps.len() - 1] {
		cur = lookup(image, cur, c)?;
	}
	Ok(cur)
}

/// Returns the last '/'-delimited component of `path`.
pub fn basename_of(path: &str) -> &str {
	path::components(path).last().copied().unwrap_or("")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::image::temp_image;

	#[test]
	fn root_has_dot_entry() {
		let (_dir, image) = temp_image();
		assert_eq!(list(&image, ROOT_INUM), vec!["."]);
		assert_eq!(lookup(&image, ROOT_INUM, ".").unwrap(), ROOT_INUM);
	}

	#[test]
	fn put_lookup_delete_roundtrip() {
		let (_dir, mut image) = temp_image();
		put(&mut image, ROOT_INUM, "a", 7).unwrap();
		assert_eq!(lookup(&image, ROOT_INUM, "a").unwrap(), 7);
		assert_eq!(list(&image, ROOT_INUM), vec![".", "a"]);

		delete(&mut image, ROOT_INUM, "a").unwrap();
		assert_eq!(lookup(&image, ROOT_INUM, "a").unwrap_err(), libc::ENOENT);
		assert_eq!(list(&image, ROOT_INUM), vec!["."]);
	}

	#[test]
	fn delete_shifts_and_zeroes_the_tail() {
		let (_dir, mut image) = temp_image();
		put(&mut image, ROOT_INUM, "a", 7).unwrap();
		put(&mut image, ROOT_INUM, "b", 8).unwrap();
		put(&mut image, ROOT_INUM, "c", 9).unwrap();

		delete(&mut image, ROOT_INUM, "a").unwrap();
		assert_eq!(list(&image, ROOT_INUM), vec![".", "b", "c"]);
		assert_eq!(lookup(&image, ROOT_INUM, "b").unwrap(), 8);
		assert_eq!(lookup(&image, ROOT_INUM, "c").unwrap(), 9);
	}

	#[test]
	fn directory_full_reports_enospc() {
		let (_dir, mut image) = temp_image();
		for i in 1..ENTRIES_PER_BLOCK as u32 {
			put(&mut image, ROOT_INUM, &format!("f{i}"), i).unwrap();
		}
		let err = put(&mut image, ROOT_INUM, "overflow", 999).unwrap_err();
		assert_eq!(err, libc::ENOSPC);
	}

	#[test]
	fn tree_lookup_resolves_nested_paths() {
		let (_dir, mut image) = temp_image();
		put(&mut image, ROOT_INUM, "sub", 5).unwrap();
		// materialize a directory-shaped inode 5 with its own block.
		let sub = Inode {
			refs: 1,
			mode: (libc::S_IFDIR | 0o755) as u32,
			ptrs: [
				alloc::alloc_block(&mut image).unwrap(),
				alloc::alloc_block(&mut image).unwrap(),
			],
			time: util::now_secs(),
			..Default::default()
		};
		inode::put(&mut image, 5, &sub);
		put(&mut image, 5, "leaf", 42).unwrap();

		assert_eq!(tree_lookup(&image, "/sub/leaf").unwrap(), 42);
		assert_eq!(parent_inode_of(&image, "/sub/leaf").unwrap(), 5);
		assert_eq!(basename_of("/sub/leaf"), "leaf");
		assert_eq!(tree_lookup(&image, "/sub/missing").unwrap_err(), libc::ENOENT);
	}

	#[test]
	fn parent_inode_of_top_level_path_is_root() {
		let (_dir, image) = temp_image();
		assert_eq!(parent_inode_of(&image, "/a").unwrap(), ROOT_INUM);
		assert_eq!(basename_of("/a"), "a");
	}
}
