//! Filesystem-operations layer: translates POSIX-shaped requests, addressed
//! by path, into inode and directory primitives.
//!
//! Every operation returns `Result<T, i32>`, where `Err` carries a positive
//! `libc` errno constant. This is the layer the FUSE bridge (`fuse_adapter`)
//! calls into; it has no knowledge of FUSE itself.

use crate::directory;
use crate::image::Image;
use crate::image::BLOCK_SIZE;
use crate::inode;
use crate::inode::Inode;
use crate::util;

/// The subset of inode metadata exposed to `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
	pub mode: u32,
	pub size: u32,
	pub nlink: u32,
	pub mtime: i64,
}

/// Returns success if `path` resolves to an inode, else `ENOENT`.
pub fn access(image: &Image, path: &str) -> Result<(), i32> {
	directory::tree_lookup(image, path)?;
	Ok(())
}

/// Returns the attributes of the inode at `path`.
pub fn getattr(image: &Image, path: &str) -> Result<Attr, i32> {
	let inum = directory::tree_lookup(image, path)?;
	let node = inode::get(image, inum);
	Ok(Attr {
		mode: node.mode,
		size: node.size,
		nlink: node.refs,
		mtime: node.time,
	})
}

/// Lists the entry names of the directory at `path`.
pub fn readdir(image: &Image, path: &str) -> Result<Vec<String>, i32> {
	let inum = directory::tree_lookup(image, path)?;
	Ok(directory::list(image, inum))
}

/// Creates a filesystem object (file, or a directory if `mode` carries the
/// directory type bit) at `path`. Allocates an inode and its two direct
/// blocks eagerly, then links it into its parent directory.
///
/// If directory insertion fails (the parent is full), the inode is left
/// allocated and unlinked, a documented, accepted leak (see `DESIGN.md`).
pub fn mknod(image: &mut Image, path: &str, mode: u32) -> Result<u32, i32> {
	let inum = inode::alloc_inode(image).ok_or(libc::ENOSPC)?;
	let parent = directory::parent_inode_of(image, path)?;

	let node = Inode {
		refs: 1,
		mode,
		size: 0,
		ptrs: [
			crate::alloc::alloc_block(image).ok_or(libc::ENOSPC)?,
			crate::alloc::alloc_block(image).ok_or(libc::ENOSPC)?,
		],
		iptr: 0,
		time: util::now_secs(),
	};
	inode::put(image, inum, &node);

	directory::put(image, parent, directory::basename_of(path), inum)?;
	Ok(inum)
}

/// Creates a directory at `path`.
pub fn mkdir(image: &mut Image, path: &str, mode: u32) -> Result<u32, i32> {
	mknod(image, path, mode | libc::S_IFDIR as u32)
}

/// Adds another name, `to`, referencing the same inode as `from`.
pub fn link(image: &mut Image, from: &str, to: &str) -> Result<(), i32> {
	let inum = directory::tree_lookup(image, from)?;
	let mut node = inode::get(image, inum);
	node.refs += 1;
	inode::put(image, inum, &node);

	let parent = directory::parent_inode_of(image, to)?;
	directory::put(image, parent, directory::basename_of(to), inum)
}

/// Removes the directory entry at `path` and drops a reference on its
/// inode, freeing it once the last reference is gone.
pub fn unlink(image: &mut Image, path: &str) -> Result<(), i32> {
	let inum = directory::tree_lookup(image, path)?;
	let parent = directory::parent_inode_of(image, path)?;
	inode::free_inode(image, inum);
	directory::delete(image, parent, directory::basename_of(path))
}

/// Removes an empty directory entry; identical to [`unlink`] at this layer
/// (emptiness is not enforced here, see `Non-goals`).
pub fn rmdir(image: &mut Image, path: &str) -> Result<(), i32> {
	unlink(image, path)
}

/// Moves the entry at `from` to `to`, without touching the inode's
/// reference count.
pub fn rename(image: &mut Image, from: &str, to: &str) -> Result<(), i32> {
	let inum = directory::tree_lookup(image, from)?;

	let to_parent = directory::parent_inode_of(image, to)?;
	directory::put(image, to_parent, directory::basename_of(to), inum)?;

	let from_parent = directory::parent_inode_of(image, from)?;
	directory::delete(image, from_parent, directory::basename_of(from))
}

/// Overwrites the mode word of the inode at `path`.
pub fn chmod(image: &mut Image, path: &str, mode: u32) -> Result<(), i32> {
	let inum = directory::tree_lookup(image, path)?;
	let mut node = inode::get(image, inum);
	node.mode = mode;
	inode::put(image, inum, &node);
	Ok(())
}

/// Overwrites the size field of the inode at `path`. No blocks are released
/// or zero-filled, regardless of whether `size` grows or shrinks the file.
pub fn truncate(image: &mut Image, path: &str, size: u32) -> Result<(), i32> {
	let inum = directory::tree_lookup(image, path)?;
	let mut node = inode::get(image, inum);
	node.size = size;
	inode::put(image, inum, &node);
	Ok(())
}

/// Always succeeds without side effects.
pub fn open(_image: &Image, _path: &str) -> Result<(), i32> {
	Ok(())
}

/// Reads up to `size` bytes starting at `offset` from the file at `path`.
/// The returned buffer is never longer than `size`.
pub fn read(image: &Image, path: &str, size: u32, offset: u32) -> Result<Vec<u8>, i32> {
	let inum = directory::tree_lookup(image, path)?;
	let node = inode::get(image, inum);

	if size == 0 {
		return Ok(Vec::new());
	}

	let block_size = BLOCK_SIZE as u32;
	let first_page = (offset / block_size) as usize;
	let rem = (offset % block_size) as usize;
	let npages = util::ceil_div(rem as u32 + size, block_size) as usize;

	let mut out = Vec::with_capacity(size as usize);
	for i in first_page..first_page + npages {
		let pnum = inode::page_to_block(image, &node, i);
		let block = image.block(pnum as usize);
		if i == first_page {
			out.extend_from_slice(&block[rem..]);
		} else {
			out.extend_from_slice(block);
		}
	}
	out.truncate(size as usize);
	Ok(out)
}

/// Writes `data` at `offset` into the file at `path`, growing it first if
/// necessary. Updates `size` and `time`.
pub fn write(image: &mut Image, path: &str, data: &[u8], offset: u32) -> Result<u32, i32> {
	let inum = directory::tree_lookup(image, path)?;
	let mut node = inode::get(image, inum);

	let size = data.len() as u32;
	inode::grow(image, &mut node, offset + size)?;

	if size > 0 {
		let block_size = BLOCK_SIZE as u32;
		let first_page = (offset / block_size) as usize;
		let rem = (offset % block_size) as usize;
		let npages = util::ceil_div(rem as u32 + size, block_size) as usize;

		let mut cursor = 0usize;
		for i in first_page..first_page + npages {
			let pnum = inode::page_to_block(image, &node, i);
			let block = image.block_mut(pnum as usize);
			let start = if i == first_page { rem } else { 0 };
			let len = (BLOCK_SIZE - start).min(data.len() - cursor);
			block[start..start + len].copy_from_slice(&data[cursor..cursor + len]);
			cursor += len;
		}
	}

	node.size = offset + size;
	node.time = util::now_secs();
	inode::put(image, inum, &node);
	Ok(size)
}

/// Sets the modification time of the inode at `path`.
pub fn utimens(image: &mut Image, path: &str, mtime: i64) -> Result<(), i32> {
	let inum = directory::tree_lookup(image, path)?;
	let mut node = inode::get(image, inum);
	node.time = mtime;
	inode::put(image, inum, &node);
	Ok(())
}

/// Creates a symlink at `link_path` whose content is `target`.
pub fn symlink(image: &mut Image, target: &str, link_path: &str) -> Result<u32, i32> {
	let inum = mknod(image, link_path, libc::S_IFLNK as u32 | 0o777)?;
	write(image, link_path, target.as_bytes(), 0)?;
	Ok(inum)
}

/// Reads the target of the symlink at `path`.
pub fn readlink(image: &Image, path: &str) -> Result<Vec<u8>, i32> {
	let inum = directory::tree_lookup(image, path)?;
	let node = inode::get(image, inum);
	read(image, path, node.size, 0)
}

/// No ioctl is implemented.
pub fn ioctl() -> Result<(), i32> {
	Err(libc::ENOSYS)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::image::temp_image;

	#[test]
	fn scenario_fresh_mount_readdir_root() {
		let (_dir, image) = temp_image();
		let names = readdir(&image, "/").unwrap();
		assert!(names.contains(&".".to_string()));
	}

	#[test]
	fn scenario_mknod_write_read_getattr() {
		let (_dir, mut image) = temp_image();
		mknod(&mut image, "/a", 0o100644).unwrap();
		write(&mut image, "/a", b"hello", 0).unwrap();

		assert_eq!(read(&image, "/a", 5, 0).unwrap(), b"hello");
		assert_eq!(getattr(&image, "/a").unwrap().size, 5);
	}

	#[test]
	fn scenario_hardlink_and_unlink() {
		let (_dir, mut image) = temp_image();
		mknod(&mut image, "/a", 0o100644).unwrap();
		link(&mut image, "/a", "/b").unwrap();

		assert_eq!(getattr(&image, "/a").unwrap().nlink, 2);
		assert_eq!(getattr(&image, "/b").unwrap().nlink, 2);

		write(&mut image, "/a", b"data", 0).unwrap();
		unlink(&mut image, "/a").unwrap();

		assert_eq!(getattr(&image, "/b").unwrap().nlink, 1);
		assert_eq!(read(&image, "/b", 4, 0).unwrap(), b"data");
		assert_eq!(access(&image, "/a").unwrap_err(), libc::ENOENT);
	}

	#[test]
	fn scenario_rename() {
		let (_dir, mut image) = temp_image();
		mknod(&mut image, "/a", 0o100644).unwrap();
		rename(&mut image, "/a", "/b").unwrap();

		assert_eq!(access(&image, "/a").unwrap_err(), libc::ENOENT);
		assert!(access(&image, "/b").is_ok());
	}

	#[test]
	fn scenario_symlink_readlink() {
		let (_dir, mut image) = temp_image();
		symlink(&mut image, "/target", "/l").unwrap();
		let buf = readlink(&image, "/l").unwrap();
		assert_eq!(&buf, b"/target");
	}

	#[test]
	fn scenario_truncate_updates_size() {
		let (_dir, mut image) = temp_image();
		mknod(&mut image, "/a", 0o100644).unwrap();
		truncate(&mut image, "/a", 42).unwrap();
		assert_eq!(getattr(&image, "/a").unwrap().size, 42);
	}

	#[test]
	fn read_across_a_page_boundary_returns_exactly_what_was_written() {
		let (_dir, mut image) = temp_image();
		mknod(&mut image, "/a", 0o100644).unwrap();

		let buf: Vec<u8> = (0..10).collect();
		write(&mut image, "/a", &buf, 4090).unwrap();

		let out = read(&image, "/a", 10, 4090).unwrap();
		assert_eq!(out, buf);
	}

	#[test]
	fn read_clips_to_requested_size() {
		let (_dir, mut image) = temp_image();
		mknod(&mut image, "/a", 0o100644).unwrap();
		write(&mut image, "/a", &[b'x'; 4096], 0).unwrap();

		let buf = read(&image, "/a", 10, 4000).unwrap();
		assert_eq!(buf.len(), 10);
		assert_eq!(buf, vec![b'x'; 10]);
	}

	#[test]
	fn write_across_two_direct_blocks() {
		let (_dir, mut image) = temp_image();
		mknod(&mut image, "/a", 0o100644).unwrap();

		let mut data = vec![0u8; BLOCK_SIZE + 100];
		for (i, b) in data.iter_mut().enumerate() {
			*b = (i % 251) as u8;
		}
		write(&mut image, "/a", &data, 0).unwrap();
		let out = read(&image, "/a", data.len() as u32, 0).unwrap();
		assert_eq!(out, data);
	}

	#[test]
	fn write_into_indirect_block() {
		let (_dir, mut image) = temp_image();
		mknod(&mut image, "/a", 0o100644).unwrap();

		let data = vec![7u8; BLOCK_SIZE * 3];
		write(&mut image, "/a", &data, 0).unwrap();
		let out = read(&image, "/a", data.len() as u32, 0).unwrap();
		assert_eq!(out, data);
	}

	#[test]
	fn allocator_exhaustion_surfaces_as_enospc() {
		let (_dir, mut image) = temp_image();
		let mut i = 0;
		loop {
			match mknod(&mut image, &format!("/f{i}"), 0o100644) {
				Ok(_) => i += 1,
				Err(e) => {
					assert_eq!(e, libc::ENOSPC);
					break;
				}
			}
			assert!(i < 300, "allocator should have exhausted by now");
		}
	}

	#[test]
	fn ioctl_is_not_implemented() {
		assert_eq!(ioctl().unwrap_err(), libc::ENOSYS);
	}
}
