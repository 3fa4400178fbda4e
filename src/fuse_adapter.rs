//! Bridges the path-based core (`ops`) to `fuser`'s inode-numbered
//! low-level `Filesystem` trait.
//!
//! `fuser` addresses everything by a 64-bit inode number it hands out and
//! expects back; our core addresses everything by path. This module is the
//! only place the two numbering schemes meet: it keeps a cache from FUSE
//! inode number to absolute path and translates each call in both
//! directions. It has no filesystem semantics of its own.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use fuser::FileAttr;
use fuser::FileType;
use fuser::Filesystem;
use fuser::ReplyAttr;
use fuser::ReplyData;
use fuser::ReplyDirectory;
use fuser::ReplyEmpty;
use fuser::ReplyEntry;
use fuser::ReplyOpen;
use fuser::ReplyWrite;
use fuser::Request;

use crate::image::Image;
use crate::ops;
use crate::ops::Attr;

const TTL: Duration = Duration::from_secs(1);
/// FUSE reserves inode 1 for the mount root.
const FUSE_ROOT_INO: u64 = 1;

/// Adapts a path-addressed [`Image`] to `fuser`'s inode-addressed protocol.
pub struct FuseAdapter {
	image: Image,
	paths: HashMap<u64, String>,
}

impl FuseAdapter {
	pub fn new(image: Image) -> Self {
		let mut paths = HashMap::new();
		paths.insert(FUSE_ROOT_INO, "/".to_string());
		Self { image, paths }
	}

	fn path_of(&self, ino: u64) -> Option<&str> {
		self.paths.get(&ino).map(String::as_str)
	}

	fn remember(&mut self, path: String) -> u64 {
		let ino = fuse_ino(&self.image, &path);
		self.paths.insert(ino, path);
		ino
	}

	fn child_path(parent: &str, name: &OsStr) -> String {
		let name = name.to_string_lossy();
		if parent == "/" {
			format!("/{name}")
		} else {
			format!("{parent}/{name}")
		}
	}
}

/// Derives a FUSE inode number from a core inode number. Core inode 0 (the
/// root) must not collide with `FUSE_ROOT_INO`, so every core inode is
/// shifted up by one.
fn fuse_ino(image: &Image, path: &str) -> u64 {
	match crate::directory::tree_lookup(image, path) {
		Ok(inum) => inum as u64 + 1,
		Err(_) => 0,
	}
}

fn attr_to_fileattr(ino: u64, attr: Attr) -> FileAttr {
	let kind = if attr.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32 {
		FileType::Directory
	} else if attr.mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32 {
		FileType::Symlink
	} else {
		FileType::RegularFile
	};
	let mtime = UNIX_EPOCH + Duration::from_secs(attr.mtime.max(0) as u64);

	FileAttr {
		ino,
		size: attr.size as u64,
		blocks: 1,
		atime: mtime,
		mtime,
		ctime: mtime,
		crtime: mtime,
		kind,
		perm: (attr.mode & 0o7777) as u16,
		nlink: attr.nlink,
		uid: 0,
		gid: 0,
		rdev: 0,
		blksize: crate::image::BLOCK_SIZE as u32,
		flags: 0,
	}
}

impl Filesystem for FuseAdapter {
	fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(libc::ENOENT);
			return;
		};
		let path = Self::child_path(parent_path, name);

		match ops::getattr(&self.image, &path) {
			Ok(attr) => {
				let ino = self.remember(path);
				reply.entry(&TTL, &attr_to_fileattr(ino, attr), 0);
			}
			Err(e) => reply.error(e),
		}
	}

	fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
		let Some(path) = self.path_of(ino).map(str::to_owned) else {
			reply.error(libc::ENOENT);
			return;
		};
		match ops::getattr(&self.image, &path) {
			Ok(attr) => reply.attr(&TTL, &attr_to_fileattr(ino, attr)),
			Err(e) => reply.error(e),
		}
	}

	fn setattr(
		&mut self,
		_req: &Request,
		ino: u64,
		mode: Option<u32>,
		_uid: Option<u32>,
		_gid: Option<u32>,
		size: Option<u64>,
		_atime: Option<fuser::TimeOrNow>,
		mtime: Option<fuser::TimeOrNow>,
		_fh: Option<u64>,
		_crtime: Option<SystemTime>,
		_chgtime: Option<SystemTime>,
		_bkuptime: Option<SystemTime>,
		_flags: Option<u32>,
		reply: ReplyAttr,
	) {
		let Some(path) = self.path_of(ino).map(str::to_owned) else {
			reply.error(libc::ENOENT);
			return;
		};

		if let Some(mode) = mode {
			if let Err(e) = ops::chmod(&mut self.image, &path, mode) {
				reply.error(e);
				return;
			}
		}
		if let Some(size) = size {
			if let Err(e) = ops::truncate(&mut self.image, &path, size as u32) {
				reply.error(e);
				return;
			}
		}
		if let Some(mtime) = mtime {
			let secs = match mtime {
				fuser::TimeOrNow::SpecificTime(t) => {
					t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
				}
				fuser::TimeOrNow::Now => crate::util::now_secs(),
			};
			if let Err(e) = ops::utimens(&mut self.image, &path, secs) {
				reply.error(e);
				return;
			}
		}

		match ops::getattr(&self.image, &path) {
			Ok(attr) => reply.attr(&TTL, &attr_to_fileattr(ino, attr)),
			Err(e) => reply.error(e),
		}
	}

	fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
		let Some(path) = self.path_of(ino).map(str::to_owned) else {
			reply.error(libc::ENOENT);
			return;
		};
		let names = match ops::readdir(&self.image, &path) {
			Ok(n) => n,
			Err(e) => {
				reply.error(e);
				return;
			}
		};

		for (i, name) in names.into_iter().enumerate().skip(offset as usize) {
			let child = Self::child_path(&path, OsStr::new(&name));
			let child_ino = fuse_ino(&self.image, &child);
			if reply.add(child_ino, (i + 1) as i64, FileType::RegularFile, &name) {
				break;
			}
		}
		reply.ok();
	}

	fn mknod(
		&mut self,
		_req: &Request,
		parent: u64,
		name: &OsStr,
		mode: u32,
		_umask: u32,
		_rdev: u32,
		reply: ReplyEntry,
	) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(libc::ENOENT);
			return;
		};
		let path = Self::child_path(parent_path, name);

		match ops::mknod(&mut self.image, &path, mode) {
			Ok(_) => {
				let attr = ops::getattr(&self.image, &path).expect("just created");
				let ino = self.remember(path);
				reply.entry(&TTL, &attr_to_fileattr(ino, attr), 0);
			}
			Err(e) => reply.error(e),
		}
	}

	fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(libc::ENOENT);
			return;
		};
		let path = Self::child_path(parent_path, name);

		match ops::mkdir(&mut self.image, &path, mode) {
			Ok(_) => {
				let attr = ops::getattr(&self.image, &path).expect("just created");
				let ino = self.remember(path);
				reply.entry(&TTL, &attr_to_fileattr(ino, attr), 0);
			}
			Err(e) => reply.error(e),
		}
	}

	fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(libc::ENOENT);
			return;
		};
		let path = Self::child_path(parent_path, name);
		match ops::unlink(&mut self.image, &path) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e),
		}
	}

	fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(libc::ENOENT);
			return;
		};
		let path = Self::child_path(parent_path, name);
		match ops::rmdir(&mut self.image, &path) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e),
		}
	}

	fn link(&mut self, _req: &Request, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
		let (Some(from), Some(to_parent)) = (self.path_of(ino).map(str::to_owned), self.path_of(newparent)) else {
			reply.error(libc::ENOENT);
			return;
		};
		let to = Self::child_path(to_parent, newname);

		match ops::link(&mut self.image, &from, &to) {
			Ok(()) => {
				let attr = ops::getattr(&self.image, &to).expect("just linked");
				let ino = self.remember(to);
				reply.entry(&TTL, &attr_to_fileattr(ino, attr), 0);
			}
			Err(e) => reply.error(e),
		}
	}

	fn rename(
		&mut self,
		_req: &Request,
		parent: u64,
		name: &OsStr,
		newparent: u64,
		newname: &OsStr,
		_flags: u32,
		reply: ReplyEmpty,
	) {
		let (Some(from_parent), Some(to_parent)) = (self.path_of(parent), self.path_of(newparent)) else {
			reply.error(libc::ENOENT);
			return;
		};
		let from = Self::child_path(from_parent, name);
		let to = Self::child_path(to_parent, newname);

		match ops::rename(&mut self.image, &from, &to) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e),
		}
	}

	fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
		let Some(path) = self.path_of(ino).map(str::to_owned) else {
			reply.error(libc::ENOENT);
			return;
		};
		match ops::open(&self.image, &path) {
			Ok(()) => reply.opened(0, 0),
			Err(e) => reply.error(e),
		}
	}

	fn read(
		&mut self,
		_req: &Request,
		ino: u64,
		_fh: u64,
		offset: i64,
		size: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyData,
	) {
		let Some(path) = self.path_of(ino).map(str::to_owned) else {
			reply.error(libc::ENOENT);
			return;
		};
		match ops::read(&self.image, &path, size, offset as u32) {
			Ok(data) => reply.data(&data),
			Err(e) => reply.error(e),
		}
	}

	fn write(
		&mut self,
		_req: &Request,
		ino: u64,
		_fh: u64,
		offset: i64,
		data: &[u8],
		_write_flags: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyWrite,
	) {
		let Some(path) = self.path_of(ino).map(str::to_owned) else {
			reply.error(libc::ENOENT);
			return;
		};
		match ops::write(&mut self.image, &path, data, offset as u32) {
			Ok(written) => reply.written(written),
			Err(e) => reply.error(e),
		}
	}

	fn symlink(
		&mut self,
		_req: &Request,
		parent: u64,
		link_name: &OsStr,
		target: &std::path::Path,
		reply: ReplyEntry,
	) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(libc::ENOENT);
			return;
		};
		let path = Self::child_path(parent_path, link_name);
		let target = target.to_string_lossy();

		match ops::symlink(&mut self.image, &target, &path) {
			Ok(_) => {
				let attr = ops::getattr(&self.image, &path).expect("just created");
				let ino = self.remember(path);
				reply.entry(&TTL, &attr_to_fileattr(ino, attr), 0);
			}
			Err(e) => reply.error(e),
		}
	}

	fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
		let Some(path) = self.path_of(ino).map(str::to_owned) else {
			reply.error(libc::ENOENT);
			return;
		};
		match ops::readlink(&self.image, &path) {
			Ok(data) => reply.data(&data),
			Err(e) => reply.error(e),
		}
	}

	fn access(&mut self, _req: &Request, ino: u64, _mask: i32, reply: ReplyEmpty) {
		let Some(path) = self.path_of(ino).map(str::to_owned) else {
			reply.error(libc::ENOENT);
			return;
		};
		match ops::access(&self.image, &path) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e),
		}
	}
}
