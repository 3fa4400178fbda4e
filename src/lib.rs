//! Core of a user-space, block-backed filesystem image: bitmap-tracked
//! block and inode allocation, a fixed-layout inode table, fixed-slot
//! directories, and path resolution over them. The FUSE bridge in
//! `fuse_adapter` is the only consumer that deals with inode numbers as
//! FUSE understands them; everything in this crate's core addresses
//! objects by path.

pub mod alloc;
pub mod bitmap;
pub mod directory;
pub mod fuse_adapter;
pub mod image;
pub mod inode;
pub mod ops;
pub mod path;
pub mod util;
