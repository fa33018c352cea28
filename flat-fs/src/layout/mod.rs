//! # 磁盘数据结构层
//!
//! flat-fs 的磁盘布局：
//! 位图区域 | 数据区域
//!
//! 数据区域内 inode 块与文件数据块混居，根目录紧随位图之后；
//! 位图是块使用状态的唯一权威。

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{DiskInode, DiskInodeKind, BLOCKS_PER_INODE, ZERO_BLOCK};

/// 链接记录，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::{DirEntry, NAME_MAX_LEN};
