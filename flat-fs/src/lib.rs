#![no_std]

extern crate alloc;

/* flat-fs 的整体架构，自上而下 */

// 索引节点层：文件句柄、字节读写与命名空间操作
mod vfs;
pub use vfs::Inode;
pub use vfs::{Stat, StatKind};

// 磁盘块管理器层：挂载会话、首次格式化与块分配
mod ffs;
pub use ffs::FlatFileSystem;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;
pub use layout::{DirEntry, DiskInode, DiskInodeKind};
pub use layout::{BLOCKS_PER_INODE, NAME_MAX_LEN, ZERO_BLOCK};

// 错误分类：引擎操作的可恢复失败结果
mod error;
pub use error::FsError;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

// 磁盘块设备接口层：读写磁盘块设备的接口
mod block_dev;
pub use block_dev::BlockDevice;

pub const BLOCK_SIZE: usize = 512;
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;
/// 解析符号链接时允许的最大跳数，用于拒绝环状引用
pub const MAX_SYMLINK_HOPS: usize = 10;

type DataBlock = [u8; BLOCK_SIZE];
