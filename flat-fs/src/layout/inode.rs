//! inode（描述符）恰好占据一整块，所在块号就是对象的唯一编号。
//!
//! 目录的空间用于存放子项的链接记录；
//! 常规文件的空间用于存放它的数据；
//! 符号链接的空间用于存放目标路径的字面文本。
//!
//! 只有直接索引：`blocks` 的槽位按序对应文件的每一个
//! [`BLOCK_SIZE`] 字节片段，文件大小因此有硬上限。

use alloc::sync::Arc;

use crate::block_cache;
use crate::BlockDevice;
use crate::DataBlock;
use crate::BLOCK_SIZE;

/// 直接索引槽位数量：与头部三个字段合计恰好填满一块
pub const BLOCKS_PER_INODE: usize = BLOCK_SIZE / 4 - 3;

/// 空洞标记：槽位逻辑上全零，真实块推迟到首次写入才分配。
/// 0号块恒为位图块，不可能是数据块，可作哨兵
pub const ZERO_BLOCK: u32 = 0;

#[repr(C)]
#[derive(Debug, Clone)]
pub struct DiskInode {
    /// 类型
    pub kind: DiskInodeKind,
    /// 硬链接个数
    pub links: u32,
    // 不用usize是为了严控布局
    pub size: u32,
    /// 直接索引槽位；`count_data_block(size)` 之内的才算数，
    /// 其余内容未定义
    pub blocks: [u32; BLOCKS_PER_INODE],
}

#[repr(u32)]
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum DiskInodeKind {
    #[default]
    Regular = 0,
    Directory = 1,
    Symlink = 2,
}

impl DiskInode {
    pub fn init(&mut self, kind: DiskInodeKind) {
        self.kind = kind;
        self.links = 1;
        self.size = 0;
        self.blocks = [ZERO_BLOCK; BLOCKS_PER_INODE];
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == DiskInodeKind::Directory
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.kind == DiskInodeKind::Symlink
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`；
    /// 请求的范围必须落在当前大小之内
    pub fn read_at(
        &self,
        offset: usize,
        buf: &mut [u8],
        block_device: &Arc<dyn BlockDevice>,
    ) -> usize {
        let mut start = offset;
        let end = start + buf.len();
        assert!(end <= self.size as usize, "read out of range");

        // 已读取多少字节
        let mut read_size = 0;
        while start < end {
            // 当前块的逻辑索引与块内截取范围
            let block_index = start / BLOCK_SIZE;
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;
            let dest = &mut buf[read_size..read_size + block_read_size];

            if self.blocks[block_index] == ZERO_BLOCK {
                // 空洞槽位不触碰设备，直接按全零处理
                dest.fill(0);
            } else {
                block_cache::get(self.blocks[block_index] as usize, block_device.clone())
                    .lock()
                    .map(0, |data_block: &DataBlock| {
                        // 绝对地址 % 块大小 = 块内偏移
                        let src =
                            &data_block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_read_size];
                        dest.copy_from_slice(src);
                    });
            }

            read_size += block_read_size;
            start = current_block_end;
        }

        read_size
    }

    /// 计算容纳指定数据量需要多少个数据块
    #[inline]
    pub fn count_data_block(size: u32) -> usize {
        (size as usize).div_ceil(BLOCK_SIZE)
    }
}
