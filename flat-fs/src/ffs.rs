//! # 磁盘块管理器层
//!
//! 挂载会话：由设备容量推导出位图区域与数据区域的大小，
//! 首次挂载时格式化（创建根目录），并负责块的分配与回收。
//!
//! 位编号与物理块号的换算只发生在本层的
//! [`FlatFileSystem::alloc_block`] / [`FlatFileSystem::dealloc_block`]，
//! 其余代码一律使用物理块号。

use alloc::sync::Arc;

use spin::Mutex;

use crate::block_cache;
use crate::layout::{Bitmap, DiskInode, DiskInodeKind};
use crate::vfs::Inode;
use crate::BlockDevice;
use crate::DataBlock;
use crate::BLOCK_BITS;

pub struct FlatFileSystem {
    block_device: Arc<dyn BlockDevice>,
    bitmap: Bitmap,
    /// 位图区域占用块数，也是数据区域的起始块号
    bitmap_blocks: u32,
    /// 根目录的 inode 块号：数据区域的第一块
    root_inode_id: u32,
}

impl FlatFileSystem {
    /// 挂载设备，返回会话对象。
    ///
    /// 位图0号位未置位说明存储从未用过，此时执行一次性格式化；
    /// 对已格式化的存储幂等。
    pub fn mount(block_device: Arc<dyn BlockDevice>) -> Arc<Mutex<Self>> {
        let total_blocks = block_device.block_count();
        let bitmap_blocks = total_blocks.div_ceil(BLOCK_BITS);
        assert!(
            total_blocks > bitmap_blocks,
            "store too small to hold any data block"
        );
        let data_blocks = total_blocks - bitmap_blocks;

        let mut fs = Self {
            bitmap: Bitmap::new(bitmap_blocks, data_blocks),
            bitmap_blocks: bitmap_blocks as u32,
            root_inode_id: bitmap_blocks as u32,
            block_device,
        };

        if !fs.bitmap.is_used(&fs.block_device, 0) {
            fs.format();
        }

        Arc::new(Mutex::new(fs))
    }

    /// 一次性格式化：把根目录安置在紧随位图之后的第一块
    fn format(&mut self) {
        log::info!("fresh store, formatting");

        let root = self
            .alloc_block()
            .expect("store exhausted before formatting");
        assert_eq!(root, self.root_inode_id);

        block_cache::get(root as usize, self.block_device.clone())
            .lock()
            .map_mut(0, |disk_inode: &mut DiskInode| {
                disk_inode.init(DiskInodeKind::Directory)
            });
        block_cache::sync_all();
    }

    /// 在数据区域分配新的块并返回其物理块号；空间用尽则返回空。
    /// 耗尽不是错误，而是调用方必须检查的一等结果
    pub fn alloc_block(&mut self) -> Option<u32> {
        let bit = self.bitmap.alloc(&self.block_device)?;
        Some(self.bitmap_blocks + bit)
    }

    /// 回收一个物理块，顺带清零：
    /// 循环使用的块不能把旧数据漏进空洞读取路径
    pub fn dealloc_block(&mut self, block_id: u32) {
        assert!(block_id >= self.bitmap_blocks);
        block_cache::get(block_id as usize, self.block_device.clone())
            .lock()
            .map_mut(0, |data_block: &mut DataBlock| data_block.fill(0));
        self.bitmap
            .dealloc(&self.block_device, block_id - self.bitmap_blocks);
    }

    pub fn root_inode(fs: &Arc<Mutex<Self>>) -> Inode {
        let (root, block_device) = {
            let fs = fs.lock();
            (fs.root_inode_id, fs.block_device.clone())
        };
        Inode::new(root, fs.clone(), block_device)
    }
}

impl Drop for FlatFileSystem {
    fn drop(&mut self) {
        // 会话结束即卸载：缓存写回并逐出，设备随之关闭
        block_cache::flush(&self.block_device);
    }
}
