use alloc::sync::Arc;

use crate::block_cache;
use crate::BlockDevice;
use crate::BLOCK_BITS;

/// 位图区域内块的结构
type BitmapBlock = [u64; BLOCK_BITS / 64];

/// 位图区域，从0号块开始，记录数据区域内每一块的分配情况。
/// 位编号是数据区域的相对编号：0号位即数据区域的第一块
#[derive(Debug)]
pub struct Bitmap {
    /// 位图占用块数
    blocks: usize,
    /// 数据区域总块数，也是位编号的上界；
    /// 位图末尾的部分字节可能描述并不存在的块
    data_blocks: usize,
}

/// 位编号
struct BitId(u32);

impl Bitmap {
    #[inline]
    pub fn new(blocks: usize, data_blocks: usize) -> Self {
        Self {
            blocks,
            data_blocks,
        }
    }

    /// 在数据区域内分配新的块，返回其位编号。
    /// 空间用尽，或首个空位落在数据区域之外，都返回空。
    pub fn alloc(&self, block_device: &Arc<dyn BlockDevice>) -> Option<u32> {
        // 遍历位图区域内所有的块，寻找块内还有剩余空间的bit组(即还有0)
        for block_index in 0..self.blocks {
            let cache = block_cache::get(block_index, block_device.clone());
            let mut cache = cache.lock();
            let bitmap_block: &mut BitmapBlock = cache.get_mut(0);

            let Some((group_index, ingroup_index)) =
                bitmap_block
                    .iter()
                    .enumerate()
                    .find_map(|(group_index, &bits)| {
                        (bits != u64::MAX).then_some((group_index, bits.trailing_ones()))
                    })
            else {
                continue;
            };

            let bit = BitId::encode(block_index, group_index, ingroup_index as usize);
            // 首个空位之后全是空位：越界即宣告耗尽
            if bit as usize >= self.data_blocks {
                return None;
            }

            // 追加新位
            bitmap_block[group_index] |= 1 << ingroup_index;
            return Some(bit);
        }

        None
    }

    pub fn dealloc(&self, block_device: &Arc<dyn BlockDevice>, bit: u32) {
        let (block_index, group_index, ingroup_index) = BitId(bit).decode();
        let cache = block_cache::get(block_index, block_device.clone());
        let mut cache = cache.lock();
        let bitmap_block: &mut BitmapBlock = cache.get_mut(0);

        // 编号一定得有对应的位
        assert_ne!(bitmap_block[group_index] & (1 << ingroup_index), 0);

        bitmap_block[group_index] -= 1 << ingroup_index;
    }

    /// 点查询：指定位是否已分配。
    /// 挂载时以0号位判断存储是否已格式化
    pub fn is_used(&self, block_device: &Arc<dyn BlockDevice>, bit: u32) -> bool {
        let (block_index, group_index, ingroup_index) = BitId(bit).decode();
        block_cache::get(block_index, block_device.clone())
            .lock()
            .map(0, |bitmap_block: &BitmapBlock| {
                bitmap_block[group_index] & (1 << ingroup_index) != 0
            })
    }
}

impl BitId {
    /// 线性映射编码得到位编号
    #[inline]
    fn encode(block_index: usize, group_index: usize, ingroup_index: usize) -> u32 {
        (block_index * BLOCK_BITS + group_index * 64 + ingroup_index) as u32
    }

    fn decode(self) -> (usize, usize, usize) {
        let mut bit = self.0 as usize;

        let block_index = bit / BLOCK_BITS;
        bit %= BLOCK_BITS;
        (block_index, bit / 64, bit % 64)
    }
}
