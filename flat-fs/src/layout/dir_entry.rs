use core::{ptr, slice};

pub const NAME_MAX_LEN: usize = 15;

/// 链接记录：子 inode 的块号 + 文件名。
/// 目录的内容就是一串密排的链接记录，顺序无意义
#[repr(C)]
#[derive(Debug, Default, Clone)]
pub struct DirEntry {
    inode_id: u32,
    // 最后一字节留给 \0
    name: [u8; NAME_MAX_LEN + 1],
}

impl DirEntry {
    /// 链接记录大小恒为20字节
    pub const SIZE: usize = 20;

    /// 调用方保证名字不超过 [`NAME_MAX_LEN`] 字节
    #[inline]
    pub fn new(name: &str, inode_id: u32) -> Self {
        let bytes = name.as_bytes();
        let mut name = [0; NAME_MAX_LEN + 1];
        name[..bytes.len()].copy_from_slice(bytes);

        Self { inode_id, name }
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap();
        core::str::from_utf8(&self.name[..len]).unwrap()
    }

    #[inline]
    pub fn inode_id(&self) -> u32 {
        self.inode_id
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}
