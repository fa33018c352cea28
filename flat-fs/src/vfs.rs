//! # 索引节点层
//!
//! 位于内存的虚拟文件系统，确立了文件系统的操作逻辑。
//! [`Inode`] 是无状态的文件句柄：只记住块号，
//! 每次操作都重新从存储读取描述符，用完即弃。
//!
//! 命名空间操作（路径解析、创建、链接、摘除）同样经由句柄完成，
//! 从句柄所指的目录出发逐段行走；命令行外壳把它们统一施加在根目录上。
//!
//! 描述符的修改一律走 读出副本 → 修改 → 显式落盘，
//! 绝不依赖缓存内的别名副作用。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use enumflags2::bitflags;
use spin::Mutex;

use crate::block_cache;
use crate::error::FsError;
use crate::layout::{DirEntry, DiskInode, DiskInodeKind};
use crate::layout::{BLOCKS_PER_INODE, NAME_MAX_LEN, ZERO_BLOCK};
use crate::BlockDevice;
use crate::DataBlock;
use crate::FlatFileSystem;
use crate::BLOCK_SIZE;
use crate::MAX_SYMLINK_HOPS;

pub struct Inode {
    /// inode所在块，同时就是对象的编号
    inode_id: u32,
    fs: Arc<Mutex<FlatFileSystem>>,
    block_device: Arc<dyn BlockDevice>,
}

/// 一份描述符的人类可读快照
#[derive(Debug)]
pub struct Stat {
    pub inode: u32,
    pub kind: StatKind,
    pub links: u32,
    pub size: u32,
    /// 实际占用的数据块（不含空洞槽位）
    pub blocks: Vec<u32>,
    /// 符号链接的目标路径文本
    pub target: Option<String>,
}

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    #[default]
    FILE = 0o100000,
    SYMLINK = 0o020000,
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("inode_id", &self.inode_id)
            .finish_non_exhaustive()
    }
}

impl Inode {
    #[inline]
    pub fn new(
        inode_id: u32,
        fs: Arc<Mutex<FlatFileSystem>>,
        block_device: Arc<dyn BlockDevice>,
    ) -> Self {
        Self {
            inode_id,
            fs,
            block_device,
        }
    }

    #[inline]
    pub fn inode_id(&self) -> u32 {
        self.inode_id
    }

    pub fn kind(&self) -> DiskInodeKind {
        let _fs = self.fs.lock();
        self.on_disk(|disk_inode| disk_inode.kind)
    }

    pub fn size(&self) -> u32 {
        let _fs = self.fs.lock();
        self.on_disk(|disk_inode| disk_inode.size)
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let _fs = self.fs.lock();
        self.on_disk(|disk_inode| disk_inode.read_at(offset, buf, &self.block_device))
    }

    /// 读出整个文件内容
    pub fn read_all(&self) -> Vec<u8> {
        let _fs = self.fs.lock();
        let disk_inode = self.disk_inode();
        let mut buf = vec![0; disk_inode.size as usize];
        disk_inode.read_at(0, &mut buf, &self.block_device);
        buf
    }

    /// 写入的范围必须落在当前大小之内：扩张先走 [`Inode::truncate`]。
    /// 空洞槽位在这里按需换成真实块；空间耗尽时大小停在已写完的前缀
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<(), FsError> {
        let mut fs = self.fs.lock();
        let res = self.write_locked(&mut fs, self.inode_id, offset, buf);
        block_cache::sync_all();
        res
    }

    pub fn truncate(&self, new_size: u32) -> Result<(), FsError> {
        let mut fs = self.fs.lock();
        let res = self.truncate_locked(&mut fs, self.inode_id, new_size);
        block_cache::sync_all();
        res
    }

    pub fn stat(&self) -> Stat {
        let _fs = self.fs.lock();
        let disk_inode = self.disk_inode();

        let blocks = disk_inode.blocks[..DiskInode::count_data_block(disk_inode.size)]
            .iter()
            .copied()
            .filter(|&block| block != ZERO_BLOCK)
            .collect();
        let target = disk_inode
            .is_symlink()
            .then(|| self.read_link(&disk_inode).unwrap_or_default());

        Stat {
            inode: self.inode_id,
            kind: disk_inode.kind.into(),
            links: disk_inode.links,
            size: disk_inode.size,
            blocks,
            target,
        }
    }

    /// 解析路径并穿过末端的符号链接，得到文件句柄
    pub fn open(&self, path: &str) -> Result<Inode, FsError> {
        let _fs = self.fs.lock();
        let inode_id = self.resolve(path).ok_or(FsError::NotFound)?;
        let mut hops = MAX_SYMLINK_HOPS;
        let inode_id = self.follow_symlinks(inode_id, &mut hops)?;
        Ok(self.inode(inode_id))
    }

    /// 与 [`Inode::open`] 相同，但末端的符号链接保持原样，
    /// 查看链接本身的元信息时用
    pub fn open_no_follow(&self, path: &str) -> Result<Inode, FsError> {
        let _fs = self.fs.lock();
        let inode_id = self.resolve(path).ok_or(FsError::NotFound)?;
        Ok(self.inode(inode_id))
    }

    /// 路径能否解析出对象（不跟随末端符号链接）
    pub fn exists(&self, path: &str) -> bool {
        let _fs = self.fs.lock();
        self.resolve(path).is_some()
    }

    /// 罗列目录内容：按存储顺序给出文件名，一行一个
    pub fn list(&self, path: &str) -> Result<String, FsError> {
        let _fs = self.fs.lock();
        let inode_id = self.resolve(path).ok_or(FsError::NotFound)?;
        let mut hops = MAX_SYMLINK_HOPS;
        let inode_id = self.follow_symlinks(inode_id, &mut hops)?;

        let disk_inode = self.read_inode(inode_id);
        if !disk_inode.is_dir() {
            return Err(FsError::NotFound);
        }

        let mut out = String::new();
        let mut dir_entry = DirEntry::default();
        for offset in (0..disk_inode.size as usize).step_by(DirEntry::SIZE) {
            assert_eq!(
                disk_inode.read_at(offset, dir_entry.as_bytes_mut(), &self.block_device),
                DirEntry::SIZE
            );
            out.push_str(dir_entry.name());
            out.push('\n');
        }
        Ok(out)
    }

    /// 在路径处创建新对象，返回其句柄
    pub fn create(&self, path: &str, kind: DiskInodeKind) -> Result<Inode, FsError> {
        let mut fs = self.fs.lock();

        if self.resolve(path).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let (dir_path, name) = split_path(path);
        if name.is_empty() {
            return Err(FsError::NotFound);
        }
        if name.len() > NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        let dir_id = self.locate_dir(dir_path)?;

        let inode_id = fs.alloc_block().ok_or(FsError::NoSpace)?;
        block_cache::get(inode_id as usize, self.block_device.clone())
            .lock()
            .map_mut(0, |disk_inode: &mut DiskInode| disk_inode.init(kind));

        // 父目录增长一条链接记录；失败就收回刚分配的块
        if let Err(e) = self.append_entry(&mut fs, dir_id, &DirEntry::new(name, inode_id)) {
            fs.dealloc_block(inode_id);
            return Err(e);
        }

        block_cache::sync_all();
        Ok(self.inode(inode_id))
    }

    /// 给已有对象追加一个硬链接
    pub fn link(&self, target: &str, new_path: &str) -> Result<(), FsError> {
        let mut fs = self.fs.lock();

        let target_id = self.resolve(target).ok_or(FsError::NotFound)?;
        if self.resolve(new_path).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let (dir_path, name) = split_path(new_path);
        if name.is_empty() {
            return Err(FsError::NotFound);
        }
        if name.len() > NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        let dir_id = self.locate_dir(dir_path)?;

        self.append_entry(&mut fs, dir_id, &DirEntry::new(name, target_id))?;

        let mut target_inode = self.read_inode(target_id);
        target_inode.links += 1;
        self.persist_inode(target_id, &target_inode);

        block_cache::sync_all();
        Ok(())
    }

    /// 摘除一个硬链接；最后一个引用消失时回收对象的全部块
    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        let mut fs = self.fs.lock();

        let (dir_path, name) = split_path(path);
        let dir_id = self.locate_dir(dir_path)?;
        let dir_inode = self.read_inode(dir_id);
        let (slot, entry) = self
            .find_entry(&dir_inode, name)
            .ok_or(FsError::NotFound)?;

        let target_id = entry.inode_id();
        let mut target_inode = self.read_inode(target_id);
        if target_inode.links == 1 {
            // 回收全部真实数据块与 inode 块本身
            for index in 0..DiskInode::count_data_block(target_inode.size) {
                if target_inode.blocks[index] != ZERO_BLOCK {
                    fs.dealloc_block(target_inode.blocks[index]);
                }
            }
            fs.dealloc_block(target_id);
        } else {
            target_inode.links -= 1;
            self.persist_inode(target_id, &target_inode);
        }

        // 末尾记录换进被摘除的槽位，目录缩短一条记录（顺序不保持）
        let old_size = dir_inode.size as usize;
        let mut last = DirEntry::default();
        assert_eq!(
            dir_inode.read_at(old_size - DirEntry::SIZE, last.as_bytes_mut(), &self.block_device),
            DirEntry::SIZE
        );
        self.write_locked(&mut fs, dir_id, slot, last.as_bytes())?;
        self.truncate_locked(&mut fs, dir_id, (old_size - DirEntry::SIZE) as u32)?;

        block_cache::sync_all();
        Ok(())
    }

    /// 创建符号链接：内容就是目标路径的字面文本，创建时不解析
    pub fn symlink(&self, target: &str, path: &str) -> Result<(), FsError> {
        let inode = self.create(path, DiskInodeKind::Symlink)?;
        inode.truncate(target.len() as u32)?;
        inode.write_at(0, target.as_bytes())?;
        Ok(())
    }
}

impl Inode {
    /// 读取对磁盘的映射并处理
    fn on_disk<V>(&self, f: impl FnOnce(&DiskInode) -> V) -> V {
        block_cache::get(self.inode_id as usize, self.block_device.clone())
            .lock()
            .map(0, f)
    }

    #[inline]
    fn disk_inode(&self) -> DiskInode {
        self.on_disk(DiskInode::clone)
    }

    /// 读出任意编号的描述符副本
    fn read_inode(&self, inode_id: u32) -> DiskInode {
        block_cache::get(inode_id as usize, self.block_device.clone())
            .lock()
            .map(0, DiskInode::clone)
    }

    /// 把修改过的描述符副本显式落盘
    fn persist_inode(&self, inode_id: u32, disk_inode: &DiskInode) {
        block_cache::get(inode_id as usize, self.block_device.clone())
            .lock()
            .map_mut(0, |on_disk: &mut DiskInode| *on_disk = disk_inode.clone());
    }

    /// 凭借编号获取句柄
    #[inline]
    fn inode(&self, inode_id: u32) -> Inode {
        Inode::new(inode_id, self.fs.clone(), self.block_device.clone())
    }

    /// 逐段解析路径，返回对象编号；不跟随末端符号链接。
    /// 空段与`.`跳过；绝对路径与相对路径都从本句柄出发
    fn resolve(&self, path: &str) -> Option<u32> {
        let mut hops = MAX_SYMLINK_HOPS;
        self.resolve_budgeted(path, &mut hops)
    }

    fn resolve_budgeted(&self, path: &str, hops: &mut usize) -> Option<u32> {
        let mut inode_id = self.inode_id;
        let mut segments = path
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .peekable();

        while let Some(segment) = segments.next() {
            let disk_inode = self.read_inode(inode_id);
            if !disk_inode.is_dir() {
                return None;
            }
            inode_id = self.find_entry(&disk_inode, segment)?.1.inode_id();
            // 中间段要先穿过符号链接才能继续往下走
            if segments.peek().is_some() {
                inode_id = self.follow_symlinks(inode_id, hops).ok()?;
            }
        }

        Some(inode_id)
    }

    /// 迭代地跟随符号链接链。跳数预算在整个解析过程内共享，
    /// 预算耗尽（环状引用）与目标无法解析都算链接损坏
    fn follow_symlinks(&self, inode_id: u32, hops: &mut usize) -> Result<u32, FsError> {
        let mut inode_id = inode_id;
        loop {
            let disk_inode = self.read_inode(inode_id);
            if !disk_inode.is_symlink() {
                return Ok(inode_id);
            }
            if *hops == 0 {
                log::error!("symlink chain too deep, giving up");
                return Err(FsError::BrokenSymlink);
            }
            *hops -= 1;

            let target = self.read_link(&disk_inode).ok_or(FsError::BrokenSymlink)?;
            inode_id = self
                .resolve_budgeted(&target, hops)
                .ok_or(FsError::BrokenSymlink)?;
        }
    }

    /// 符号链接的内容就是目标路径文本
    fn read_link(&self, disk_inode: &DiskInode) -> Option<String> {
        let mut buf = vec![0; disk_inode.size as usize];
        disk_inode.read_at(0, &mut buf, &self.block_device);
        String::from_utf8(buf).ok()
    }

    /// 解析父目录路径；目标必须（穿过符号链接后）是目录
    fn locate_dir(&self, dir_path: &str) -> Result<u32, FsError> {
        let inode_id = self.resolve(dir_path).ok_or(FsError::NotFound)?;
        let mut hops = MAX_SYMLINK_HOPS;
        let inode_id = self.follow_symlinks(inode_id, &mut hops)?;
        if !self.read_inode(inode_id).is_dir() {
            return Err(FsError::NotFound);
        }
        Ok(inode_id)
    }

    /// 线性扫描目录的链接记录，返回命中记录的字节偏移与内容
    fn find_entry(&self, dir_inode: &DiskInode, name: &str) -> Option<(usize, DirEntry)> {
        assert!(dir_inode.is_dir());
        let mut dir_entry = DirEntry::default();

        for offset in (0..dir_inode.size as usize).step_by(DirEntry::SIZE) {
            assert_eq!(
                dir_inode.read_at(offset, dir_entry.as_bytes_mut(), &self.block_device),
                DirEntry::SIZE
            );
            if dir_entry.name() == name {
                return Some((offset, dir_entry));
            }
        }

        None
    }

    /// 目录增长一条链接记录：先扩张再写入，目录内容走普通文件路径
    fn append_entry(
        &self,
        fs: &mut FlatFileSystem,
        dir_id: u32,
        dir_entry: &DirEntry,
    ) -> Result<(), FsError> {
        let old_size = self.read_inode(dir_id).size;
        self.truncate_locked(fs, dir_id, old_size + DirEntry::SIZE as u32)?;

        if let Err(e) = self.write_locked(fs, dir_id, old_size as usize, dir_entry.as_bytes()) {
            // 半截记录会破坏目录的对齐，大小得退回原样
            self.truncate_locked(fs, dir_id, old_size)
                .expect("shrinking never fails");
            return Err(e);
        }
        Ok(())
    }

    /// 字节写入的实现。空洞槽位按需换成真实块；
    /// 空间耗尽时把大小停在已写完的前缀并报告失败
    fn write_locked(
        &self,
        fs: &mut FlatFileSystem,
        inode_id: u32,
        offset: usize,
        buf: &[u8],
    ) -> Result<(), FsError> {
        let mut disk_inode = self.read_inode(inode_id);
        let end = offset + buf.len();
        assert!(end <= disk_inode.size as usize, "write out of range");

        let mut start = offset;
        let mut written = 0;
        let mut slots_changed = false;
        while start < end {
            let block_index = start / BLOCK_SIZE;
            if disk_inode.blocks[block_index] == ZERO_BLOCK {
                let Some(block_id) = fs.alloc_block() else {
                    log::warn!("store exhausted, write stops at byte {start}");
                    disk_inode.size = start as u32;
                    self.persist_inode(inode_id, &disk_inode);
                    return Err(FsError::NoSpace);
                };
                disk_inode.blocks[block_index] = block_id;
                slots_changed = true;
            }

            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_write_size = current_block_end - start;
            block_cache::get(disk_inode.blocks[block_index] as usize, self.block_device.clone())
                .lock()
                .map_mut(0, |data_block: &mut DataBlock| {
                    let src = &buf[written..written + block_write_size];
                    let dest =
                        &mut data_block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_write_size];
                    dest.copy_from_slice(src);
                });

            written += block_write_size;
            start = current_block_end;
        }

        if slots_changed {
            self.persist_inode(inode_id, &disk_inode);
        }
        Ok(())
    }

    /// 调整大小的实现，块数按向上取整折算。
    /// 收缩释放多出的真实块；增长只把新槽位标成空洞，分配推迟到首次写入
    fn truncate_locked(
        &self,
        fs: &mut FlatFileSystem,
        inode_id: u32,
        new_size: u32,
    ) -> Result<(), FsError> {
        let mut disk_inode = self.read_inode(inode_id);
        if new_size == disk_inode.size {
            return Ok(());
        }

        let old_blocks = DiskInode::count_data_block(disk_inode.size);
        let new_blocks = DiskInode::count_data_block(new_size);
        if new_blocks > BLOCKS_PER_INODE {
            return Err(FsError::FileTooBig);
        }

        if new_blocks < old_blocks {
            for index in new_blocks..old_blocks {
                if disk_inode.blocks[index] != ZERO_BLOCK {
                    fs.dealloc_block(disk_inode.blocks[index]);
                    disk_inode.blocks[index] = ZERO_BLOCK;
                }
            }
        } else {
            // 旧末块里没写过的尾巴即将变得可寻址，必须读出来是零
            let tail = disk_inode.size as usize % BLOCK_SIZE;
            if tail != 0 && disk_inode.blocks[old_blocks - 1] != ZERO_BLOCK {
                block_cache::get(
                    disk_inode.blocks[old_blocks - 1] as usize,
                    self.block_device.clone(),
                )
                .lock()
                .map_mut(0, |data_block: &mut DataBlock| data_block[tail..].fill(0));
            }
            for index in old_blocks..new_blocks {
                disk_inode.blocks[index] = ZERO_BLOCK;
            }
        }

        disk_inode.size = new_size;
        self.persist_inode(inode_id, &disk_inode);
        Ok(())
    }
}

/// 把路径拆成目录部分与最后一段名字
fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir_path, name)) => (dir_path, name),
        None => ("", path),
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StatKind::DIR => {
                writeln!(f, "Type: directory")?;
                writeln!(f, "Contains files: {}", self.size as usize / DirEntry::SIZE)?;
            }
            StatKind::SYMLINK => {
                writeln!(f, "Type: symlink")?;
                writeln!(f, "Points to: {}", self.target.as_deref().unwrap_or(""))?;
            }
            StatKind::FILE => writeln!(f, "Type: regular")?,
        }
        writeln!(f, "Inode: {}", self.inode)?;
        write!(f, "Blocks uses({}): ", self.blocks.len())?;
        for block in &self.blocks {
            write!(f, "#{block} ")?;
        }
        writeln!(f)?;
        writeln!(f, "Size: {} bytes", self.size)?;
        write!(f, "Number of (hard) links: {}", self.links)
    }
}

impl From<DiskInodeKind> for StatKind {
    #[inline]
    fn from(kind: DiskInodeKind) -> Self {
        match kind {
            DiskInodeKind::Directory => Self::DIR,
            DiskInodeKind::Regular => Self::FILE,
            DiskInodeKind::Symlink => Self::SYMLINK,
        }
    }
}
