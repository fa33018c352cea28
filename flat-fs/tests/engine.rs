//! 引擎层场景测试：用内存盘充当块设备

use std::sync::{Arc, Mutex};

use flat_fs::{BlockDevice, DiskInodeKind, FlatFileSystem, FsError, Inode};
use flat_fs::{BLOCK_BITS, BLOCK_SIZE};

struct MemDisk(Mutex<Vec<u8>>);

impl MemDisk {
    fn new(blocks: usize) -> Arc<dyn BlockDevice> {
        Arc::new(Self(Mutex::new(vec![0; blocks * BLOCK_SIZE])))
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let data = self.0.lock().unwrap();
        buf.copy_from_slice(&data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut data = self.0.lock().unwrap();
        data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].copy_from_slice(buf);
    }

    fn block_count(&self) -> usize {
        self.0.lock().unwrap().len() / BLOCK_SIZE
    }
}

fn mount(blocks: usize) -> (Arc<spin::Mutex<FlatFileSystem>>, Inode) {
    let fs = FlatFileSystem::mount(MemDisk::new(blocks));
    let root = FlatFileSystem::root_inode(&fs);
    (fs, root)
}

#[test]
fn format_creates_empty_root() {
    let (_fs, root) = mount(64);

    assert_eq!(root.kind(), DiskInodeKind::Directory);
    assert_eq!(root.size(), 0);
    assert_eq!(root.stat().links, 1);
    assert_eq!(root.list("/").unwrap(), "");
}

#[test]
fn mount_is_idempotent() {
    let device = MemDisk::new(64);
    let id = {
        let fs = FlatFileSystem::mount(device.clone());
        let root = FlatFileSystem::root_inode(&fs);
        root.create("/a", DiskInodeKind::Regular).unwrap().inode_id()
    };

    // 二次挂载不得重新格式化
    let fs = FlatFileSystem::mount(device);
    let root = FlatFileSystem::root_inode(&fs);
    assert_eq!(root.open("/a").unwrap().inode_id(), id);
}

#[test]
fn allocator_never_hands_out_live_blocks() {
    let (fs, _root) = mount(64);
    let mut fs = fs.lock();

    let mut allocated = Vec::new();
    while let Some(block) = fs.alloc_block() {
        assert!(!allocated.contains(&block), "block {block} handed out twice");
        allocated.push(block);
    }

    // 释放后的块可以再次分配（首位优先）
    let freed = allocated[3];
    fs.dealloc_block(freed);
    assert_eq!(fs.alloc_block(), Some(freed));
}

#[test]
fn exhaustion_is_reported_not_panicked() {
    // 16块 = 1位图块 + 15数据块，根目录占一块
    let (fs, _root) = mount(16);
    let mut fs = fs.lock();

    for _ in 0..14 {
        assert!(fs.alloc_block().is_some());
    }
    assert_eq!(fs.alloc_block(), None);
}

#[test]
fn bitmap_tail_bits_are_not_blocks() {
    // 设备比一个位图块能描述的还小：末尾的位不能当成块发出去
    let blocks = 100;
    assert!(blocks < BLOCK_BITS);
    let (fs, _root) = mount(blocks);
    let mut fs = fs.lock();

    let mut count = 1; // 根目录已占一块
    while fs.alloc_block().is_some() {
        count += 1;
    }
    assert_eq!(count, blocks - 1); // 数据区域 = 总数 - 位图1块
}

#[test]
fn write_read_roundtrip() {
    let (_fs, root) = mount(64);

    let file = root.create("/a.txt", DiskInodeKind::Regular).unwrap();
    file.truncate(5).unwrap();
    file.write_at(0, b"hello").unwrap();

    let mut buf = [0; 5];
    assert_eq!(file.read_at(0, &mut buf), 5);
    assert_eq!(&buf, b"hello");
}

#[test]
fn multi_block_roundtrip() {
    let (_fs, root) = mount(64);

    let file = root.create("/big", DiskInodeKind::Regular).unwrap();
    let data: Vec<u8> = (0..3 * BLOCK_SIZE + 77).map(|i| (i % 251) as u8).collect();
    file.truncate(data.len() as u32).unwrap();
    file.write_at(0, &data).unwrap();

    assert_eq!(file.read_all(), data);

    // 跨块的子范围
    let mut buf = vec![0; BLOCK_SIZE + 10];
    file.read_at(BLOCK_SIZE - 5, &mut buf);
    assert_eq!(buf, &data[BLOCK_SIZE - 5..2 * BLOCK_SIZE + 5]);
}

#[test]
fn sparse_file_reads_zero_without_allocation() {
    let (_fs, root) = mount(64);

    let file = root.create("/sparse", DiskInodeKind::Regular).unwrap();
    file.truncate((3 * BLOCK_SIZE + 10) as u32).unwrap();

    // 尚未写入：没有任何真实块
    assert!(file.stat().blocks.is_empty());

    let mut buf = vec![0xffu8; 2 * BLOCK_SIZE];
    file.read_at(BLOCK_SIZE / 2, &mut buf);
    assert!(buf.iter().all(|&b| b == 0));

    // 只写中间一块，两侧仍是空洞
    file.write_at(BLOCK_SIZE, &[7; 8]).unwrap();
    assert_eq!(file.stat().blocks.len(), 1);

    let mut buf = [0xffu8; 8];
    file.read_at(0, &mut buf);
    assert_eq!(buf, [0; 8]);
    file.read_at(BLOCK_SIZE, &mut buf);
    assert_eq!(buf, [7; 8]);
}

#[test]
fn truncate_grow_shrink_preserves_content() {
    let (_fs, root) = mount(64);

    let file = root.create("/t", DiskInodeKind::Regular).unwrap();
    file.truncate(100).unwrap();
    file.write_at(0, &[42; 100]).unwrap();

    // 长出去再缩回来，原有内容原样
    file.truncate((2 * BLOCK_SIZE) as u32).unwrap();
    file.truncate(100).unwrap();

    let mut buf = [0; 100];
    file.read_at(0, &mut buf);
    assert_eq!(buf, [42; 100]);

    // 增长暴露出的尾部字节必须读出零
    file.truncate(200).unwrap();
    let mut buf = [0xffu8; 100];
    file.read_at(100, &mut buf);
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn shrink_frees_blocks_for_reuse() {
    let (fs, root) = mount(16);

    let file = root.create("/f", DiskInodeKind::Regular).unwrap();
    file.truncate((10 * BLOCK_SIZE) as u32).unwrap();
    file.write_at(0, &vec![1; 10 * BLOCK_SIZE]).unwrap();
    assert_eq!(file.stat().blocks.len(), 10);

    file.truncate(BLOCK_SIZE as u32).unwrap();
    assert_eq!(file.stat().blocks.len(), 1);

    // 释放的9块都回到了分配器手里
    let mut fs = fs.lock();
    for _ in 0..9 {
        assert!(fs.alloc_block().is_some());
    }
}

#[test]
fn oversized_truncate_is_rejected() {
    let (_fs, root) = mount(64);

    let file = root.create("/f", DiskInodeKind::Regular).unwrap();
    let too_big = (flat_fs::BLOCKS_PER_INODE + 1) * BLOCK_SIZE;
    assert_eq!(file.truncate(too_big as u32), Err(FsError::FileTooBig));
    assert_eq!(file.size(), 0);
}

#[test]
fn partial_write_on_exhaustion() {
    // 16块：位图1 + 根目录1 + 目录数据1 + 文件inode1，剩12块数据
    let (_fs, root) = mount(16);

    let file = root.create("/big", DiskInodeKind::Regular).unwrap();
    let size = 14 * BLOCK_SIZE;
    file.truncate(size as u32).unwrap();

    let data = vec![9u8; size];
    assert_eq!(file.write_at(0, &data), Err(FsError::NoSpace));

    // 大小停在写完的前缀上，且前缀可读
    let written = file.size() as usize;
    assert_eq!(written, 12 * BLOCK_SIZE);
    let mut buf = vec![0; written];
    file.read_at(0, &mut buf);
    assert!(buf.iter().all(|&b| b == 9));
}

#[test]
fn create_rejects_duplicates_and_long_names() {
    let (_fs, root) = mount(64);

    root.create("/x", DiskInodeKind::Regular).unwrap();
    assert_eq!(
        root.create("/x", DiskInodeKind::Regular).unwrap_err(),
        FsError::AlreadyExists
    );
    assert_eq!(
        root.create("/exactly_16_chars", DiskInodeKind::Regular).unwrap_err(),
        FsError::NameTooLong
    );
    // 15字节正好合法
    root.create("/fifteen_chars__", DiskInodeKind::Regular).unwrap();
}

#[test]
fn link_count_conservation() {
    let (_fs, root) = mount(64);

    let file = root.create("/a.txt", DiskInodeKind::Regular).unwrap();
    file.truncate(5).unwrap();
    file.write_at(0, b"hello").unwrap();
    assert_eq!(file.stat().links, 1);

    root.link("/a.txt", "/b.txt").unwrap();
    assert_eq!(file.stat().links, 2);
    root.link("/a.txt", "/c.txt").unwrap();
    assert_eq!(file.stat().links, 3);

    root.unlink("/a.txt").unwrap();
    root.unlink("/c.txt").unwrap();

    // 剩下的名字还指着原来的内容
    let b = root.open("/b.txt").unwrap();
    assert_eq!(b.stat().links, 1);
    assert_eq!(b.read_all(), b"hello");
    assert!(!root.exists("/a.txt"));
}

#[test]
fn unlink_swaps_last_entry_in() {
    let (_fs, root) = mount(16);

    root.create("/a", DiskInodeKind::Regular).unwrap();
    root.create("/b", DiskInodeKind::Regular).unwrap();
    root.create("/c", DiskInodeKind::Regular).unwrap();
    assert_eq!(root.list("/").unwrap(), "a\nb\nc\n");

    root.unlink("/a").unwrap();
    // 末尾记录换进了空出的槽位
    assert_eq!(root.list("/").unwrap(), "c\nb\n");

    root.unlink("/b").unwrap();
    assert_eq!(root.list("/").unwrap(), "c\n");
}

#[test]
fn unlink_releases_every_block() {
    let (fs, root) = mount(16);

    let file = root.create("/a", DiskInodeKind::Regular).unwrap();
    file.truncate((2 * BLOCK_SIZE) as u32).unwrap();
    file.write_at(0, &vec![1; 2 * BLOCK_SIZE]).unwrap();

    root.unlink("/a").unwrap();

    // 目录缩回零长，inode 块与数据块全数归还：只剩根目录占一块
    let mut fs = fs.lock();
    let mut free = 0;
    while fs.alloc_block().is_some() {
        free += 1;
    }
    assert_eq!(free, 14);
}

#[test]
fn subdirectories_resolve() {
    let (_fs, root) = mount(64);

    root.create("/d", DiskInodeKind::Directory).unwrap();
    root.create("/d/f", DiskInodeKind::Regular).unwrap();

    assert_eq!(root.list("/d").unwrap(), "f\n");
    assert!(root.exists("/d/f"));
    assert!(!root.exists("/d/g"));
    // 中间段撞上非目录就地失败
    assert!(!root.exists("/d/f/x"));
    // `.` 是当前目录的别名
    assert!(root.exists("/./d/./f"));
}

#[test]
fn symlink_reads_through() {
    let (_fs, root) = mount(64);

    let file = root.create("/a.txt", DiskInodeKind::Regular).unwrap();
    file.truncate(5).unwrap();
    file.write_at(0, b"hello").unwrap();

    root.symlink("/a.txt", "/l").unwrap();

    let through = root.open("/l").unwrap();
    assert_eq!(through.inode_id(), file.inode_id());
    assert_eq!(through.read_all(), b"hello");

    // 不穿透的句柄看到链接本身
    let raw = root.open_no_follow("/l").unwrap();
    assert_eq!(raw.kind(), DiskInodeKind::Symlink);
    assert_eq!(raw.stat().target.as_deref(), Some("/a.txt"));
}

#[test]
fn dangling_symlink_is_broken() {
    let (_fs, root) = mount(64);

    root.symlink("/nowhere", "/l").unwrap();
    assert_eq!(root.open("/l").unwrap_err(), FsError::BrokenSymlink);
}

#[test]
fn symlink_cycles_are_rejected() {
    let (_fs, root) = mount(64);

    root.symlink("/b", "/a").unwrap();
    root.symlink("/a", "/b").unwrap();
    assert_eq!(root.open("/a").unwrap_err(), FsError::BrokenSymlink);

    root.symlink("/self", "/self").unwrap();
    assert_eq!(root.open("/self").unwrap_err(), FsError::BrokenSymlink);
}

#[test]
fn symlink_chain_respects_hop_budget() {
    let (_fs, root) = mount(256);

    let file = root.create("/t", DiskInodeKind::Regular).unwrap();
    file.truncate(2).unwrap();
    file.write_at(0, b"ok").unwrap();

    // 预算之内的链条畅通
    root.symlink("/t", "/s0").unwrap();
    for i in 1..flat_fs::MAX_SYMLINK_HOPS {
        root.symlink(&format!("/s{}", i - 1), &format!("/s{i}")).unwrap();
    }
    let last = format!("/s{}", flat_fs::MAX_SYMLINK_HOPS - 1);
    assert_eq!(root.open(&last).unwrap().read_all(), b"ok");

    // 再多一跳就越过预算
    root.symlink(&last, "/s_over").unwrap();
    assert_eq!(root.open("/s_over").unwrap_err(), FsError::BrokenSymlink);
}

#[test]
fn stat_text_matches_layout() {
    let (_fs, root) = mount(64);

    let file = root.create("/a", DiskInodeKind::Regular).unwrap();
    file.truncate(5).unwrap();
    file.write_at(0, b"hello").unwrap();

    let text = file.stat().to_string();
    assert!(text.starts_with("Type: regular\n"));
    assert!(text.contains("Blocks uses(1): "));
    assert!(text.contains("Size: 5 bytes"));
    assert!(text.contains("Number of (hard) links: 1"));

    let dir_text = root.stat().to_string();
    assert!(dir_text.starts_with("Type: directory\nContains files: 1\n"));
}
