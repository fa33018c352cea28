//! 端到端场景：真实的镜像文件 + 完整的挂载会话

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use flat_fs::{BlockDevice, DiskInodeKind, FlatFileSystem, FsError, Inode};
use flat_fs::BLOCK_SIZE;

use crate::BlockFile;

/// 1 MiB 镜像
const IMAGE_BLOCKS: usize = 2048;

struct Image(PathBuf);

impl Image {
    fn new(name: &str) -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("flat-fs-{}-{name}.img", std::process::id()));
        let _ = fs::remove_file(&path);
        Self(path)
    }

    fn device(&self) -> Arc<dyn BlockDevice> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.0)
            .unwrap();
        file.set_len((IMAGE_BLOCKS * BLOCK_SIZE) as u64).unwrap();
        Arc::new(BlockFile(Mutex::new(file)))
    }

    fn mount(&self) -> Inode {
        let fs = FlatFileSystem::mount(self.device());
        FlatFileSystem::root_inode(&fs)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

#[test]
fn fresh_image_formats_to_empty_root() {
    let image = Image::new("format");
    let root = image.mount();

    assert_eq!(root.kind(), DiskInodeKind::Directory);
    assert_eq!(root.stat().links, 1);
    assert_eq!(root.list("/").unwrap(), "");
}

#[test]
fn create_write_read() {
    let image = Image::new("roundtrip");
    let root = image.mount();

    let file = root.create("/a.txt", DiskInodeKind::Regular).unwrap();
    file.truncate(5).unwrap();
    file.write_at(0, b"hello").unwrap();

    let mut buf = [0; 5];
    root.open("/a.txt").unwrap().read_at(0, &mut buf);
    assert_eq!(&buf, b"hello");
}

#[test]
fn hard_link_survives_unlink_of_original() {
    let image = Image::new("hardlink");
    let root = image.mount();

    let file = root.create("/a.txt", DiskInodeKind::Regular).unwrap();
    file.truncate(5).unwrap();
    file.write_at(0, b"hello").unwrap();

    root.link("/a.txt", "/b.txt").unwrap();
    assert_eq!(file.stat().links, 2);

    root.unlink("/a.txt").unwrap();
    let b = root.open("/b.txt").unwrap();
    assert_eq!(b.stat().links, 1);
    assert_eq!(b.read_all(), b"hello");
}

#[test]
fn symlink_resolves_to_target_content() {
    let image = Image::new("symlink");
    let root = image.mount();

    let file = root.create("/a.txt", DiskInodeKind::Regular).unwrap();
    file.truncate(5).unwrap();
    file.write_at(0, b"hello").unwrap();

    root.symlink("/a.txt", "/l").unwrap();
    assert_eq!(root.open("/l").unwrap().read_all(), b"hello");
}

#[test]
fn create_twice_fails_with_already_exists() {
    let image = Image::new("dup");
    let root = image.mount();

    root.create("/x", DiskInodeKind::Regular).unwrap();
    assert_eq!(
        root.create("/x", DiskInodeKind::Regular).unwrap_err(),
        FsError::AlreadyExists
    );
}

#[test]
fn contents_survive_remount() {
    let image = Image::new("remount");
    {
        let root = image.mount();
        root.create("/d", DiskInodeKind::Directory).unwrap();
        let file = root.create("/d/keep", DiskInodeKind::Regular).unwrap();
        file.truncate(9).unwrap();
        file.write_at(0, b"persisted").unwrap();
        // 句柄落下即卸载：缓存写回镜像
    }

    let root = image.mount();
    assert_eq!(root.list("/d").unwrap(), "keep\n");
    assert_eq!(root.open("/d/keep").unwrap().read_all(), b"persisted");
}
