//! Line-oriented shell over the storage engine.
//!
//! Every command maps to one engine call; the shell owns the mount
//! session, tokenizes input and formats outcomes — nothing more.

mod cli;

use std::fs::OpenOptions;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::Parser;
use cli::Cli;
use flat_fs::{BlockDevice, DiskInodeKind, FlatFileSystem, Inode};
use flat_fs::BLOCK_SIZE;
use flat_fs_fuse::BlockFile;

/// 挂载会话：根句柄既是命名空间入口，也维系着文件系统的生命周期
struct Session {
    root: Inode,
}

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut session: Option<Session> = None;
    if let Some(image) = &cli.image {
        mount(&mut session, image, cli.capacity);
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut tokens = line.split_whitespace();
        let Some(cmd) = tokens.next() else {
            continue;
        };

        match cmd {
            "mount" => match tokens.next() {
                Some(path) => mount(&mut session, Path::new(path), cli.capacity),
                None => println!("mount: missing image file"),
            },
            "umount" => {
                session = None;
                println!("File system unmounted!");
            }
            "pwd" => match session {
                Some(_) => println!("/"),
                None => println!("NOT MOUNTED!"),
            },
            "ls" => {
                if let Some(root) = require(&session) {
                    match root.list(tokens.next().unwrap_or("/")) {
                        Ok(listing) => print!("{listing}"),
                        Err(_) => println!("No such directory"),
                    }
                }
            }
            "create" | "touch" => {
                if let (Some(root), Some(path)) = (require(&session), tokens.next()) {
                    match root.create(path, DiskInodeKind::Regular) {
                        Ok(_) => println!("File created"),
                        Err(_) => println!("File wasn't created"),
                    }
                }
            }
            "mkdir" => {
                if let (Some(root), Some(path)) = (require(&session), tokens.next()) {
                    match root.create(path, DiskInodeKind::Directory) {
                        Ok(_) => println!("Dir created"),
                        Err(_) => println!("Dir wasn't created"),
                    }
                }
            }
            "link" | "ln" => {
                if let (Some(root), Some(target), Some(name)) =
                    (require(&session), tokens.next(), tokens.next())
                {
                    match root.link(target, name) {
                        Ok(()) => println!("Link created"),
                        Err(_) => println!("Link wasn't created"),
                    }
                }
            }
            "unlink" | "rm" => {
                if let (Some(root), Some(path)) = (require(&session), tokens.next()) {
                    match root.unlink(path) {
                        Ok(()) => println!("Hard link was removed"),
                        Err(_) => println!("Hard link wasn't removed"),
                    }
                }
            }
            "symlink" => {
                if let (Some(root), Some(target), Some(name)) =
                    (require(&session), tokens.next(), tokens.next())
                {
                    match root.symlink(target, name) {
                        Ok(()) => println!("Symlink created"),
                        Err(_) => println!("Symlink wasn't created"),
                    }
                }
            }
            "stat" | "filestat" => {
                if let (Some(root), Some(path)) = (require(&session), tokens.next()) {
                    match root.open_no_follow(path) {
                        Ok(inode) => println!("{}", inode.stat()),
                        Err(_) => println!("File not found"),
                    }
                }
            }
            "cat" | "read" => {
                if let (Some(root), Some(path)) = (require(&session), tokens.next()) {
                    match root.open(path) {
                        Ok(inode) => {
                            println!("{}", String::from_utf8_lossy(&inode.read_all()))
                        }
                        Err(_) => println!("File not found"),
                    }
                }
            }
            "write" => {
                if let (Some(root), Some(path)) = (require(&session), tokens.next()) {
                    let data = tokens.collect::<Vec<_>>().join(" ");
                    match root.open(path) {
                        Ok(inode) => {
                            let outcome = inode
                                .truncate(data.len() as u32)
                                .and_then(|()| inode.write_at(0, data.as_bytes()));
                            match outcome {
                                Ok(()) => println!("Data successfully written"),
                                Err(_) => println!("Data wasn't written"),
                            }
                        }
                        Err(_) => println!("File not found"),
                    }
                }
            }
            "truncate" => {
                if let (Some(root), Some(path), Some(size)) =
                    (require(&session), tokens.next(), tokens.next())
                {
                    let Ok(size) = size.parse::<u32>() else {
                        println!("truncate: bad size");
                        continue;
                    };
                    match root.open(path) {
                        Ok(inode) => match inode.truncate(size) {
                            Ok(()) => println!("File was truncated"),
                            Err(_) => println!("File wasn't truncated"),
                        },
                        Err(_) => println!("File not found"),
                    }
                }
            }
            "exists" => {
                if let (Some(root), Some(path)) = (require(&session), tokens.next()) {
                    println!("{}", if root.exists(path) { "yes" } else { "no" });
                }
            }
            _ => println!("Unknown command!"),
        }
    }

    Ok(())
}

fn require(session: &Option<Session>) -> Option<&Inode> {
    if session.is_none() {
        println!("File system is not mounted!");
    }
    session.as_ref().map(|session| &session.root)
}

/// 打开（必要时创建）镜像文件并挂载。
/// `set_len` 给新镜像一个全零的稀疏文件，首个挂载随即格式化
fn mount(session: &mut Option<Session>, image: &Path, capacity: u64) {
    // 原有会话先落盘关闭
    *session = None;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(image)
        .or_else(|e| {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e);
            }
            log::info!("image {image:?} does not exist, creating");
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(image)?;
            file.set_len(capacity)?;
            Ok(file)
        });
    let file = match file {
        Ok(file) => file,
        Err(e) => {
            println!("Cannot mount file system! ({e})");
            return;
        }
    };

    let blocks = file.metadata().map(|m| m.len() as usize / BLOCK_SIZE);
    if !matches!(blocks, Ok(blocks) if blocks >= 2) {
        println!("Cannot mount file system! (image too small)");
        return;
    }

    let device: Arc<dyn BlockDevice> = Arc::new(BlockFile(Mutex::new(file)));
    let fs = FlatFileSystem::mount(device);
    let root = FlatFileSystem::root_inode(&fs);
    *session = Some(Session { root });
    println!("File system mounted!");
}
