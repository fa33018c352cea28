//! 引擎操作的可恢复失败结果，调用方必须逐一处理。
//!
//! 违反调用契约的情况（读写越过当前大小、对未挂载的存储操作）
//! 不在此列，那是调用方的程序错误，按断言处理。

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 路径或文件名无法解析
    NotFound,
    /// 目标名字已经存在
    AlreadyExists,
    /// 位图中找不到空闲块
    NoSpace,
    /// 文件名超出上限
    NameTooLong,
    /// 符号链接跳数耗尽，或目标路径无法解析
    BrokenSymlink,
    /// 超出单个 inode 的直接索引容量
    FileTooBig,
}
