//! 数据模型模块

pub mod conversation;
pub mod group;
pub mod seq;

// 重新导出常用类型
pub use conversation::*;
pub use group::*;
pub use seq::*;
