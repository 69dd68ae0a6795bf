//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为连接缓冲对外暴露的失败语义提供集中定义，使调用方仅凭返回值即可区分
//!   “完整服务”“部分服务（返回计数小于请求）”与“输入被拒绝”三种结果；
//! - 部分服务属于正常路径，不在此处建模：读写请求超过可用空间时静默截断并返回实际字节数。
//!
//! ## 设计要求（What）
//! - 所有错误在任何状态变更之前检出，失败时缓冲保持原样；
//! - 错误码遵循 `<领域>.<语义>` 命名约定，便于在连接日志中检索与聚合。

use alloc::string::String;

use thiserror::Error;

use crate::allocator::AllocError;

/// 缓冲层的统一返回类型。
pub type Result<T, E = ConnBufferError> = core::result::Result<T, E>;

/// 连接缓冲内置的错误码常量集合。
pub mod codes {
    /// 参数非法：容量为 0、配置值溢出等。
    pub const INVALID_ARGUMENT: &str = "buffer.invalid_argument";
    /// 分配策略无法提供所需存储。
    pub const ALLOCATION_FAILED: &str = "buffer.allocation_failed";
    /// 缓冲已释放，后续读写被拒绝。
    pub const RELEASED: &str = "buffer.released";
}

/// 连接缓冲错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：构造、读写、配置校验三条路径的失败在此汇聚，供 I/O 层决定是丢弃连接、
///   降级还是直接把错误上抛。
/// - **契约 (What)**：
///   - 任何变体返回时缓冲状态均未被修改；
///   - 通过 [`ConnBufferError::code`] 提供稳定错误码，日志与指标不依赖 `Display` 文案。
/// - **设计权衡 (Trade-offs)**：`operation` 使用 `&'static str` 避免热路径分配，
///   只有需要拼接上下文的 `detail` 才持有 `String`。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnBufferError {
    /// 输入参数不满足前置条件。
    #[error("invalid argument for `{operation}`: {detail}")]
    InvalidArgument {
        operation: &'static str,
        detail: String,
    },

    /// 分配策略无法满足构造时的容量请求，未产生任何缓冲。
    #[error("allocator could not provide {requested} bytes")]
    Allocation {
        requested: usize,
        #[source]
        source: AllocError,
    },

    /// 缓冲已经释放底层存储。
    ///
    /// - **意图 (Why)**：释放是幂等的，但释放后的读写属于调用方逻辑错误，
    ///   需要与“输入非法”区分开，否则会被误判为协议层问题。
    #[error("connection buffer already released, `{operation}` rejected")]
    Released { operation: &'static str },
}

impl ConnBufferError {
    /// 构造参数错误，`detail` 描述具体违反的约束。
    pub fn invalid_argument(operation: &'static str, detail: impl Into<String>) -> Self {
        ConnBufferError::InvalidArgument {
            operation,
            detail: detail.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ConnBufferError::InvalidArgument { .. } => codes::INVALID_ARGUMENT,
            ConnBufferError::Allocation { .. } => codes::ALLOCATION_FAILED,
            ConnBufferError::Released { .. } => codes::RELEASED,
        }
    }
}
