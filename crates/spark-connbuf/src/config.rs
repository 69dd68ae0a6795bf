use alloc::{format, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    allocator::BufferAllocator,
    buffer::ConnectionBuffer,
    error::{ConnBufferError, Result},
};

/// 未显式配置时的缓冲容量：16 KiB。
pub const DEFAULT_CAPACITY: usize = 16 * 1024;

/// 容量相对最大单条协议消息的放大倍数。
pub const SIZING_FACTOR: usize = 4;

/// 连接缓冲的声明式配置。
///
/// # 设计背景（Why）
/// - 容量需要随协议调整：短消息协议用几 KiB 即可，媒体或批量协议需要更大窗口；
///   将其放入可反序列化的配置，运维可以不改代码调整每连接内存占用。
///
/// # 契约说明（What）
/// - 缺省字段取 [`DEFAULT_CAPACITY`]，未知字段视为配置错误；
/// - [`validate`](Self::validate) 拒绝容量为 0 的配置；
/// - [`build`](Self::build)/[`build_with`](Self::build_with) 在构造前先校验。
///
/// # 设计取舍（Trade-offs）
/// - 仅暴露容量这一维度；漂移阈值固定为容量一半，不作为可调参数，
///   以保持压缩区间不重叠的前提。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionBufferConfig {
    /// 底层存储字节数。
    pub capacity: usize,
}

impl Default for ConnectionBufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ConnectionBufferConfig {
    /// 以指定容量创建配置。
    pub const fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// 按最大单条消息长度推导容量（放大 [`SIZING_FACTOR`] 倍），让压缩保持低频。
    ///
    /// # 错误
    /// - `max_message_size == 0` 或乘积溢出时返回 [`ConnBufferError::InvalidArgument`]。
    pub fn for_max_message(max_message_size: usize) -> Result<Self> {
        if max_message_size == 0 {
            return Err(ConnBufferError::invalid_argument(
                "config",
                "max message size must be greater than zero",
            ));
        }
        let capacity = max_message_size.checked_mul(SIZING_FACTOR).ok_or_else(|| {
            ConnBufferError::invalid_argument(
                "config",
                format!("max message size {max_message_size} overflows buffer capacity"),
            )
        })?;
        Ok(Self { capacity })
    }

    /// 校验配置是否可用于构造缓冲。
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ConnBufferError::invalid_argument(
                "config",
                "capacity must be greater than zero",
            ));
        }
        Ok(())
    }

    /// 使用全局堆构造缓冲。
    pub fn build(&self) -> Result<ConnectionBuffer> {
        self.validate()?;
        ConnectionBuffer::new(self.capacity)
    }

    /// 使用注入的分配策略构造缓冲。
    pub fn build_with(&self, allocator: Arc<dyn BufferAllocator>) -> Result<ConnectionBuffer> {
        self.validate()?;
        ConnectionBuffer::with_allocator(self.capacity, allocator)
    }
}
