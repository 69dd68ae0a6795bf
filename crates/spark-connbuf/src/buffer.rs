use alloc::sync::Arc;
use core::fmt;

use bytes::BytesMut;

use crate::{
    allocator::{AllocError, AllocFailure, BufferAllocator, GlobalAllocator},
    error::{ConnBufferError, Result},
};

/// `ConnectionBuffer` 是每连接一份的定长字节累加器，位于非阻塞套接字与协议解析器之间。
///
/// # 设计动机（Why）
/// - 异步 I/O 的读写都可能只完成一部分：I/O 层需要在尾部追加新到字节，解析器需要从头部
///   按完整协议单元消费，两者速度不一致时缓冲负责吸收差值；
/// - 长连接上读者落后会让已消费前缀越积越多，缓冲在读游标越过容量一半时把剩余字节搬回开头，
///   回收前缀空间而不扩大底层分配。
///
/// # 架构关系（How）
/// - `storage` 为构造时一次性获取的定长区域，生命周期内不扩容、不重新分配；
/// - `read_cursor`/`write_cursor` 两个偏移划分出未读区 `[read, write)` 与可写区 `[write, capacity)`；
/// - 每次推进读游标后检查漂移阈值（`capacity / 2`）。超过阈值时未读区长度必然小于读游标，
///   源区间与目标区间不重叠，压缩只需一次前向拷贝。
///
/// # 契约说明（What）
/// - **不变式**：任何操作返回后 `0 <= read_cursor <= write_cursor <= capacity`；
///   压缩只改变未读字节的偏移，不改变内容与顺序；
/// - **截断语义**：读、窥视、写请求超过可用量时只服务可用部分并返回实际字节数，这不是错误；
///   调用方必须检查返回值，把剩余部分留待下次；
/// - **视图**：[`read_view`](Self::read_view) 与 [`write_view`](Self::write_view) 借用缓冲本身，
///   借用检查器保证视图不会跨越任何修改游标或触发压缩的调用；
/// - **释放**：[`release`](Self::release) 幂等，`Drop` 时自动执行；释放后读写返回
///   [`ConnBufferError::Released`]。
///
/// # 风险与取舍（Trade-offs）
/// - 不提供任何内部同步：缓冲只属于处理该连接的单一执行上下文；
/// - 容量建议取最大单条协议消息的四倍左右，过小会让压缩频繁发生，参见
///   [`ConnectionBufferConfig::for_max_message`](crate::ConnectionBufferConfig::for_max_message)。
pub struct ConnectionBuffer {
    storage: Option<BytesMut>,
    capacity: usize,
    drift_threshold: usize,
    read_cursor: usize,
    write_cursor: usize,
    allocator: Arc<dyn BufferAllocator>,
}

impl ConnectionBuffer {
    /// 使用全局堆分配 `capacity` 字节的缓冲。
    ///
    /// # 错误
    /// - `capacity == 0`：返回 [`ConnBufferError::InvalidArgument`]；
    /// - 堆无法满足请求：返回 [`ConnBufferError::Allocation`]。
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_allocator(capacity, Arc::new(GlobalAllocator))
    }

    /// 使用注入的分配策略创建缓冲。
    ///
    /// # 前置条件
    /// - `capacity > 0`；
    /// - `allocator` 在缓冲整个生命周期内有效，缓冲释放时会把区域交还给同一实例。
    ///
    /// # 后置条件
    /// - 两个游标均为 0，`writable_length() == capacity`；
    /// - 失败时不会持有任何区域：分配器返回过短区域的情况下，该区域会被立即归还。
    pub fn with_allocator(capacity: usize, allocator: Arc<dyn BufferAllocator>) -> Result<Self> {
        if capacity == 0 {
            return Err(ConnBufferError::invalid_argument(
                "create",
                "capacity must be greater than zero",
            ));
        }

        let storage = allocator.allocate(capacity).map_err(|source| {
            tracing::warn!(capacity, error = %source, "connection buffer allocation failed");
            ConnBufferError::Allocation {
                requested: capacity,
                source,
            }
        })?;

        if storage.len() < capacity {
            let provided = storage.len();
            allocator.deallocate(storage);
            tracing::warn!(capacity, provided, "allocator returned an undersized region");
            return Err(ConnBufferError::Allocation {
                requested: capacity,
                source: AllocError::new(capacity, AllocFailure::Undersized { provided }),
            });
        }

        tracing::debug!(capacity, "connection buffer allocated");
        Ok(Self {
            storage: Some(storage),
            capacity,
            drift_threshold: capacity / 2,
            read_cursor: 0,
            write_cursor: 0,
            allocator,
        })
    }

    /// 构造时确定的总容量，释放后保持不变。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 触发压缩的读游标阈值，恒为 `capacity / 2`。
    pub fn drift_threshold(&self) -> usize {
        self.drift_threshold
    }

    /// 当前未读字节数。
    pub fn readable_length(&self) -> usize {
        self.write_cursor.saturating_sub(self.read_cursor)
    }

    /// 当前尾部可写字节数，释放后为 0。
    pub fn writable_length(&self) -> usize {
        if self.storage.is_none() {
            return 0;
        }
        self.capacity - self.write_cursor
    }

    /// 是否没有未读字节。
    pub fn is_empty(&self) -> bool {
        self.readable_length() == 0
    }

    /// 底层存储是否已经归还。
    pub fn is_released(&self) -> bool {
        self.storage.is_none()
    }

    /// 复制至多 `dst.len()` 字节到 `dst`，不推进读游标。
    ///
    /// 返回实际复制的字节数，即 `min(dst.len(), readable_length())`；连续两次调用结果一致。
    pub fn peek(&self, dst: &mut [u8]) -> Result<usize> {
        let storage = self.live_storage("peek")?;
        let len = dst.len().min(self.readable_length());
        let start = self.read_cursor;
        dst[..len].copy_from_slice(&storage[start..start + len]);
        Ok(len)
    }

    /// 与 [`peek`](Self::peek) 相同地复制，随后推进读游标并检查是否需要压缩。
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let len = self.peek(dst)?;
        self.advance_read(len);
        Ok(len)
    }

    /// 不复制，直接推进读游标 `min(len, readable_length())` 字节。
    ///
    /// 用于调用方已经通过 [`read_view`](Self::read_view) 原地解析完数据的场景。
    pub fn read_nocopy(&mut self, len: usize) -> Result<usize> {
        self.ensure_live("read_nocopy")?;
        Ok(self.advance_read(len))
    }

    /// 借用未读区 `[read_cursor, write_cursor)`；释放后为空切片。
    pub fn read_view(&self) -> &[u8] {
        match &self.storage {
            Some(storage) => &storage[self.read_cursor..self.write_cursor],
            None => &[],
        }
    }

    /// 从 `src` 复制至多 `writable_length()` 字节到尾部，返回实际写入的字节数。
    ///
    /// 空间不足时不扩容，也不报错：与非阻塞套接字的短写一致，剩余部分由调用方稍后重试。
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        let len = src.len().min(self.writable_length());
        let start = self.write_cursor;
        let storage = self.live_storage_mut("write")?;
        storage[start..start + len].copy_from_slice(&src[..len]);
        self.write_cursor += len;
        Ok(len)
    }

    /// 不复制，直接推进写游标 `min(len, writable_length())` 字节。
    ///
    /// 用于调用方已经把数据写入 [`write_view`](Self::write_view) 的场景，例如 `recv` 直接落盘到缓冲。
    pub fn write_nocopy(&mut self, len: usize) -> Result<usize> {
        self.ensure_live("write_nocopy")?;
        Ok(self.advance_write(len))
    }

    /// 借用可写区 `[write_cursor, capacity)`；释放后为空切片。
    pub fn write_view(&mut self) -> &mut [u8] {
        let (start, end) = (self.write_cursor, self.capacity);
        match &mut self.storage {
            Some(storage) => &mut storage[start..end],
            None => &mut [],
        }
    }

    /// 丢弃（不擦除）所有未读字节，两个游标归零，保留底层分配。
    ///
    /// 常用于协议错误后重新同步连接状态。
    pub fn reset(&mut self) {
        self.read_cursor = 0;
        self.write_cursor = 0;
    }

    /// 把底层存储交还分配器。
    ///
    /// 重复调用是无操作；`Drop` 也会调用本方法，因此分配器对每块区域恰好收到一次归还。
    pub fn release(&mut self) {
        self.read_cursor = 0;
        self.write_cursor = 0;
        if let Some(storage) = self.storage.take() {
            self.allocator.deallocate(storage);
            tracing::debug!(capacity = self.capacity, "connection buffer released");
        }
    }

    /// 推进读游标并执行压缩检查，返回实际推进量。
    pub(crate) fn advance_read(&mut self, len: usize) -> usize {
        let len = len.min(self.readable_length());
        self.read_cursor += len;
        self.compact_if_drifted();
        len
    }

    /// 推进写游标，返回实际推进量。
    pub(crate) fn advance_write(&mut self, len: usize) -> usize {
        let len = len.min(self.writable_length());
        self.write_cursor += len;
        len
    }

    /// 读游标越过漂移阈值时，把未读区搬到区域开头。
    fn compact_if_drifted(&mut self) {
        if self.read_cursor <= self.drift_threshold {
            return;
        }
        let (read, write) = (self.read_cursor, self.write_cursor);
        let live = write - read;
        let Some(storage) = self.storage.as_mut() else {
            return;
        };

        // read > capacity / 2 蕴含 live <= capacity - read < read，源与目标不重叠。
        debug_assert!(live < read, "compaction ranges overlap: live={live}, read={read}");
        if live > 0 {
            let (head, tail) = storage[..write].split_at_mut(read);
            head[..live].copy_from_slice(tail);
        }

        tracing::trace!(shifted = live, reclaimed = read, "connection buffer compacted");
        self.read_cursor = 0;
        self.write_cursor = live;
    }

    fn ensure_live(&self, operation: &'static str) -> Result<()> {
        if self.storage.is_none() {
            return Err(ConnBufferError::Released { operation });
        }
        Ok(())
    }

    fn live_storage(&self, operation: &'static str) -> Result<&[u8]> {
        self.storage
            .as_deref()
            .ok_or(ConnBufferError::Released { operation })
    }

    fn live_storage_mut(&mut self, operation: &'static str) -> Result<&mut [u8]> {
        self.storage
            .as_deref_mut()
            .ok_or(ConnBufferError::Released { operation })
    }
}

impl Drop for ConnectionBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ConnectionBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuffer")
            .field("capacity", &self.capacity)
            .field("read_cursor", &self.read_cursor)
            .field("write_cursor", &self.write_cursor)
            .field("released", &self.is_released())
            .finish()
    }
}

/// 便于日志输出的缓冲摘要，例如 `ConnectionBuffer[r=4 w=10 cap=16]`。
impl fmt::Display for ConnectionBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionBuffer[r={} w={} cap={}]",
            self.read_cursor, self.write_cursor, self.capacity
        )
    }
}
