//! `bytes` 与 `std::io` 适配层。
//!
//! # 模块定位（Why）
//! - 解析器普遍以 `bytes::Buf` 为输入抽象，I/O 层常以 `BufMut` 或 `std::io::Write` 为落盘目标；
//!   为 [`ConnectionBuffer`] 实现这些 trait 后，现有编解码器无需包装即可直接消费缓冲。
//!
//! # 映射关系（How）
//! - `Buf::chunk`/`advance` 对应 `read_view`/`read_nocopy`，推进后同样执行压缩检查；
//! - `BufMut::chunk_mut`/`advance_mut` 对应 `write_view`/`write_nocopy`；
//! - `Read`/`Write` 走复制路径，缓冲满时 `write` 返回 `Ok(0)`，与非阻塞套接字的短写语义一致。
//!
//! # 契约说明（What）
//! - 推进量超过可用字节时按缓冲的截断语义处理，不会 panic；
//! - 已释放缓冲的 `remaining`/`remaining_mut` 为 0。

use bytes::{Buf, BufMut, buf::UninitSlice};

use crate::buffer::ConnectionBuffer;

impl Buf for ConnectionBuffer {
    fn remaining(&self) -> usize {
        self.readable_length()
    }

    fn chunk(&self) -> &[u8] {
        self.read_view()
    }

    fn advance(&mut self, cnt: usize) {
        self.advance_read(cnt);
    }
}

// SAFETY: `chunk_mut` 只暴露 `[write_cursor, capacity)`，该区间来自已初始化的存储；
// `advance_mut` 的推进量被截断到 `writable_length()`，写游标不会越过容量。
unsafe impl BufMut for ConnectionBuffer {
    fn remaining_mut(&self) -> usize {
        self.writable_length()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.advance_write(cnt);
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(self.write_view())
    }
}

#[cfg(feature = "std")]
mod std_io {
    use std::io;

    use crate::{buffer::ConnectionBuffer, error::ConnBufferError};

    impl From<ConnBufferError> for io::Error {
        fn from(err: ConnBufferError) -> Self {
            let kind = match err {
                ConnBufferError::InvalidArgument { .. } => io::ErrorKind::InvalidInput,
                ConnBufferError::Released { .. } => io::ErrorKind::NotConnected,
                _ => io::ErrorKind::Other,
            };
            io::Error::new(kind, err)
        }
    }

    impl io::Read for ConnectionBuffer {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            Ok(ConnectionBuffer::read(self, buf)?)
        }
    }

    impl io::Write for ConnectionBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(ConnectionBuffer::write(self, buf)?)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
