#![cfg_attr(not(feature = "std"), no_std)]

//! `spark-connbuf` 提供位于非阻塞套接字与协议解析器之间的每连接字节缓冲。
//!
//! # 模块定位（Why）
//! - 异步 I/O 的读写经常只完成一部分，缓冲负责吸收这些残片：I/O 层在尾部追加新读到的字节，
//!   解析器从头部消费完整的协议单元，两端既可复制也可借用视图原地操作；
//! - 长连接上慢速读者会在缓冲前部留下已消费区域，缓冲在读游标越过容量一半时压缩，
//!   使连接在整个生命周期内只持有一次固定大小的分配。
//!
//! # 设计概要（How）
//! - `buffer` 模块实现 [`ConnectionBuffer`]：定长存储 + 读写双游标 + 漂移阈值压缩；
//! - `allocator` 模块定义可插拔的 [`BufferAllocator`] 策略，缺省为 [`GlobalAllocator`]，
//!   [`BudgetedAllocator`] 为共享它的全部缓冲设置内存上限；
//! - `config` 模块提供可反序列化的 [`ConnectionBufferConfig`]；
//! - `io` 模块为缓冲实现 `bytes::Buf`/`BufMut`，启用 `std` 时还实现 `std::io::{Read, Write}`。
//!
//! # 并发约定（Consistency）
//! - 缓冲不做任何内部同步，只由处理该连接的单一执行上下文持有；
//!   分配器则可被多个连接共享，必须满足 `Send + Sync`。

extern crate alloc;

mod allocator;
mod buffer;
mod config;
mod error;
mod io;

pub use allocator::{
    AllocError, AllocFailure, AllocatorStats, BudgetedAllocator, BufferAllocator, GlobalAllocator,
};
pub use buffer::ConnectionBuffer;
pub use config::{ConnectionBufferConfig, DEFAULT_CAPACITY, SIZING_FACTOR};
pub use error::{ConnBufferError, Result, codes};
