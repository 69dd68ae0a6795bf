//! `allocator_contract` 集成测试：聚焦 `ConnectionBuffer` 与注入分配策略之间的协作协议。
//!
//! # 测试总览（Why）
//! - 每次成功分配必须恰好对应一次归还，重复释放与 `Drop` 不得造成二次归还；
//! - 分配失败时构造不产生任何缓冲，错误携带请求长度与原因；
//! - `BudgetedAllocator` 在多个连接之间共享额度，释放后额度可被复用。

use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use spark_connbuf::{
    AllocError, AllocFailure, BudgetedAllocator, BufferAllocator, ConnBufferError,
    ConnectionBuffer, ConnectionBufferConfig, GlobalAllocator,
};

/// `RecordingAllocator`：记录每次分配与归还长度的探针实现。
///
/// - 分配委托给 [`GlobalAllocator`]；
/// - `take_events` 在断言前清空事件，确保各测试互不干扰。
#[derive(Default)]
struct RecordingAllocator {
    events: Mutex<Vec<Event>>,
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Allocate(usize),
    Deallocate(usize),
}

impl RecordingAllocator {
    fn take_events(&self) -> Vec<Event> {
        self.events
            .lock()
            .expect("mutex poisoned")
            .drain(..)
            .collect()
    }
}

impl BufferAllocator for RecordingAllocator {
    fn allocate(&self, size: usize) -> Result<BytesMut, AllocError> {
        self.events
            .lock()
            .expect("mutex poisoned")
            .push(Event::Allocate(size));
        GlobalAllocator.allocate(size)
    }

    fn deallocate(&self, region: BytesMut) {
        self.events
            .lock()
            .expect("mutex poisoned")
            .push(Event::Deallocate(region.len()));
    }
}

/// 永远失败的分配器，用于验证构造失败路径。
struct ExhaustedAllocator;

impl BufferAllocator for ExhaustedAllocator {
    fn allocate(&self, size: usize) -> Result<BytesMut, AllocError> {
        Err(AllocError::new(size, AllocFailure::OutOfMemory))
    }

    fn deallocate(&self, _region: BytesMut) {
        panic!("从未分配成功，不应收到归还");
    }
}

/// 返回过短区域的分配器，缓冲应拒绝并立即归还。
#[derive(Default)]
struct ShortAllocator {
    returned: Mutex<Vec<usize>>,
}

impl BufferAllocator for ShortAllocator {
    fn allocate(&self, size: usize) -> Result<BytesMut, AllocError> {
        Ok(BytesMut::zeroed(size / 2))
    }

    fn deallocate(&self, region: BytesMut) {
        self.returned
            .lock()
            .expect("mutex poisoned")
            .push(region.len());
    }
}

/// 总是返回两倍长度区域的分配器，用于验证预算按请求长度计费。
struct DoublingAllocator;

impl BufferAllocator for DoublingAllocator {
    fn allocate(&self, size: usize) -> Result<BytesMut, AllocError> {
        Ok(BytesMut::zeroed(size * 2))
    }

    fn deallocate(&self, _region: BytesMut) {}
}

#[test]
fn release_and_drop_deallocate_exactly_once() {
    let recorder = Arc::new(RecordingAllocator::default());
    let mut buffer =
        ConnectionBuffer::with_allocator(32, recorder.clone()).expect("创建缓冲");
    assert_eq!(recorder.take_events(), vec![Event::Allocate(32)]);

    buffer.release();
    buffer.release();
    drop(buffer);
    assert_eq!(recorder.take_events(), vec![Event::Deallocate(32)]);
}

#[test]
fn drop_without_release_returns_region() {
    let recorder = Arc::new(RecordingAllocator::default());
    {
        let mut buffer =
            ConnectionBuffer::with_allocator(8, recorder.clone()).expect("创建缓冲");
        buffer.write(b"abc").expect("写入");
    }
    assert_eq!(
        recorder.take_events(),
        vec![Event::Allocate(8), Event::Deallocate(8)]
    );
}

#[test]
fn zero_capacity_never_reaches_allocator() {
    let recorder = Arc::new(RecordingAllocator::default());
    let err = ConnectionBuffer::with_allocator(0, recorder.clone()).expect_err("容量为 0");
    assert!(matches!(err, ConnBufferError::InvalidArgument { .. }));
    assert!(recorder.take_events().is_empty(), "参数校验应先于分配");
}

#[test]
fn allocation_failure_yields_no_buffer() {
    let err = ConnectionBuffer::with_allocator(64, Arc::new(ExhaustedAllocator))
        .expect_err("分配器失败时构造应失败");
    match err {
        ConnBufferError::Allocation { requested, source } => {
            assert_eq!(requested, 64);
            assert_eq!(source.reason(), AllocFailure::OutOfMemory);
        }
        other => panic!("预期分配错误，实际为 {other:?}"),
    }
}

#[test]
fn undersized_region_is_rejected_and_returned() {
    let allocator = Arc::new(ShortAllocator::default());
    let err = ConnectionBuffer::with_allocator(16, allocator.clone())
        .expect_err("过短区域应被拒绝");
    match err {
        ConnBufferError::Allocation { source, .. } => {
            assert_eq!(source.reason(), AllocFailure::Undersized { provided: 8 });
        }
        other => panic!("预期分配错误，实际为 {other:?}"),
    }
    assert_eq!(*allocator.returned.lock().expect("mutex poisoned"), vec![8]);
}

#[test]
fn budget_is_shared_across_connections() {
    let budget = Arc::new(BudgetedAllocator::new(64));
    let config = ConnectionBufferConfig::new(32);

    let first = config.build_with(budget.clone()).expect("第一个连接");
    let second = config.build_with(budget.clone()).expect("第二个连接");
    let err = config
        .build_with(budget.clone())
        .expect_err("额度耗尽后新连接应被拒绝");
    assert_eq!(
        err,
        ConnBufferError::Allocation {
            requested: 32,
            source: AllocError::new(
                32,
                AllocFailure::BudgetExceeded {
                    budget: 64,
                    in_use: 64
                }
            ),
        }
    );

    drop(first);
    let third = config.build_with(budget.clone()).expect("释放后额度可复用");
    let stats = budget.statistics();
    assert_eq!(stats.in_use, 64);
    assert_eq!(stats.peak, 64);
    assert_eq!(stats.allocations, 3);
    assert_eq!(stats.deallocations, 1);
    assert_eq!(stats.failed_allocations, 1);

    drop(second);
    drop(third);
    assert_eq!(budget.statistics().in_use, 0);
}

#[test]
fn budget_wraps_custom_inner_allocator() {
    let recorder = Arc::new(RecordingAllocator::default());
    let budget = Arc::new(BudgetedAllocator::with_inner(16, recorder.clone()));
    assert_eq!(budget.budget(), 16);

    let buffer = ConnectionBuffer::with_allocator(16, budget.clone()).expect("创建缓冲");
    drop(buffer);
    assert_eq!(
        recorder.take_events(),
        vec![Event::Allocate(16), Event::Deallocate(16)]
    );
    assert!(ConnectionBuffer::with_allocator(17, budget).is_err());
    assert!(recorder.take_events().is_empty(), "超出额度的请求不应到达内层");
}

#[test]
fn budget_holds_when_inner_returns_longer_regions() {
    let budget = Arc::new(BudgetedAllocator::with_inner(32, Arc::new(DoublingAllocator)));
    let config = ConnectionBufferConfig::new(16);

    let first = config.build_with(budget.clone()).expect("第一个连接");
    let second = config.build_with(budget.clone()).expect("第二个连接");
    assert_eq!(budget.statistics().in_use, 32);

    drop(first);
    assert_eq!(budget.statistics().in_use, 16, "存活连接的额度不应被抹去");

    let third = config.build_with(budget.clone()).expect("释放一个后可再接入一个");
    assert!(
        config.build_with(budget.clone()).is_err(),
        "两个存活连接已占满额度"
    );
    assert!(budget.statistics().in_use <= budget.budget());

    drop(second);
    drop(third);
    assert_eq!(budget.statistics().in_use, 0);
}
