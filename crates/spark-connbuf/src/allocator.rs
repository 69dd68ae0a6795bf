use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// `BufferAllocator` 描述连接缓冲获取与归还底层存储的策略。
///
/// # 设计初衷（Why）
/// - 连接缓冲只关心“拿到一块定长区域”和“用完后还回去”，不关心区域来自堆、slab 还是共享内存；
/// - 将策略抽象为 trait 后，服务端可以按连接类型注入不同的分配器，例如为长连接设置全局内存上限。
///
/// # 使用方式（How）
/// - 构造 [`ConnectionBuffer`](crate::ConnectionBuffer) 时以 `Arc<dyn BufferAllocator>` 注入，
///   缺省使用 [`GlobalAllocator`]；
/// - 缓冲在整个生命周期内只调用一次 `allocate`，并在释放时把同一块区域交还给 `deallocate`。
///
/// # 契约定义（What）
/// - `allocate(size)`：成功时返回长度**至少**为 `size` 的区域，trait 本身不要求清零；失败时返回 [`AllocError`]；
/// - `deallocate(region)`：接收此前由同一实例分配的区域，每个区域恰好归还一次；
/// - **前置条件**：实现必须线程安全，多个连接可能共享同一分配器；
/// - **后置条件**：`deallocate` 不得 panic，否则会在 `Drop` 路径上终止进程。
pub trait BufferAllocator: Send + Sync + 'static {
    /// 申请 `size` 字节的存储区域。
    fn allocate(&self, size: usize) -> Result<BytesMut, AllocError>;

    /// 归还由 `allocate` 产生的区域。
    fn deallocate(&self, region: BytesMut);
}

/// 分配失败的原因。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AllocFailure {
    /// 底层堆无法满足请求。
    #[error("out of memory")]
    OutOfMemory,
    /// 预算型分配器的额度不足。
    #[error("budget of {budget} bytes exceeded with {in_use} bytes in use")]
    BudgetExceeded { budget: usize, in_use: usize },
    /// 分配器返回的区域短于请求长度。
    #[error("allocator returned a region of {provided} bytes")]
    Undersized { provided: usize },
}

/// 一次失败的分配请求。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("failed to allocate {requested} bytes: {reason}")]
pub struct AllocError {
    requested: usize,
    reason: AllocFailure,
}

impl AllocError {
    /// 记录请求长度与失败原因。
    pub fn new(requested: usize, reason: AllocFailure) -> Self {
        Self { requested, reason }
    }

    /// 返回请求的字节数。
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// 返回失败原因。
    pub fn reason(&self) -> AllocFailure {
        self.reason
    }
}

/// 基于全局堆的默认分配策略。
///
/// 使用可失败的预留接口申请内存，超大请求会以 [`AllocFailure::OutOfMemory`] 返回，
/// 而不是触发 `handle_alloc_error` 直接终止进程。
///
/// 区域会被清零：`BytesMut` 的长度必须覆盖整块容量才能安全切片，清零避免了 `unsafe set_len`，
/// 也保证上一个连接的数据不会出现在新缓冲的写视图里。
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalAllocator;

impl BufferAllocator for GlobalAllocator {
    fn allocate(&self, size: usize) -> Result<BytesMut, AllocError> {
        let mut raw = Vec::new();
        raw.try_reserve_exact(size)
            .map_err(|_| AllocError::new(size, AllocFailure::OutOfMemory))?;
        raw.resize(size, 0);
        Ok(into_region(raw))
    }

    fn deallocate(&self, region: BytesMut) {
        drop(region);
    }
}

/// 将独占的 `Vec<u8>` 转为可写区域。
///
/// 新建的 `Bytes` 引用计数必然为 1，`try_into_mut` 可直接夺回所有权，不发生拷贝。
fn into_region(raw: Vec<u8>) -> BytesMut {
    match Bytes::from(raw).try_into_mut() {
        Ok(region) => region,
        Err(shared) => BytesMut::from(shared.as_ref()),
    }
}

/// `BudgetedAllocator` 为共享它的全部连接缓冲设置未归还字节数的上限。
///
/// # 模块角色（Why）
/// - 长连接服务的内存主要消耗在每连接缓冲上，连接数突增时需要在分配阶段就拒绝，
///   而不是等进程被 OOM Killer 回收；
/// - 拒绝以 [`AllocFailure::BudgetExceeded`] 形式返回，调用方可据此关闭新连接或降级。
///
/// # 核心机制（How）
/// - 先以 `fetch_update` 原子地预占额度，再委托内层分配器真正申请内存；
///   内层失败时回滚预占，保证 `in_use` 与实际持有的区域一致；
/// - 内层返回的区域长于请求时截断到 `size`，归还时按 `region.len()` 扣减的额度与预占量相同；
/// - `AllocatorMetrics` 以原子计数记录分配、归还、失败次数与峰值，
///   [`BudgetedAllocator::statistics`] 提供快照。
///
/// # 契约说明（What）
/// - **线程安全**：全部共享状态为原子变量，满足 `Send + Sync + 'static`；
/// - **后置条件**：任一时刻 `in_use <= budget`；归还区域后额度立即可被复用。
///
/// # 设计权衡（Trade-offs）
/// - 额度按请求长度计费，而非内层分配器的实际容量，统计可能略低于真实驻留内存；
/// - 归还时以 `region.len()` 扣减额度，调用方不得在归还前改变区域长度。
pub struct BudgetedAllocator {
    budget: usize,
    inner: Arc<dyn BufferAllocator>,
    metrics: AllocatorMetrics,
}

impl BudgetedAllocator {
    /// 以全局堆为内层策略创建预算分配器。
    pub fn new(budget: usize) -> Self {
        Self::with_inner(budget, Arc::new(GlobalAllocator))
    }

    /// 包装任意内层分配器。
    pub fn with_inner(budget: usize, inner: Arc<dyn BufferAllocator>) -> Self {
        Self {
            budget,
            inner,
            metrics: AllocatorMetrics::default(),
        }
    }

    /// 返回预算上限。
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// 返回当前计数快照。
    pub fn statistics(&self) -> AllocatorStats {
        AllocatorStats {
            budget: self.budget,
            in_use: self.metrics.in_use.load(Ordering::Relaxed),
            peak: self.metrics.peak.load(Ordering::Relaxed),
            allocations: self.metrics.allocations.load(Ordering::Relaxed),
            deallocations: self.metrics.deallocations.load(Ordering::Relaxed),
            failed_allocations: self.metrics.failed_allocations.load(Ordering::Relaxed),
        }
    }

    /// 原子地预占 `size` 字节额度，失败时返回预占前的占用量。
    fn reserve(&self, size: usize) -> Result<usize, usize> {
        let budget = self.budget;
        self.metrics
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(size)
                    .filter(|next| *next <= budget)
            })
    }
}

impl BufferAllocator for BudgetedAllocator {
    fn allocate(&self, size: usize) -> Result<BytesMut, AllocError> {
        let previous = match self.reserve(size) {
            Ok(previous) => previous,
            Err(in_use) => {
                self.metrics.record_failure();
                tracing::warn!(
                    requested = size,
                    budget = self.budget,
                    in_use,
                    "connection buffer budget exhausted"
                );
                return Err(AllocError::new(
                    size,
                    AllocFailure::BudgetExceeded {
                        budget: self.budget,
                        in_use,
                    },
                ));
            }
        };

        match self.inner.allocate(size) {
            Ok(mut region) => {
                region.truncate(size);
                self.metrics.record_allocation(previous + size);
                Ok(region)
            }
            Err(err) => {
                saturating_sub(&self.metrics.in_use, size);
                self.metrics.record_failure();
                Err(err)
            }
        }
    }

    fn deallocate(&self, region: BytesMut) {
        let size = region.len();
        self.inner.deallocate(region);
        saturating_sub(&self.metrics.in_use, size);
        self.metrics.deallocations.fetch_add(1, Ordering::Relaxed);
    }
}

/// 预算分配器的计数快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// 预算上限。
    pub budget: usize,
    /// 已分配且尚未归还的字节数。
    pub in_use: usize,
    /// `in_use` 的历史峰值。
    pub peak: usize,
    /// 成功分配次数。
    pub allocations: u64,
    /// 归还次数。
    pub deallocations: u64,
    /// 因预算不足或内层失败而拒绝的次数。
    pub failed_allocations: u64,
}

#[derive(Default)]
struct AllocatorMetrics {
    in_use: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicU64,
    deallocations: AtomicU64,
    failed_allocations: AtomicU64,
}

impl AllocatorMetrics {
    fn record_allocation(&self, in_use: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.peak.fetch_max(in_use, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed_allocations.fetch_add(1, Ordering::Relaxed);
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(value))
    });
}
