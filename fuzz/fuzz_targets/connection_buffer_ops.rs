#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spark_connbuf::ConnectionBuffer;
use std::collections::VecDeque;

/// Fuzz 输入：缓冲容量与一串读写指令。
///
/// - **Why**：游标算术与压缩搬移是越界访问最可能出现的地方，任意指令组合都必须保持
///   `read <= write <= capacity` 且读出的字节与写入顺序一致。
/// - **How**：每条指令同时作用于缓冲与 `VecDeque` 影子模型，逐步比对长度与内容。
#[derive(Debug, Arbitrary)]
struct BufferCase {
    capacity: u8,
    ops: Vec<BufferOp>,
}

#[derive(Debug, Arbitrary)]
enum BufferOp {
    Write(Vec<u8>),
    Read(u8),
    Peek(u8),
    ReadNoCopy(u8),
    WriteNoCopy { fill: u8, len: u8 },
    Reset,
    Release,
}

fuzz_target!(|case: BufferCase| {
    let capacity = usize::from(case.capacity);
    let Ok(mut buffer) = ConnectionBuffer::new(capacity) else {
        assert_eq!(capacity, 0, "仅容量为 0 时允许构造失败");
        return;
    };
    let mut model: VecDeque<u8> = VecDeque::new();

    for op in case.ops {
        if buffer.is_released() {
            assert!(buffer.write(b"x").is_err());
            assert_eq!(buffer.readable_length(), 0);
            return;
        }
        match op {
            BufferOp::Write(src) => {
                let n = buffer.write(&src).expect("写入");
                model.extend(&src[..n]);
            }
            BufferOp::Read(len) => {
                let mut dst = vec![0u8; usize::from(len)];
                let n = buffer.read(&mut dst).expect("读取");
                let expected: Vec<u8> = model.drain(..n).collect();
                assert_eq!(&dst[..n], expected.as_slice());
            }
            BufferOp::Peek(len) => {
                let mut dst = vec![0u8; usize::from(len)];
                let n = buffer.peek(&mut dst).expect("peek");
                assert!(model.iter().take(n).eq(dst[..n].iter()));
            }
            BufferOp::ReadNoCopy(len) => {
                let n = buffer.read_nocopy(usize::from(len)).expect("推进");
                model.drain(..n);
            }
            BufferOp::WriteNoCopy { fill, len } => {
                let view = buffer.write_view();
                let len = usize::from(len).min(view.len());
                view[..len].fill(fill);
                let n = buffer.write_nocopy(len).expect("提交");
                model.extend(std::iter::repeat_n(fill, n));
            }
            BufferOp::Reset => {
                buffer.reset();
                model.clear();
            }
            BufferOp::Release => {
                buffer.release();
                model.clear();
            }
        }

        assert_eq!(buffer.readable_length(), model.len());
        assert!(buffer.readable_length() + buffer.writable_length() <= capacity);
        assert!(model.iter().eq(buffer.read_view().iter()));
    }
});
