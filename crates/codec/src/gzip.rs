//! Gzip with pooled scratch buffers.
//!
//! Every compress/decompress call needs a growable output buffer; pooling
//! them keeps the hot request path free of large allocations. The pool is a
//! lock-free queue of `BytesMut`, cleared on return. Buffers are handed back
//! on every exit path, including decode failures.

use std::io::{self, Write};

use bytes::buf::Writer;
use bytes::{BufMut, Bytes, BytesMut};
use crossbeam::queue::ArrayQueue;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

const DEFAULT_POOL_SIZE: usize = 16;
const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

struct BufferPool {
    queue: ArrayQueue<BytesMut>,
    buffer_capacity: usize,
}

impl BufferPool {
    fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        let queue = ArrayQueue::new(pool_size);
        for _ in 0..pool_size {
            let _ = queue.push(BytesMut::with_capacity(buffer_capacity));
        }
        Self {
            queue,
            buffer_capacity,
        }
    }

    fn get(&self) -> BytesMut {
        self.queue
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_capacity))
    }

    fn put(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() >= self.buffer_capacity {
            let _ = self.queue.push(buf);
        }
    }
}

/// Shared gzip codec. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct GzipCodec {
    pool: std::sync::Arc<BufferPool>,
}

impl GzipCodec {
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        Self {
            pool: std::sync::Arc::new(BufferPool::new(pool_size, buffer_capacity)),
        }
    }

    /// Compress `data` with the default level.
    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let buf = self.pool.get();
        let mut encoder = GzEncoder::new(buf.writer(), Compression::default());
        encoder.write_all(data)?;
        let buf = encoder.finish()?.into_inner();

        let out = Bytes::copy_from_slice(&buf);
        self.pool.put(buf);
        Ok(out)
    }

    /// Decompress a gzip stream.
    pub fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let buf = self.pool.get();
        let mut writer = buf.writer();
        let mut decoder = GzDecoder::new(data);

        let result = copy_decoded(&mut decoder, &mut writer);
        let buf = writer.into_inner();
        match result {
            Ok(()) => {
                let out = Bytes::copy_from_slice(&buf);
                self.pool.put(buf);
                Ok(out)
            }
            Err(e) => {
                self.pool.put(buf);
                Err(e)
            }
        }
    }

    /// Buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.pool.queue.len()
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_BUFFER_CAPACITY)
    }
}

fn copy_decoded(decoder: &mut GzDecoder<&[u8]>, writer: &mut Writer<BytesMut>) -> io::Result<()> {
    io::copy(decoder, writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let codec = GzipCodec::default();
        let data = b"the same bytes come back out".repeat(100);
        let compressed = codec.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(codec.decompress(&compressed).unwrap(), &data[..]);
    }

    #[test]
    fn roundtrip_empty() {
        let codec = GzipCodec::default();
        let compressed = codec.compress(b"").unwrap();
        assert_eq!(codec.decompress(&compressed).unwrap().len(), 0);
    }

    #[test]
    fn decompress_rejects_garbage() {
        let codec = GzipCodec::default();
        assert!(codec.decompress(b"definitely not gzip").is_err());
    }

    #[test]
    fn buffers_return_to_pool_after_error() {
        let codec = GzipCodec::new(2, 1024);
        let before = codec.available();
        let _ = codec.decompress(b"garbage");
        assert_eq!(codec.available(), before);
    }

    #[test]
    fn pool_survives_concurrent_use() {
        let codec = GzipCodec::new(4, 1024);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let codec = codec.clone();
                std::thread::spawn(move || {
                    let data = vec![i as u8; 4096];
                    let compressed = codec.compress(&data).unwrap();
                    assert_eq!(codec.decompress(&compressed).unwrap(), &data[..]);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
