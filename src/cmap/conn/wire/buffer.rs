use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

const DEFAULT_CAPACITY: usize = 1024;

/// A growable byte buffer that accumulates bytes read from a transport. `len` is the logical
/// length; the backing storage is always zero-initialized up to its capacity.
#[derive(Debug)]
pub(crate) struct WireBuffer {
    data: Vec<u8>,
    len: usize,
}

impl Default for WireBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl WireBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Grows the backing storage to the next power of two that can hold `additional` more bytes.
    fn reserve(&mut self, additional: usize) {
        let needed = self.len + additional;
        if needed > self.data.len() {
            self.data.resize(needed.next_power_of_two(), 0);
        }
    }

    pub(crate) fn append(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Reads at least `min_bytes` new bytes from `transport`, taking whatever more is available
    /// up to the buffer's headroom. Returns the new logical length.
    pub(crate) async fn fill_from_transport<R: AsyncRead + Unpin>(
        &mut self,
        transport: &mut R,
        min_bytes: usize,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        check_timeout(timeout)?;
        self.reserve(min_bytes);

        let start = self.len;
        let read = async {
            while self.len - start < min_bytes {
                let n = transport.read(&mut self.data[self.len..]).await?;
                if n == 0 {
                    break;
                }
                self.len += n;
            }
            Ok::<_, std::io::Error>(())
        };
        run_with_timeout(read, timeout).await.map_err(|e| {
            Error::stream(format!("Failed to buffer {} bytes", min_bytes)).with_source(e)
        })?;

        if self.len - start < min_bytes {
            return Err(Error::stream(format!(
                "Failed to buffer {} bytes",
                min_bytes
            )));
        }
        Ok(self.len)
    }

    /// Reads exactly `size` bytes from `transport` and appends them.
    pub(crate) async fn append_from_transport<R: AsyncRead + Unpin>(
        &mut self,
        transport: &mut R,
        size: usize,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        check_timeout(timeout)?;
        self.reserve(size);

        let start = self.len;
        let read = transport.read_exact(&mut self.data[start..start + size]);
        run_with_timeout(read, timeout).await.map_err(|e| {
            Error::stream(format!(
                "Failed to read {} bytes: socket error or timeout",
                size
            ))
            .with_source(e)
        })?;
        self.len += size;
        Ok(self.len)
    }

    /// Removes the first `n` bytes, shifting any remaining bytes to the front.
    pub(crate) fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Resets the logical length. When `zero` is set the storage is overwritten as well.
    pub(crate) fn clear(&mut self, zero: bool) {
        if zero {
            self.data.fill(0);
        }
        self.len = 0;
    }
}

fn check_timeout(timeout: Option<Duration>) -> Result<()> {
    if let Some(timeout) = timeout {
        if timeout.as_millis() > i32::MAX as u128 {
            return Err(Error::invalid_argument(format!(
                "timeout_msec value {} exceeds supported 32-bit range",
                timeout.as_millis()
            )));
        }
    }
    Ok(())
}

async fn run_with_timeout<F, T>(future: F, timeout: Option<Duration>) -> Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, future).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::network_timeout()),
        },
        None => Ok(future.await?),
    }
}
