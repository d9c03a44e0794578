//! Range alignment for CTR decryption.

use std::{
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use common::protocol::ByteRange;
use tokio::io::{AsyncRead, ReadBuf};

/// Widen `range` so it starts on an `align` boundary.
///
/// Returns the range to request and the number of leading bytes to drop
/// from the response.
pub fn aligned_request(range: ByteRange, align: u64) -> (ByteRange, u64) {
    let aligned = range.align_down(align);
    (aligned, range.start - aligned.start)
}

/// Reader that drops the first `skip` bytes of `inner`.
#[derive(Debug)]
pub struct DiscardReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> DiscardReader<R> {
    pub fn new(inner: R, skip: u64) -> Self {
        Self {
            inner,
            remaining: skip,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DiscardReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut scratch = [0u8; 64];
        while this.remaining > 0 {
            let want = this.remaining.min(scratch.len() as u64) as usize;
            let mut dropped = ReadBuf::new(&mut scratch[..want]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut dropped))?;
            let n = dropped.filled().len();
            if n == 0 {
                // Source ended inside the skipped prefix.
                this.remaining = 0;
                return Poll::Ready(Ok(()));
            }
            this.remaining -= n as u64;
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}
