//! AES-256-CTR content cipher and the streaming reader that applies it.
//!
//! CTR mode turns AES into a keystream; encrypting and decrypting are the
//! same XOR, ciphertext is exactly as long as plaintext, and any 16-byte
//! block boundary can be reached by adding to the IV counter.

use std::io::{self, Read};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use aes::Aes256;
use common::CryptoError;
use ctr::cipher::{KeyIvInit, StreamCipher};
use tokio::io::{AsyncRead, ReadBuf};

use super::cipher_data::{CipherData, IV_LEN, KEY_LEN};

/// AES-256 with a 128-bit big-endian counter block.
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Content cipher bound to one [`CipherData`].
///
/// Every call to [`encrypt_content`](Self::encrypt_content) or
/// [`decrypt_content`](Self::decrypt_content) starts a new keystream at the
/// cipher's IV, owned by the returned reader. Ciphers for other byte ranges
/// are derived with [`clone_with`](Self::clone_with) or [`seeked`](Self::seeked).
#[derive(Clone, Debug)]
pub struct ContentCipher {
    cipher_data: CipherData,
}

impl ContentCipher {
    /// Bind a cipher to `cipher_data`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidConfig`] if the key is not [`KEY_LEN`]
    /// bytes or the IV is not [`IV_LEN`] bytes.
    pub fn new(cipher_data: CipherData) -> Result<Self, CryptoError> {
        if cipher_data.key.len() != KEY_LEN {
            return Err(CryptoError::InvalidConfig(format!(
                "content key must be {KEY_LEN} bytes, got {}",
                cipher_data.key.len()
            )));
        }
        if cipher_data.iv.len() != IV_LEN {
            return Err(CryptoError::InvalidConfig(format!(
                "content IV must be {IV_LEN} bytes, got {}",
                cipher_data.iv.len()
            )));
        }
        Ok(Self { cipher_data })
    }

    /// The key material this cipher is bound to.
    pub fn cipher_data(&self) -> &CipherData {
        &self.cipher_data
    }

    /// Wrap a plaintext source; reads yield ciphertext.
    pub fn encrypt_content<R>(&self, src: R) -> CryptoReader<R> {
        CryptoReader::new(src, self.keystream())
    }

    /// Wrap a ciphertext source; reads yield plaintext.
    pub fn decrypt_content<R>(&self, src: R) -> CryptoReader<R> {
        CryptoReader::new(src, self.keystream())
    }

    /// Ciphertext length for `plaintext_len` bytes of input.
    pub fn encrypted_len(&self, plaintext_len: u64) -> u64 {
        plaintext_len
    }

    /// Granularity at which offsets must be aligned before seeking.
    pub fn align_len(&self) -> u64 {
        self.cipher_data.iv.len() as u64
    }

    /// New cipher bound to `cipher_data`, typically a seeked clone of this one's.
    pub fn clone_with(&self, cipher_data: CipherData) -> Result<Self, CryptoError> {
        Self::new(cipher_data)
    }

    /// New cipher whose keystream starts `offset` bytes into this one's.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidConfig`] if `offset` is not a multiple of
    /// [`align_len`](Self::align_len).
    pub fn seeked(&self, offset: u64) -> Result<Self, CryptoError> {
        if offset % self.align_len() != 0 {
            return Err(CryptoError::InvalidConfig(format!(
                "seek offset {offset} is not aligned to {} bytes",
                self.align_len()
            )));
        }
        let mut cd = self.cipher_data.clone();
        cd.seek(offset);
        self.clone_with(cd)
    }

    fn keystream(&self) -> Aes256Ctr {
        // Lengths were checked in `new`.
        Aes256Ctr::new(
            self.cipher_data.key.as_slice().into(),
            self.cipher_data.iv.as_slice().into(),
        )
    }
}

/// Reader that XORs everything read from `inner` with a CTR keystream.
///
/// Implements both [`std::io::Read`] and [`tokio::io::AsyncRead`]. After
/// [`close`](Self::close), every read reports end-of-stream.
pub struct CryptoReader<R> {
    inner: R,
    keystream: Aes256Ctr,
    closed: bool,
}

impl<R> CryptoReader<R> {
    fn new(inner: R, keystream: Aes256Ctr) -> Self {
        Self {
            inner,
            keystream,
            closed: false,
        }
    }

    /// Mark the stream exhausted.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<R: Read> Read for CryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        self.keystream.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CryptoReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.keystream.apply_keystream(&mut buf.filled_mut()[before..]);
        Poll::Ready(Ok(()))
    }
}
