//! Stream utilities.

use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use digest::{Digest, Output as DigestOutput};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::OnceCell;

/// Stream filter that hashes the bytes passing through it.
///
/// The digest and byte count are published on the shared cell once
/// the inner reader reaches EOF; before that, `get()` on the cell
/// returns `None`.
pub struct StreamHasher<R, D: Digest> {
    inner: R,
    state: HashState<D>,
    finalized: Arc<OnceCell<(DigestOutput<D>, usize)>>,
}

enum HashState<D> {
    /// Still reading: the running digest and byte count.
    Running { digest: D, bytes_seen: usize },

    /// EOF was observed and the digest has been published.
    Finished,
}

impl<R: AsyncRead + Unpin, D: Digest + Unpin> StreamHasher<R, D> {
    pub fn new(inner: R, digest: D) -> (Self, Arc<OnceCell<(DigestOutput<D>, usize)>>) {
        let finalized = Arc::new(OnceCell::new());

        let hasher = Self {
            inner,
            state: HashState::Running {
                digest,
                bytes_seen: 0,
            },
            finalized: finalized.clone(),
        };

        (hasher, finalized)
    }

    /// Feeds newly-read bytes into the digest.
    ///
    /// An empty slice means EOF: the digest is finalized and
    /// published exactly once.
    fn observe(&mut self, newly_filled: &[u8]) {
        if newly_filled.is_empty() {
            if let HashState::Running { digest, bytes_seen } =
                mem::replace(&mut self.state, HashState::Finished)
            {
                self.finalized
                    .set((digest.finalize(), bytes_seen))
                    .expect("Digest has already been published");
            }
            return;
        }

        match &mut self.state {
            HashState::Running { digest, bytes_seen } => {
                digest.update(newly_filled);
                *bytes_seen += newly_filled.len();
            }
            HashState::Finished => panic!("Stream produced data after EOF"),
        }
    }
}

impl<R: AsyncRead + Unpin, D: Digest + Unpin> AsyncRead for StreamHasher<R, D> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<tokio::io::Result<()>> {
        let this = self.get_mut();
        let filled_before = buf.filled().len();

        let result = Pin::new(&mut this.inner).poll_read(cx, buf);

        match &result {
            Poll::Ready(Ok(())) => {
                this.observe(&buf.filled()[filled_before..]);
            }
            Poll::Ready(Err(_)) => {
                // Errors never come with data
                debug_assert_eq!(filled_before, buf.filled().len());
            }
            Poll::Pending => {}
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sha2::Sha256;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_stream_hasher() {
        let expected = b"hello world";

        let (mut read, finalized) = StreamHasher::new(expected.as_slice(), Sha256::new());
        assert!(finalized.get().is_none());

        let mut buf = Vec::new();
        read.read_to_end(&mut buf).await.unwrap();
        assert_eq!(expected, buf.as_slice());

        let (hash, count) = finalized.get().unwrap();
        assert_eq!(expected.len(), *count);

        let mut hasher = Sha256::new();
        digest::Digest::update(&mut hasher, expected);
        assert_eq!(hasher.finalize(), *hash);
    }

    #[tokio::test]
    async fn test_finalizes_only_at_eof() {
        let data = b"0123456789";

        let (mut read, finalized) = StreamHasher::new(data.as_slice(), Sha256::new());

        // Drain in small steps; the digest stays unpublished until
        // the reader signals EOF
        let mut sink = [0u8; 4];
        loop {
            let n = read.read(&mut sink).await.unwrap();
            if n == 0 {
                break;
            }
            assert!(finalized.get().is_none());
        }

        let (hash, count) = finalized.get().unwrap();
        assert_eq!(data.len(), *count);

        let mut hasher = Sha256::new();
        digest::Digest::update(&mut hasher, data);
        assert_eq!(hasher.finalize(), *hash);
    }
}
