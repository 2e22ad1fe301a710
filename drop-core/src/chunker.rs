//! Fixed-size slicing of file bytes into chunk frames.

/// Iterator over the non-empty chunks of a byte slice.
///
/// A zero-length input yields no chunks at all.
#[derive(Debug, Clone)]
pub struct Chunker<'a> {
    inner: std::slice::Chunks<'a, u8>,
}

impl<'a> Chunker<'a> {
    /// Slice `data` into chunks of at most `chunk_size` bytes.
    ///
    /// A `chunk_size` of zero is treated as one byte.
    pub fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            inner: data.chunks(chunk_size.max(1)),
        }
    }
}

impl<'a> Iterator for Chunker<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Chunker<'_> {}

/// Number of chunk frames a file of `len` bytes produces.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1))
}
