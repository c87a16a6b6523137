//! Byte ranges and chunk planning for resumable uploads

/// Half-open interval `[start, end)` of a blob's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start {} after end {}", start, end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `Content-Range` value with an inclusive end (`start-(end-1)`); `None` for an empty range
    pub fn content_range(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(format!("{}-{}", self.start, self.end - 1))
        }
    }
}

/// Partial writes followed by the finalizing write for one chunked upload.
///
/// The partial ranges are all exactly `chunk_size` long, contiguous and
/// increasing; the final range covers the remainder and may be empty when the
/// total is an exact multiple of the chunk size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    partials: Vec<ByteRange>,
    last: ByteRange,
}

impl UploadPlan {
    pub fn new(total: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let full_chunks = total / chunk_size;

        let partials = (0..full_chunks)
            .map(|i| ByteRange::new(i * chunk_size, (i + 1) * chunk_size))
            .collect();
        let last = ByteRange::new(full_chunks * chunk_size, total);

        Self { partials, last }
    }

    pub fn partials(&self) -> &[ByteRange] {
        &self.partials
    }

    pub fn last(&self) -> ByteRange {
        self.last
    }

    pub fn total(&self) -> u64 {
        self.last.end
    }

    /// Writes the plan sends: every partial plus the finalizing one, which is
    /// sent even when its range is empty
    pub fn write_count(&self) -> usize {
        self.partials.len() + 1
    }
}
