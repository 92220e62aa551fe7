//! Streaming zlib decompression
//!
//! The gateway concatenates zlib sync-flush blocks on one deflate stream;
//! every logical message ends with the 4-byte suffix `00 00 FF FF`. The
//! inflater buffers incoming bytes, cuts them at each suffix, and inflates
//! every complete segment through one persistent [`flate2::Decompress`],
//! so message boundaries are preserved no matter how the transport chunks
//! the bytes.
//!
//! An inflate failure poisons the whole stream: the shard treats it as
//! fatal and reconnects.

use flate2::{Decompress, FlushDecompress, Status};
use gateway_common::{GatewayError, GatewayResult};

/// Sync-flush suffix terminating each logical message
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Output growth step while inflating
const DECODE_CHUNK: usize = 16 * 1024;

/// Streaming inflater for sync-flushed gateway frames
#[derive(Debug)]
pub struct Inflater {
    stream: Decompress,
    /// Compressed bytes received but not yet terminated by a suffix
    pending: Vec<u8>,
}

impl Inflater {
    /// Create an inflater expecting a zlib-headed stream
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream: Decompress::new(true),
            pending: Vec::new(),
        }
    }

    /// Feed a chunk of compressed bytes
    ///
    /// Returns every logical message completed by this chunk, in input
    /// order. A chunk may complete zero, one, or several messages.
    ///
    /// # Errors
    /// Returns a compression error if the stream is corrupt; the inflater
    /// must be discarded along with the connection that fed it.
    pub fn push(&mut self, chunk: &[u8]) -> GatewayResult<Vec<Vec<u8>>> {
        self.pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(end) = find_suffix(&self.pending) {
            let segment: Vec<u8> = self.pending.drain(..end).collect();
            messages.push(self.inflate(&segment)?);
        }

        if !messages.is_empty() && !self.pending.is_empty() {
            tracing::trace!(
                deferred = self.pending.len(),
                "compressed bytes carried over past message boundary"
            );
        }

        Ok(messages)
    }

    /// Number of buffered compressed bytes awaiting a suffix
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn inflate(&mut self, input: &[u8]) -> GatewayResult<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len().max(DECODE_CHUNK));
        let mut consumed = 0usize;

        loop {
            if out.len() == out.capacity() {
                out.reserve(DECODE_CHUNK);
            }

            let before_in = self.stream.total_in();
            let before_out = self.stream.total_out();

            let status = self
                .stream
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| GatewayError::Compression(e.to_string()))?;

            consumed += (self.stream.total_in() - before_in) as usize;
            let produced = (self.stream.total_out() - before_out) as usize;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    // done once all input is taken and the output buffer
                    // was not filled to the brim (nothing left inside)
                    if consumed >= input.len() && out.len() < out.capacity() {
                        break;
                    }
                    if consumed < input.len() && produced == 0 && out.len() < out.capacity() {
                        return Err(GatewayError::Compression(
                            "inflate made no progress on remaining input".to_string(),
                        ));
                    }
                }
            }
        }

        Ok(out)
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the end offset (exclusive) of the first suffix-terminated segment
fn find_suffix(buf: &[u8]) -> Option<usize> {
    buf.windows(ZLIB_SUFFIX.len())
        .position(|w| w == ZLIB_SUFFIX)
        .map(|pos| pos + ZLIB_SUFFIX.len())
}
