//! Pluggable decompression codecs.
//!
//! The engine only needs `inflate(dst, src) -> bytes produced`. The default
//! [`ZlibCodec`] inflates zlib streams with a per-thread `flate2`
//! decompressor so decompression loops never allocate per request.

use crate::error::ErrorCode;
use crate::request::Decompression;
use flate2::{Decompress, FlushDecompress, Status};
use std::cell::RefCell;
use std::fmt;

/// Codec failure taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// The codec does not handle this format.
    Unsupported,
    /// The stream inflates to more bytes than the destination holds.
    LimitExceeded,
    /// The input ended before the stream did.
    TruncatedInput,
    /// The decoder made no progress.
    Stalled,
    /// The decoder rejected the stream.
    Backend,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported compression format"),
            Self::LimitExceeded => write!(f, "inflate limit exceeded"),
            Self::TruncatedInput => write!(f, "truncated input"),
            Self::Stalled => write!(f, "inflate stalled"),
            Self::Backend => write!(f, "inflate backend error"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for ErrorCode {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Unsupported => ErrorCode::NotImplemented,
            _ => ErrorCode::Decompression,
        }
    }
}

/// Decompression function used by the decompression loops.
pub trait Codec: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Inflate `src` into `dst`, returning the number of bytes produced.
    fn inflate(
        &self,
        format: Decompression,
        dst: &mut [u8],
        src: &[u8],
    ) -> Result<usize, CodecError>;
}

thread_local! {
    static ZLIB: RefCell<Decompress> = RefCell::new(Decompress::new(true));
}

/// zlib codec backed by `flate2`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZlibCodec;

impl Codec for ZlibCodec {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn inflate(
        &self,
        format: Decompression,
        dst: &mut [u8],
        src: &[u8],
    ) -> Result<usize, CodecError> {
        match format {
            Decompression::Zlib { .. } => {}
            Decompression::None => return Err(CodecError::Unsupported),
        }
        ZLIB.with(|de| {
            let mut de = de.borrow_mut();
            de.reset(true);
            inflate_into(&mut de, dst, src)
        })
    }
}

fn inflate_into(de: &mut Decompress, dst: &mut [u8], src: &[u8]) -> Result<usize, CodecError> {
    let mut in_pos = 0usize;
    let mut out_pos = 0usize;
    loop {
        let before_in = de.total_in();
        let before_out = de.total_out();

        let status = de
            .decompress(&src[in_pos..], &mut dst[out_pos..], FlushDecompress::None)
            .map_err(|_| CodecError::Backend)?;

        let consumed = (de.total_in() - before_in) as usize;
        let produced = (de.total_out() - before_out) as usize;
        in_pos += consumed;
        out_pos += produced;

        match status {
            Status::StreamEnd => return Ok(out_pos),
            Status::Ok | Status::BufError => {
                if consumed == 0 && produced == 0 {
                    if out_pos == dst.len() {
                        return finish_with_probe(de, &src[in_pos..], out_pos);
                    }
                    if in_pos >= src.len() {
                        return Err(CodecError::TruncatedInput);
                    }
                    return Err(CodecError::Stalled);
                }
            }
        }
    }
}

/// Destination is full: the stream is fine only if nothing but its
/// trailer remains.
fn finish_with_probe(
    de: &mut Decompress,
    rest: &[u8],
    out_pos: usize,
) -> Result<usize, CodecError> {
    let mut probe = [0u8; 1];
    let before_out = de.total_out();
    let status = de
        .decompress(rest, &mut probe, FlushDecompress::Finish)
        .map_err(|_| CodecError::Backend)?;
    if de.total_out() != before_out {
        return Err(CodecError::LimitExceeded);
    }
    match status {
        Status::StreamEnd => Ok(out_pos),
        _ => Err(CodecError::TruncatedInput),
    }
}
