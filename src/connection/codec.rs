//! Frame I/O over the two halves of a transport.
//!
//! The reader owns the read half and a buffer that may start out holding
//! bytes the server sent right behind its handshake response. The writer
//! owns the write half and masks every frame with a fresh key.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameHeader, FrameValidator, MaskingKey};

const READ_CHUNK: usize = 4096;

/// Decodes frames from a byte stream.
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    validator: FrameValidator,
}

impl<R> FrameReader<R> {
    #[must_use]
    pub fn new(io: R, limits: Limits) -> Self {
        Self::with_prebuffer(io, BytesMut::new(), limits)
    }

    /// Start with `prebuffer` already queued ahead of anything read from `io`.
    #[must_use]
    pub fn with_prebuffer(io: R, prebuffer: BytesMut, limits: Limits) -> Self {
        Self {
            io,
            buf: prebuffer,
            validator: FrameValidator::new(limits),
        }
    }

    /// Bytes received but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the next frame.
    ///
    /// The header is validated as soon as it is complete, so a frame that
    /// breaks the protocol or the size limits is rejected before its payload
    /// is buffered.
    ///
    /// # Errors
    ///
    /// - Any validation error from [`FrameValidator`]
    /// - `Error::ReservedOpcode` / `Error::InvalidOpcode`
    /// - `Error::PayloadTooLargeForPlatform`
    /// - `Error::ConnectionClosed(None)` if the stream ends
    /// - `Error::Io` for transport failures
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let mut header: Option<FrameHeader> = None;
        loop {
            if header.is_none() {
                match FrameHeader::parse(&self.buf) {
                    Ok(parsed) => {
                        self.validator.validate_incoming(&parsed)?;
                        header = Some(parsed);
                    }
                    Err(Error::IncompleteFrame { .. }) => {}
                    Err(e) => return Err(e),
                }
            }

            let needed = match &header {
                Some(parsed) => match Frame::parse_with_header(parsed, &self.buf) {
                    Ok((frame, consumed)) => {
                        self.buf.advance(consumed);
                        trace!(
                            opcode = %frame.opcode,
                            fin = frame.fin,
                            len = frame.payload().len(),
                            "frame received"
                        );
                        return Ok(frame);
                    }
                    Err(Error::IncompleteFrame { needed }) => needed,
                    Err(e) => return Err(e),
                },
                None => 1,
            };

            self.buf.reserve(needed.clamp(READ_CHUNK, 16 * READ_CHUNK));
            let n = self.io.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }
}

/// Encodes and writes frames, masking each one.
pub struct FrameWriter<W> {
    io: W,
    buf: BytesMut,
    write_timeout: Duration,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, write_timeout: Duration) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(READ_CHUNK),
            write_timeout,
        }
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.io
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Mask `frame` with a fresh key, then write and flush it.
    ///
    /// # Errors
    ///
    /// - `Error::Timeout("frame write")` if the write exceeds the write timeout
    /// - `Error::Io` for transport failures
    pub async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        let frame = frame.masked(MaskingKey::generate());
        self.buf.clear();
        frame.encode_into(&mut self.buf);

        trace!(
            opcode = %frame.opcode,
            fin = frame.fin,
            len = frame.payload().len(),
            "frame sent"
        );

        let io = &mut self.io;
        let buf = &self.buf;
        tokio::time::timeout(self.write_timeout, async move {
            io.write_all(buf).await?;
            io.flush().await
        })
        .await
        .map_err(|_| Error::Timeout("frame write"))??;
        Ok(())
    }

    /// Shut down the write direction of the transport.
    ///
    /// # Errors
    /// `Error::Timeout` or `Error::Io` as for [`FrameWriter::write_frame`].
    pub async fn shutdown(&mut self) -> Result<()> {
        tokio::time::timeout(self.write_timeout, self.io.shutdown())
            .await
            .map_err(|_| Error::Timeout("shutdown"))??;
        Ok(())
    }
}
