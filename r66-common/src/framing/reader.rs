//! Frame reader for parsing packets from a stream

use std::io;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use super::error::FrameError;
use super::frame::RawFrame;
use super::limits::max_payload_for_kind;
use super::SECTION_TABLE_LENGTH;

/// Default timeout for completing a frame once the first byte is received
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(60);

/// Default idle timeout while waiting for the first byte of a frame
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads frames from an async reader
pub struct FrameReader<R> {
    reader: R,
}

impl<R> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Get a mutable reference to the underlying reader
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consume the frame reader and return the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncReadExt + Unpin> FrameReader<R> {
    /// Read the next frame from the stream
    ///
    /// Returns `Ok(None)` if the connection is cleanly closed.
    ///
    /// # Note
    ///
    /// This method has no timeout. Sessions should prefer
    /// [`read_frame_with_timeout`](Self::read_frame_with_timeout).
    pub async fn read_frame(&mut self) -> Result<Option<RawFrame>, FrameError> {
        let kind = match self.read_byte_allow_eof().await? {
            Some(b) => b,
            None => return Ok(None),
        };
        self.read_frame_after_kind(kind).await.map(Some)
    }

    /// Read the next frame, waiting indefinitely for the first byte
    ///
    /// Once the kind byte arrives the rest of the frame must complete within
    /// `frame_timeout`.
    pub async fn read_frame_with_timeout(
        &mut self,
        frame_timeout: Duration,
    ) -> Result<Option<RawFrame>, FrameError> {
        let kind = match self.read_byte_allow_eof().await? {
            Some(b) => b,
            None => return Ok(None),
        };

        match timeout(frame_timeout, self.read_frame_after_kind(kind)).await {
            Ok(result) => result.map(Some),
            Err(_) => Err(FrameError::FrameTimeout),
        }
    }

    /// Read the next frame with a timeout on the idle wait as well
    ///
    /// # Arguments
    ///
    /// * `idle_timeout` - Maximum time to wait for the first byte
    /// * `frame_timeout` - Maximum time to complete the frame after the first byte
    pub async fn read_frame_with_full_timeout(
        &mut self,
        idle_timeout: Duration,
        frame_timeout: Duration,
    ) -> Result<Option<RawFrame>, FrameError> {
        let kind = match timeout(idle_timeout, self.read_byte_allow_eof()).await {
            Ok(Ok(Some(b))) => b,
            Ok(Ok(None)) => return Ok(None),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(FrameError::IdleTimeout),
        };

        match timeout(frame_timeout, self.read_frame_after_kind(kind)).await {
            Ok(result) => result.map(Some),
            Err(_) => Err(FrameError::FrameTimeout),
        }
    }

    async fn read_frame_after_kind(&mut self, kind: u8) -> Result<RawFrame, FrameError> {
        let max = max_payload_for_kind(kind).ok_or(FrameError::UnknownKind(kind))?;

        let payload_length = self.read_u32().await?;
        if payload_length > max {
            return Err(FrameError::PayloadTooLarge {
                kind,
                length: payload_length,
                max,
            });
        }
        if (payload_length as usize) < SECTION_TABLE_LENGTH {
            return Err(FrameError::SectionMismatch);
        }

        let header_len = self.read_u32().await? as u64;
        let middle_len = self.read_u32().await? as u64;
        let end_len = self.read_u32().await? as u64;
        if header_len + middle_len + end_len + SECTION_TABLE_LENGTH as u64
            != payload_length as u64
        {
            return Err(FrameError::SectionMismatch);
        }

        let header = self.read_section(header_len as usize).await?;
        let middle = self.read_section(middle_len as usize).await?;
        let end = self.read_section(end_len as usize).await?;

        Ok(RawFrame::new(kind, header, middle, end))
    }

    async fn read_section(&mut self, len: usize) -> Result<Vec<u8>, FrameError> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn read_u32(&mut self) -> Result<u32, FrameError> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a single byte, returning None on clean EOF
    async fn read_byte_allow_eof(&mut self) -> Result<Option<u8>, FrameError> {
        let mut buf = [0u8; 1];
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
