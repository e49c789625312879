use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use super::{ChunkSource, Pull};
use crate::error::SourceViolation;

/// Re-chunks an inner source into one-byte pulls.
pub struct ByteByByte<S> {
    inner: S,
    pending: Bytes,
    done: bool,
}

impl<S: ChunkSource> ByteByByte<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Bytes::new(),
            done: false,
        }
    }
}

#[async_trait]
impl<S: ChunkSource> ChunkSource for ByteByByte<S> {
    async fn pull(&mut self) -> Result<Pull> {
        if self.done {
            return Err(SourceViolation::PulledAfterDone.into());
        }

        while self.pending.is_empty() {
            match self.inner.pull().await? {
                Pull::Data(chunk) => self.pending = chunk,
                Pull::Done => {
                    self.done = true;
                    return Ok(Pull::Done);
                }
            }
        }

        Ok(Pull::Data(self.pending.split_to(1)))
    }
}

/// Drains an inner source on the first pull and yields it as one chunk.
pub struct SingleShot<S> {
    inner: S,
    state: ShotState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShotState {
    Fresh,
    Returned,
    Done,
}

impl<S: ChunkSource> SingleShot<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            state: ShotState::Fresh,
        }
    }
}

#[async_trait]
impl<S: ChunkSource> ChunkSource for SingleShot<S> {
    async fn pull(&mut self) -> Result<Pull> {
        match self.state {
            ShotState::Fresh => {
                let mut buffer = BytesMut::new();
                while let Pull::Data(chunk) = self.inner.pull().await? {
                    buffer.extend_from_slice(&chunk);
                }
                self.state = ShotState::Returned;
                Ok(Pull::Data(buffer.freeze()))
            }
            ShotState::Returned => {
                self.state = ShotState::Done;
                Ok(Pull::Done)
            }
            ShotState::Done => Err(SourceViolation::PulledAfterDone.into()),
        }
    }
}
