//! Blocks pushed by a decoder thread over a bounded channel.

use crossbeam_channel::{bounded, Receiver, Sender};
use sndsink_core::{Error, Result};

use super::{BlockSource, Pulled};

/// Messages carried from the producer to a [`ChannelSource`].
#[derive(Debug, Clone)]
enum BlockMessage {
    Block(Vec<u8>),
    End,
    Failed(String),
}

/// Producer half returned by [`block_channel`].
#[derive(Clone)]
pub struct BlockSender {
    tx: Sender<BlockMessage>,
}

impl BlockSender {
    /// Queue a block, blocking while the channel is full.
    ///
    /// Fails once the sink has dropped its source.
    pub fn send(&self, block: Vec<u8>) -> Result<()> {
        self.tx
            .send(BlockMessage::Block(block))
            .map_err(|_| Error::Internal("output source was dropped".into()))
    }

    /// Signal end-of-stream after the blocks already sent.
    pub fn finish(&self) -> Result<()> {
        self.tx
            .send(BlockMessage::End)
            .map_err(|_| Error::Internal("output source was dropped".into()))
    }

    /// Report a decoder failure; the sink stops with a source error.
    pub fn fail(&self, message: impl Into<String>) -> Result<()> {
        self.tx
            .send(BlockMessage::Failed(message.into()))
            .map_err(|_| Error::Internal("output source was dropped".into()))
    }
}

/// Source fed by a [`BlockSender`] on another thread.
///
/// Pulls block until a message arrives. A block larger than the pull buffer
/// is handed out over several pulls. Dropping every sender without calling
/// [`BlockSender::finish`] is a source failure.
pub struct ChannelSource {
    rx: Receiver<BlockMessage>,
    pending: Vec<u8>,
    offset: usize,
    ended: bool,
}

/// Create a connected producer/source pair holding at most `capacity` queued
/// blocks.
pub fn block_channel(capacity: usize) -> (BlockSender, ChannelSource) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        BlockSender { tx },
        ChannelSource {
            rx,
            pending: Vec::new(),
            offset: 0,
            ended: false,
        },
    )
}

impl ChannelSource {
    fn copy_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = (self.pending.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        if self.offset == self.pending.len() {
            self.pending.clear();
            self.offset = 0;
        }
        n
    }
}

impl BlockSource for ChannelSource {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Pulled> {
        if !self.pending.is_empty() {
            let n = self.copy_pending(buf);
            return Ok(Pulled::data(n));
        }
        if self.ended {
            return Ok(Pulled::end(0));
        }

        match self.rx.recv() {
            Ok(BlockMessage::Block(block)) => {
                self.pending = block;
                self.offset = 0;
                let n = self.copy_pending(buf);
                Ok(Pulled::data(n))
            }
            Ok(BlockMessage::End) => {
                self.ended = true;
                Ok(Pulled::end(0))
            }
            Ok(BlockMessage::Failed(message)) => Err(Error::Source(message)),
            Err(_) => Err(Error::Source(
                "upstream closed without end-of-stream".into(),
            )),
        }
    }
}
