//! Replay-capable byte source for the input archive
//!
//! Reads normally drain the main input slice. While at least one capture
//! region is open, every byte obtained is also appended to a side buffer so
//! a skipped shared object can be replayed later. Replaying pushes a frame
//! over the recorded region; frames form a LIFO stack because buffered
//! objects nest.

use exb_format::error::{ExbError, Result};

/// A finalized side-buffer region holding one skipped shared object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Region {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    pos: usize,
    end: usize,
}

/// Byte source multiplexing the main input with buffered replay regions.
pub(crate) struct ReplaySource<'a> {
    main: &'a [u8],
    pos: usize,
    side: Vec<u8>,
    captures: usize,
    max_side_bytes: usize,
    frames: Vec<Frame>,
}

impl<'a> ReplaySource<'a> {
    pub fn new(main: &'a [u8], max_side_bytes: usize) -> Self {
        Self {
            main,
            pos: 0,
            side: Vec::new(),
            captures: 0,
            max_side_bytes,
            frames: Vec::new(),
        }
    }

    /// Bytes obtainable before the current source is exhausted.
    pub fn available(&self) -> usize {
        match self.frames.last() {
            Some(frame) => frame.end - frame.pos,
            None => self.main.len() - self.pos,
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_into(&mut byte)?;
        Ok(byte[0])
    }

    /// Fill `buf` from the active source, teeing into the side buffer while
    /// a capture region is open.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = buf.len();
        if let Some(frame) = self.frames.last().copied() {
            if n > frame.end - frame.pos {
                return Err(ExbError::SharedObjectProtocol(
                    "read past the end of a buffered shared object".to_string(),
                ));
            }
            buf.copy_from_slice(&self.side[frame.pos..frame.pos + n]);
            if let Some(top) = self.frames.last_mut() {
                top.pos += n;
            }
            self.pop_exhausted();
        } else {
            if n > self.main.len() - self.pos {
                return Err(ExbError::UnexpectedEof);
            }
            buf.copy_from_slice(&self.main[self.pos..self.pos + n]);
            self.pos += n;
        }
        if self.captures > 0 {
            self.tee(buf)?;
        }
        Ok(())
    }

    /// Read exactly `n` bytes into a fresh buffer.
    ///
    /// Availability is checked before allocating so a corrupt length cannot
    /// trigger an oversized allocation.
    pub fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        if n > self.available() {
            return Err(match self.frames.last() {
                Some(_) => ExbError::SharedObjectProtocol(
                    "read past the end of a buffered shared object".to_string(),
                ),
                None => ExbError::UnexpectedEof,
            });
        }
        let mut buf = vec![0u8; n];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Discard `n` bytes, still teeing them while a capture region is open.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.captures > 0 {
            self.read_vec(n)?;
            return Ok(());
        }
        if let Some(frame) = self.frames.last().copied() {
            if n > frame.end - frame.pos {
                return Err(ExbError::SharedObjectProtocol(
                    "skip past the end of a buffered shared object".to_string(),
                ));
            }
            if let Some(top) = self.frames.last_mut() {
                top.pos += n;
            }
            self.pop_exhausted();
        } else {
            if n > self.main.len() - self.pos {
                return Err(ExbError::UnexpectedEof);
            }
            self.pos += n;
        }
        Ok(())
    }

    /// Open a capture region, returning its start offset in the side buffer.
    pub fn begin_capture(&mut self) -> usize {
        self.captures += 1;
        self.side.len()
    }

    /// Close the most recently opened capture region.
    pub fn end_capture(&mut self, start: usize) -> Result<Region> {
        if self.captures == 0 {
            return Err(ExbError::SharedObjectProtocol(
                "capture region closed but none was open".to_string(),
            ));
        }
        self.captures -= 1;
        Ok(Region {
            start,
            end: self.side.len(),
        })
    }

    /// Redirect subsequent reads to a buffered region.
    pub fn push_replay(&mut self, region: Region) {
        self.frames.push(Frame {
            pos: region.start,
            end: region.end,
        });
        self.pop_exhausted();
    }

    fn pop_exhausted(&mut self) {
        while self.frames.last().is_some_and(|f| f.pos >= f.end) {
            self.frames.pop();
        }
    }

    fn tee(&mut self, bytes: &[u8]) -> Result<()> {
        if self.side.len() + bytes.len() > self.max_side_bytes {
            return Err(ExbError::SharedBufferLimitExceeded(self.max_side_bytes));
        }
        self.side.extend_from_slice(bytes);
        Ok(())
    }
}
