//! Line framing over asynchronous byte streams
//!
//! Both the device under test and the supply speak line-oriented text. [`LineReader`] buffers raw
//! bytes from any `AsyncRead` and hands out complete `LF` terminated lines.

use std::io;
use tokio::io::{ AsyncRead, AsyncReadExt };

const LINE_FEED: u8 = 0x0A;
const READ_BUF_CAPACITY: usize = 128;
/// Longest line handed out. Longer runs without a line feed are split.
pub const MAX_LINE_LEN: usize = 4096;

pub struct LineReader<T>
{
    io_handle: T,
    read_buf: Vec<u8>,
}

impl <T> LineReader<T>
    where T: AsyncRead + Unpin
{
    pub fn new(io_handle: T) -> Self
    {
        Self {
            io_handle,
            read_buf: Vec::with_capacity(READ_BUF_CAPACITY),
        }
    }

    pub fn get_mut(&mut self) -> &mut T
    {
        &mut self.io_handle
    }

    /// Throws away any buffered, not yet returned, bytes
    pub fn discard(&mut self)
    {
        self.read_buf.clear();
    }

    /// Drops the first `n` bytes from the read buffer
    ///
    /// Drops all bytes if `n >= self.read_buf.len()`
    fn drop_first(&mut self, n: usize)
    {
        if n >= self.read_buf.len() {
            self.read_buf.clear();
        }
        else {
            self.read_buf.drain(..n);
            // keep a long burst of output from pinning a large allocation
            self.read_buf.shrink_to(READ_BUF_CAPACITY);
        }
    }

    /// Returns the index of the first linefeed in the read buffer at or after `start_hint`
    fn find_line_ending(&self, start_hint: usize) -> Option<usize>
    {
        self.read_buf
            .get(start_hint..)?
            .iter()
            .position(|byte| *byte == LINE_FEED)
            .map(|offset| start_hint + offset)
    }

    /// Removes the first `len` bytes of the buffer and returns them as a line
    fn take_line(&mut self, len: usize) -> String
    {
        let line = String::from_utf8_lossy(&self.read_buf[..len])
            .trim_end_matches(&['\r', '\n'][..])
            .to_string();
        self.drop_first(len);
        line
    }

    /// Reads the next line, without its `CR`/`LF` terminator
    ///
    /// Bytes which are not valid UTF8 (line noise while the device browns out, a wrong baud rate)
    /// are replaced rather than rejected. Output without a line feed is cut into lines of
    /// [`MAX_LINE_LEN`] bytes. End of stream is reported as `UnexpectedEof`.
    ///
    /// # Cancel Safety
    /// This function is cancel safe e.g. when used inside of a `tokio::select!` or
    /// `tokio::time::timeout`. This is because this will never destroy contents of the read buffer
    /// until a whole line has been found. It only appends.
    pub async fn next_line(&mut self) -> io::Result<String>
    {
        let mut search_from = 0;

        loop {
            match self.find_line_ending(search_from) {
                Some(index) if index < MAX_LINE_LEN => return Ok(self.take_line(index + 1)),
                Some(_) => return Ok(self.take_line(MAX_LINE_LEN)),
                None => {}
            }
            if self.read_buf.len() >= MAX_LINE_LEN {
                return Ok(self.take_line(MAX_LINE_LEN));
            }

            let mut temp_buf = [0u8; 64];
            let bytes_read = self.io_handle.read(&mut temp_buf[..]).await?;

            if bytes_read == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }

            search_from = self.read_buf.len();
            self.read_buf.extend_from_slice(&temp_buf[..bytes_read]);
        }
    }
}
