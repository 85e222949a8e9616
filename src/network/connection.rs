// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::network::LineFrame;
use crate::AppResult;

/// Read side of a client connection.
///
/// Wraps the read half of a `TcpStream` with a buffer that accumulates bytes until a
/// complete line can be split off. The write half is owned by the connection handler.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    max_line_size: usize,
    pub client_ip: String,
}

impl Connection {
    pub fn new(reader: OwnedReadHalf, max_line_size: usize) -> Connection {
        let client_ip = reader
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Connection {
            reader,
            buffer: BytesMut::with_capacity(4 * 1024),
            max_line_size,
            client_ip,
        }
    }

    /// Reads the next line from the connection.
    ///
    /// Returns `None` when the client closes the connection gracefully. A last line
    /// without terminator, sent right before the client shuts down its write side, is
    /// still returned as a frame. A line over the size limit is an error and the
    /// connection should be dropped.
    pub async fn read_frame(&mut self) -> AppResult<Option<LineFrame>> {
        loop {
            if let Some(frame) = LineFrame::parse(&mut self.buffer, self.max_line_size)? {
                return Ok(Some(frame));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    // client has closed the connection gracefully
                    self.buffer.clear();
                    return Ok(None);
                }
                let mut line = self.buffer.split();
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(LineFrame { line }));
            }
        }
    }
}
