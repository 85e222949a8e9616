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

use bytes::{Buf, BytesMut};

use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// One request line without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFrame {
    pub line: BytesMut,
}

impl LineFrame {
    /// Position of the `\n` ending the first complete line in `buffer`.
    pub fn check(buffer: &BytesMut, max_line_size: usize) -> AppResult<usize> {
        match buffer.iter().position(|b| *b == b'\n') {
            Some(end) if end > max_line_size => Err(AppError::MalformedProtocol(format!(
                "line of length {} is too large",
                end
            ))),
            Some(end) => Ok(end),
            None if buffer.remaining() > max_line_size => Err(AppError::MalformedProtocol(
                format!("line exceeds {} bytes without terminator", max_line_size),
            )),
            None => Err(Incomplete),
        }
    }

    pub(crate) fn parse(buffer: &mut BytesMut, max_line_size: usize) -> AppResult<Option<LineFrame>> {
        // perform a check to ensure we have a whole line
        match LineFrame::check(buffer, max_line_size) {
            Ok(end) => {
                let mut line = buffer.split_to(end + 1);
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                Ok(Some(LineFrame { line }))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.line.trim_ascii().is_empty()
    }

    pub fn as_str(&self) -> AppResult<&str> {
        std::str::from_utf8(&self.line)
            .map_err(|e| AppError::MalformedProtocol(format!("line is not utf-8: {}", e)))
    }
}
