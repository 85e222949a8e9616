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

//! Network Module Implementation
//!
//! Both streaming servers speak a line protocol: every client request is one
//! `\n`-terminated line. This module turns the read half of a TCP connection into a
//! stream of such lines.
//!
//! # Components
//!
//! - `Connection`: owns the read half of a client socket and its read buffer
//! - `LineFrame`: splits complete lines off the buffer and enforces the size limit

pub use connection::Connection;
pub use frame::LineFrame;
mod connection;
mod frame;
