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

//! Data model shared by the storage engines, the pipe and the wire protocols.

mod record;

pub use record::{CommitRecord, Position, Record};

/// Group id used when a consumer does not name one.
pub const DEFAULT_GROUP: &str = "default";
/// Consumer id used when a consumer does not name one.
pub const DEFAULT_CONSUMER: &str = "default";
