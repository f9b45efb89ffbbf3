// Copyright 2025 brevrpc Authors
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

//! # brevrpc CLI
//!
//! Library half of the `brevrpc` binary.
//!
//! - [`demo`]: the sample services hosted by `brevrpc serve`
//! - [`call`]: one-shot invocation used by `brevrpc call`
//!
//! ## Key Commands
//!
//! - `brevrpc serve`: host the demo services on a TCP port
//! - `brevrpc call`: call a method on a fixed list of endpoints and print the
//!   string result

pub mod call;
pub mod demo;
