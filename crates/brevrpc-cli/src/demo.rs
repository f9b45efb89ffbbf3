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

//! Demo services.

use brevrpc_server::{ServiceBuilder, ServiceCatalog};

pub const DEMO_VERSION: &str = "1.0.0";

/// `HelloFacade#1.0.0` and `ArrayFacade#1.0.0`.
pub fn demo_catalog() -> ServiceCatalog {
    let hello = ServiceBuilder::new("HelloFacade", DEMO_VERSION)
        .method("hello_rpc", &["String"], |(name,): (String,)| {
            Ok(format!("HelloFacade: {}", name))
        })
        .method("hello_rpc", &["String", "String"], |(name, address): (String, String)| {
            Ok(format!("HelloFacade: hello {}, my friend from {}", name, address))
        })
        .build();

    let array = ServiceBuilder::new("ArrayFacade", DEMO_VERSION)
        .method("hello", &["String"], |(name,): (String,)| Ok(format!("ArrayFacade: {}", name)))
        .build();

    let mut catalog = ServiceCatalog::new();
    catalog.add(hello);
    catalog.add(array);
    catalog
}
