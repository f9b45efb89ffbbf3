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

//! One-shot calls against a static endpoint list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use brevrpc_balancer::{Endpoint, InMemoryRegistry, LoadBalancerKind};
use brevrpc_client::{CallDescriptor, ClientConfig, RpcClient};
use brevrpc_common::transport::{Codec, SerializationType};

/// Everything `brevrpc call` needs.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub endpoints: Vec<String>,
    pub service: String,
    pub version: String,
    pub method: String,
    pub args: Vec<String>,
    pub serialization: SerializationType,
    pub load_balancer: LoadBalancerKind,
    pub timeout: Duration,
}

/// Parses `host:port` into an endpoint of `service#version`.
pub fn parse_endpoint(addr: &str, service: &str, version: &str) -> Result<Endpoint> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Invalid endpoint '{}': expected host:port", addr))?;
    if host.is_empty() {
        bail!("Invalid endpoint '{}': missing host", addr);
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("Invalid port in endpoint '{}'", addr))?;
    Ok(Endpoint::new(service, version, host, port))
}

/// Encodes string arguments as the tuple the server's handler expects.
pub fn encode_string_args(codec: &Codec, args: &[String]) -> Result<Vec<u8>> {
    let encoded = match args {
        [] => codec.encode(&()),
        [a] => codec.encode(&(a,)),
        [a, b] => codec.encode(&(a, b)),
        [a, b, c] => codec.encode(&(a, b, c)),
        _ => bail!("At most 3 arguments are supported, got {}", args.len()),
    };
    Ok(encoded?)
}

/// Runs the call and returns the string result.
pub async fn run_call(request: CallRequest) -> Result<String> {
    if request.endpoints.is_empty() {
        bail!("No endpoints given, use -e host:port");
    }
    let endpoints = request
        .endpoints
        .iter()
        .map(|addr| parse_endpoint(addr, &request.service, &request.version))
        .collect::<Result<Vec<_>>>()?;

    let config = ClientConfig::default()
        .with_serialization(request.serialization)
        .with_load_balancer(request.load_balancer)
        .with_call_timeout(request.timeout);
    let client = RpcClient::with_tcp(config, Arc::new(InMemoryRegistry::with_endpoints(endpoints)));

    let descriptor = CallDescriptor::new(&request.service, &request.method, &request.version)
        .with_param_types(request.args.iter().map(|_| "String"));
    let codec = request.serialization.codec();
    let args = encode_string_args(codec, &request.args)?;

    let outcome = client.invoke_raw(&descriptor, args).await;
    client.shutdown();
    let result = outcome.with_context(|| format!("Call to {} failed", descriptor.signature()))?;
    Ok(codec.decode(&result)?)
}
