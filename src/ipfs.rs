// IPFS Kit Core - IPFS HTTP RPC Client
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Thin blocking client for the daemon's /api/v0 endpoints.
// Every RPC call is a POST. Non-2xx responses carry {"Message": ...}.
// IpfsConnector plugs this client into the connection pool.

use crate::config::EndpointConfig;
use crate::error::{IpfsError, PoolError};
use crate::pool::Connector;
use reqwest::blocking::{multipart, Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};

/// Result of /api/v0/add
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddedObject {
    pub name: String,
    pub cid: String,
    pub size: u64,
}

/// Daemon identity from /api/v0/id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeIdentity {
    pub id: String,
    pub agent_version: String,
    pub addresses: Vec<String>,
}

/// Cheap syntactic CID check. Accepts CIDv0 (Qm + 44 base58) and CIDv1 in
/// the multibase encodings the daemon understands: base32 (b/B), base58btc
/// (z), base36 (k/K), base16 (f/F), base64 (m) and base64url (u). The daemon
/// still does the real decoding.
pub fn looks_like_cid(s: &str) -> bool {
    const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    let is_base58 = |body: &str| body.chars().all(|c| BASE58.contains(c));

    if s.len() == 46 && s.starts_with("Qm") {
        return is_base58(s);
    }
    let mut chars = s.chars();
    let Some(prefix) = chars.next() else { return false };
    let body = chars.as_str();
    if body.len() < 8 {
        return false;
    }
    match prefix {
        'b' => body.chars().all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)),
        'B' => body.chars().all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)),
        'z' => is_base58(body),
        'k' => body.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
        'K' => body.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()),
        'f' => body.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')),
        'F' => body.chars().all(|c| matches!(c, '0'..='9' | 'A'..='F')),
        'm' => body.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/'),
        'u' => body.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        _ => false,
    }
}

/// Blocking IPFS RPC client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IpfsClient {
    http: Client,
    api_base: String,
}

impl IpfsClient {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, IpfsError> {
        let http = Client::builder()
            .user_agent(endpoint.user_agent.clone())
            .timeout(endpoint.timeout())
            .build()?;
        Ok(Self {
            http,
            api_base: endpoint.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_base, command)
    }

    fn check(resp: Response) -> Result<Response, IpfsError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        Err(IpfsError::Api {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    fn call_json(&self, command: &str, args: &[(&str, &str)]) -> Result<Value, IpfsError> {
        let resp = self.http.post(self.url(command)).query(args).send()?;
        Ok(Self::check(resp)?.json()?)
    }

    pub fn id(&self) -> Result<NodeIdentity, IpfsError> {
        let body = self.call_json("id", &[])?;
        parse_identity(&body)
    }

    pub fn version(&self) -> Result<String, IpfsError> {
        let body = self.call_json("version", &[])?;
        body.get("Version")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| IpfsError::Decode("version response missing Version".to_string()))
    }

    /// Add bytes as a single file. The daemon pins added content by default.
    pub fn add(&self, name: &str, data: Vec<u8>, pin: bool) -> Result<AddedObject, IpfsError> {
        let part = multipart::Part::bytes(data).file_name(name.to_string());
        let form = multipart::Form::new().part("file", part);
        let pin_arg = if pin { "true" } else { "false" };
        let resp = self
            .http
            .post(self.url("add"))
            .query(&[("pin", pin_arg), ("cid-version", "1")])
            .multipart(form)
            .send()?;
        let body: Value = Self::check(resp)?.json()?;
        parse_add_response(&body)
    }

    pub fn pin_add(&self, cid: &str) -> Result<Vec<String>, IpfsError> {
        let body = self.call_json("pin/add", &[("arg", cid)])?;
        Ok(parse_pins(&body))
    }

    pub fn pin_rm(&self, cid: &str) -> Result<Vec<String>, IpfsError> {
        let body = self.call_json("pin/rm", &[("arg", cid)])?;
        Ok(parse_pins(&body))
    }

    fn cat_response(&self, cid: &str) -> Result<Response, IpfsError> {
        let resp = self.http.post(self.url("cat")).query(&[("arg", cid)]).send()?;
        Self::check(resp)
    }

    /// Read at most `limit` bytes of the content. The flag is true when the
    /// content is longer; the rest is never downloaded.
    pub fn cat_prefix(&self, cid: &str, limit: usize) -> Result<(Vec<u8>, bool), IpfsError> {
        let resp = self.cat_response(cid)?;
        Ok(read_prefix(resp, limit)?)
    }

    /// Stream the content into `out`, returning the byte count
    pub fn cat_into<W: Write>(&self, cid: &str, out: &mut W) -> Result<u64, IpfsError> {
        let mut resp = self.cat_response(cid)?;
        Ok(resp.copy_to(out)?)
    }
}

fn read_prefix<R: Read>(reader: R, limit: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut buf)?;
    let truncated = buf.len() > limit;
    buf.truncate(limit);
    Ok((buf, truncated))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("Message").and_then(|m| m.as_str()).map(|s| s.to_string()))
        .unwrap_or_else(|| body.trim().to_string())
}

fn parse_add_response(body: &Value) -> Result<AddedObject, IpfsError> {
    let cid = body
        .get("Hash")
        .and_then(|v| v.as_str())
        .ok_or_else(|| IpfsError::Decode(format!("add response missing Hash: {}", body)))?;
    // Size arrives as a string
    let size = match body.get("Size") {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    };
    Ok(AddedObject {
        name: body.get("Name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        cid: cid.to_string(),
        size,
    })
}

fn parse_pins(body: &Value) -> Vec<String> {
    body.get("Pins")
        .and_then(|p| p.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

fn parse_identity(body: &Value) -> Result<NodeIdentity, IpfsError> {
    let id = body
        .get("ID")
        .and_then(|v| v.as_str())
        .ok_or_else(|| IpfsError::Decode("id response missing ID".to_string()))?;
    Ok(NodeIdentity {
        id: id.to_string(),
        agent_version: body.get("AgentVersion").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        addresses: body
            .get("Addresses")
            .and_then(|a| a.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default(),
    })
}

/// Pool connector: builds an IpfsClient, probes with /api/v0/id
#[derive(Debug, Default, Clone)]
pub struct IpfsConnector;

impl Connector for IpfsConnector {
    type Client = IpfsClient;

    fn connect(&self, endpoint: &EndpointConfig) -> Result<IpfsClient, PoolError> {
        IpfsClient::new(endpoint).map_err(|e| PoolError::Connect(e.to_string()))
    }

    fn probe(&self, client: &IpfsClient) -> bool {
        match client.id() {
            Ok(_) => true,
            Err(e) => {
                log::debug!("ipfs probe failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
