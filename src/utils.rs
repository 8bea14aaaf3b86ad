use std::io::Read;

use base64::{prelude::BASE64_STANDARD, Engine};
use flate2::read::DeflateDecoder;
use libxml::{tree::Node, xpath::Object};
use rand::distributions::{Alphanumeric, DistString};

use crate::{SamlError, SamlResult};

pub fn random_string(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

pub fn single_node(object: &Object, what: &str) -> SamlResult<Node> {
    let mut nodes = object.get_nodes_as_vec();
    if nodes.len() != 1 {
        return Err(SamlError::InvalidAuthnRequest(format!(
            "expected exactly one {what}, found {}",
            nodes.len()
        )));
    }
    Ok(nodes.remove(0))
}

pub fn decode_xml_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let stripped = input.replace([' ', '\n', '\r', '\t'], "");
    BASE64_STANDARD.decode(stripped)
}

/// Decodes a single `application/x-www-form-urlencoded` value.
pub fn decode_query_value(raw: &str) -> SamlResult<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|value| value.into_owned())
        .map_err(|e| SamlError::InvalidEncoding(format!("URL decode error: {e}")))
}

/// Raw DEFLATE (no zlib header), refusing output larger than `limit` bytes.
pub fn inflate_bounded(data: &[u8], limit: usize) -> SamlResult<Vec<u8>> {
    let mut inflated = Vec::new();
    DeflateDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| SamlError::InvalidEncoding(format!("Deflate decode error: {e}")))?;
    if inflated.len() > limit {
        return Err(SamlError::InvalidEncoding(format!(
            "inflated message exceeds {limit} bytes"
        )));
    }
    Ok(inflated)
}
