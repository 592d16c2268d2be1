//! The object store adapter (C2): a synchronous facade over whatever
//! block-addressable remote holds the committed blobs, plus an in-memory
//! implementation used by tests and the reconciler's own unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Error, Result};

/// One block already committed to a blob, as returned by `GetBlockList`.
/// Uncommitted blocks are never surfaced; a block only exists to this
/// engine once `commit_block_list` has accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBlock {
    pub id: String,
    pub length: u64,
}

/// A blob's committed state as the store reports it.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    pub name: String,
    pub size: u64,
    pub content_md5: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// A synchronous facade over a block-addressable object store (§3, C2).
/// Every method is blocking; the engine itself is single-threaded per §5.
pub trait ObjectStore: Send + Sync {
    /// List committed blobs whose name starts with `prefix`, with metadata
    /// included. An empty prefix lists the whole container.
    fn list(&self, prefix: &str) -> Result<Vec<BlobRecord>>;
    fn get_block_list(&self, name: &str) -> Result<Vec<CommittedBlock>>;
    fn put_block(&self, name: &str, block_id: &str, data: &[u8]) -> Result<()>;
    fn commit_block_list(
        &self,
        name: &str,
        block_ids: &[String],
        metadata: &HashMap<String, String>,
    ) -> Result<()>;
    fn get_blob(&self, name: &str) -> Result<Vec<u8>>;
    fn get_blob_range(&self, name: &str, offset: u64, length: u64) -> Result<Vec<u8>>;
    fn delete(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
struct InMemoryBlob {
    committed_ids: Vec<String>,
    staged: HashMap<String, Vec<u8>>,
    committed: HashMap<String, Vec<u8>>,
    metadata: HashMap<String, String>,
    last_modified: Option<DateTime<Utc>>,
}

impl InMemoryBlob {
    fn assembled(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for id in &self.committed_ids {
            if let Some(bytes) = self.committed.get(id) {
                out.extend_from_slice(bytes);
            }
        }
        out
    }
}

/// A test double: every block lives in memory, keyed by blob name.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    blobs: Mutex<HashMap<String, InMemoryBlob>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn list(&self, prefix: &str) -> Result<Vec<BlobRecord>> {
        let blobs = self.blobs.lock().expect("object store mutex poisoned");
        Ok(blobs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, blob)| BlobRecord {
                name: name.clone(),
                size: blob.assembled().len() as u64,
                content_md5: blob.metadata.get("content_md5").cloned(),
                last_modified: blob.last_modified.unwrap_or_else(Utc::now),
                metadata: blob.metadata.clone(),
            })
            .collect())
    }

    fn get_block_list(&self, name: &str) -> Result<Vec<CommittedBlock>> {
        let blobs = self.blobs.lock().expect("object store mutex poisoned");
        let blob = blobs.get(name).ok_or_else(|| Error::ObjectStore {
            message: format!("blob not found: {name}"),
        })?;
        Ok(blob
            .committed_ids
            .iter()
            .map(|id| CommittedBlock {
                id: id.clone(),
                length: blob.committed.get(id).map(|b| b.len() as u64).unwrap_or(0),
            })
            .collect())
    }

    fn put_block(&self, name: &str, block_id: &str, data: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().expect("object store mutex poisoned");
        let blob = blobs.entry(name.to_string()).or_default();
        blob.staged.insert(block_id.to_string(), data.to_vec());
        Ok(())
    }

    fn commit_block_list(
        &self,
        name: &str,
        block_ids: &[String],
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let mut blobs = self.blobs.lock().expect("object store mutex poisoned");
        let blob = blobs.entry(name.to_string()).or_default();
        for id in block_ids {
            if let Some(bytes) = blob.staged.get(id).cloned() {
                blob.committed.insert(id.clone(), bytes);
            } else if !blob.committed.contains_key(id) {
                return Err(Error::ObjectStore {
                    message: format!("commit referenced unknown block id {id} for {name}"),
                });
            }
        }
        blob.committed_ids = block_ids.to_vec();
        blob.staged.clear();
        blob.metadata = metadata.clone();
        blob.last_modified = Some(Utc::now());
        Ok(())
    }

    fn get_blob(&self, name: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.lock().expect("object store mutex poisoned");
        let blob = blobs.get(name).ok_or_else(|| Error::ObjectStore {
            message: format!("blob not found: {name}"),
        })?;
        Ok(blob.assembled())
    }

    fn get_blob_range(&self, name: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let bytes = self.get_blob(name)?;
        let start = offset as usize;
        let end = (start + length as usize).min(bytes.len());
        Ok(bytes.get(start..end).map(|s| s.to_vec()).unwrap_or_default())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.blobs.lock().expect("object store mutex poisoned").remove(name);
        Ok(())
    }
}

/// Talks to the real Azure Blob Service REST API over a blocking client,
/// signed with Shared Key auth (account name + account key, no SAS token).
pub struct AzureBlockBlobStore {
    account: String,
    key: Vec<u8>,
    container: String,
    client: reqwest::blocking::Client,
}

const API_VERSION: &str = "2021-08-06";

impl AzureBlockBlobStore {
    pub fn new(account: String, key_base64: &str, container: String) -> Result<Self> {
        let key = BASE64.decode(key_base64).map_err(|e| Error::InvalidConfig {
            message: format!("AZURE_STORAGE_KEY is not valid base64: {e}"),
        })?;
        Ok(Self {
            account,
            key,
            container,
            client: reqwest::blocking::Client::new(),
        })
    }

    fn blob_url(&self, name: &str, query: &str) -> String {
        let sep = if query.is_empty() { "" } else { "?" };
        format!(
            "https://{}.blob.core.windows.net/{}/{}{sep}{query}",
            self.account, self.container, name
        )
    }

    fn container_url(&self, query: &str) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}?{query}",
            self.account, self.container
        )
    }

    /// Build the `Authorization` header value for a Shared Key request,
    /// per the canonicalization rules in Azure's Shared Key authorization
    /// scheme (account name + key, no SAS).
    fn authorization(
        &self,
        verb: &str,
        content_length: usize,
        content_md5: &str,
        date: &str,
        canonicalized_resource: &str,
        extra_headers: &[(&str, String)],
    ) -> Result<String> {
        let mut canonicalized_headers = extra_headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>();
        canonicalized_headers.sort();
        let canonicalized_headers = canonicalized_headers.join("\n");

        let content_length_str = if content_length == 0 {
            String::new()
        } else {
            content_length.to_string()
        };

        let string_to_sign = format!(
            "{verb}\n\n\n{content_length}\n{content_md5}\n\n\n\n\n\n\n\n{headers}{headers_sep}{resource}",
            verb = verb,
            content_length = content_length_str,
            content_md5 = content_md5,
            headers = canonicalized_headers,
            headers_sep = if canonicalized_headers.is_empty() { "" } else { "\n" },
            resource = canonicalized_resource,
        );
        let _ = date;

        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).map_err(|e| Error::ObjectStore {
            message: format!("invalid account key: {e}"),
        })?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKey {}:{}", self.account, signature))
    }

    fn canonicalized_resource(&self, blob: Option<&str>, query_pairs: &[(&str, &str)]) -> String {
        let mut resource = match blob {
            Some(name) => format!("/{}/{}/{}", self.account, self.container, name),
            None => format!("/{}/{}", self.account, self.container),
        };
        if !query_pairs.is_empty() {
            let mut pairs = query_pairs.to_vec();
            pairs.sort();
            for (k, v) in pairs {
                resource.push('\n');
                resource.push_str(&format!("{k}:{v}"));
            }
        }
        resource
    }

    fn send(
        &self,
        req: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response> {
        let resp = req.send().map_err(|e| Error::ObjectStore {
            message: format!("request failed: {e}"),
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(Error::ObjectStore {
                message: format!("http {status}: {body}"),
            });
        }
        Ok(resp)
    }

    fn rfc1123_now() -> String {
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }
}

impl ObjectStore for AzureBlockBlobStore {
    fn list(&self, prefix: &str) -> Result<Vec<BlobRecord>> {
        let date = Self::rfc1123_now();
        let mut query_pairs = vec![("comp", "list"), ("include", "metadata"), ("restype", "container")];
        if !prefix.is_empty() {
            query_pairs.push(("prefix", prefix));
        }
        let resource = self.canonicalized_resource(None, &query_pairs);
        let headers = [
            ("x-ms-date", date.clone()),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        let auth = self.authorization("GET", 0, "", &date, &resource, &headers)?;
        let mut query = "comp=list&include=metadata&restype=container".to_string();
        if !prefix.is_empty() {
            query.push_str("&prefix=");
            query.push_str(&urlencode(prefix));
        }
        let url = self.container_url(&query);
        let resp = self.send(
            self.client
                .get(url)
                .header("x-ms-date", date)
                .header("x-ms-version", API_VERSION)
                .header("Authorization", auth),
        )?;
        let body = resp.text().map_err(|e| Error::ObjectStore {
            message: format!("read list response: {e}"),
        })?;
        parse_list_blobs_xml(&body)
    }

    fn get_block_list(&self, name: &str) -> Result<Vec<CommittedBlock>> {
        let date = Self::rfc1123_now();
        let resource = self.canonicalized_resource(Some(name), &[("blocklisttype", "committed"), ("comp", "blocklist")]);
        let headers = [
            ("x-ms-date", date.clone()),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        let auth = self.authorization("GET", 0, "", &date, &resource, &headers)?;
        let url = self.blob_url(name, "comp=blocklist&blocklisttype=committed");
        let resp = self.send(
            self.client
                .get(url)
                .header("x-ms-date", date)
                .header("x-ms-version", API_VERSION)
                .header("Authorization", auth),
        )?;
        let body = resp.text().map_err(|e| Error::ObjectStore {
            message: format!("read block list response: {e}"),
        })?;
        parse_block_list_xml(&body)
    }

    fn put_block(&self, name: &str, block_id: &str, data: &[u8]) -> Result<()> {
        let date = Self::rfc1123_now();
        let block_id_b64 = BASE64.encode(block_id);
        let resource = self.canonicalized_resource(
            Some(name),
            &[("blockid", block_id_b64.as_str()), ("comp", "block")],
        );
        let headers = [
            ("x-ms-date", date.clone()),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        let auth = self.authorization("PUT", data.len(), "", &date, &resource, &headers)?;
        let url = self.blob_url(name, &format!("comp=block&blockid={block_id_b64}"));
        self.send(
            self.client
                .put(url)
                .header("x-ms-date", date)
                .header("x-ms-version", API_VERSION)
                .header("Content-Length", data.len().to_string())
                .header("Authorization", auth)
                .body(data.to_vec()),
        )?;
        Ok(())
    }

    fn commit_block_list(
        &self,
        name: &str,
        block_ids: &[String],
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let mut body = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
        for id in block_ids {
            body.push_str(&format!("<Latest>{}</Latest>", BASE64.encode(id)));
        }
        body.push_str("</BlockList>");

        let date = Self::rfc1123_now();
        let resource = self.canonicalized_resource(Some(name), &[("comp", "blocklist")]);
        let mut headers: Vec<(&str, String)> = vec![
            ("x-ms-date", date.clone()),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        for (k, v) in metadata {
            headers.push(("x-ms-meta-", format!("{k}:{v}")));
        }
        let auth = self.authorization("PUT", body.len(), "", &date, &resource, &headers)?;

        let mut req = self
            .client
            .put(self.blob_url(name, "comp=blocklist"))
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("Content-Length", body.len().to_string())
            .header("Authorization", auth);
        for (k, v) in metadata {
            req = req.header(format!("x-ms-meta-{k}"), v);
        }
        self.send(req.body(body))?;
        Ok(())
    }

    fn get_blob(&self, name: &str) -> Result<Vec<u8>> {
        let date = Self::rfc1123_now();
        let resource = self.canonicalized_resource(Some(name), &[]);
        let headers = [
            ("x-ms-date", date.clone()),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        let auth = self.authorization("GET", 0, "", &date, &resource, &headers)?;
        let resp = self.send(
            self.client
                .get(self.blob_url(name, ""))
                .header("x-ms-date", date)
                .header("x-ms-version", API_VERSION)
                .header("Authorization", auth),
        )?;
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| Error::ObjectStore {
                message: format!("read blob body: {e}"),
            })
    }

    fn get_blob_range(&self, name: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let range_header = format!("bytes={offset}-{}", offset + length.saturating_sub(1));
        let date = Self::rfc1123_now();
        let resource = self.canonicalized_resource(Some(name), &[]);
        let headers = [
            ("x-ms-date", date.clone()),
            ("x-ms-range", range_header.clone()),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        let auth = self.authorization("GET", 0, "", &date, &resource, &headers)?;
        let resp = self.send(
            self.client
                .get(self.blob_url(name, ""))
                .header("x-ms-date", date)
                .header("x-ms-range", range_header)
                .header("x-ms-version", API_VERSION)
                .header("Authorization", auth),
        )?;
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| Error::ObjectStore {
                message: format!("read ranged blob body: {e}"),
            })
    }

    fn delete(&self, name: &str) -> Result<()> {
        let date = Self::rfc1123_now();
        let resource = self.canonicalized_resource(Some(name), &[]);
        let headers = [
            ("x-ms-date", date.clone()),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        let auth = self.authorization("DELETE", 0, "", &date, &resource, &headers)?;
        self.send(
            self.client
                .delete(self.blob_url(name, ""))
                .header("x-ms-date", date)
                .header("x-ms-version", API_VERSION)
                .header("Authorization", auth),
        )?;
        Ok(())
    }
}

/// Minimal, dependency-free XML scraping for `ListBlobs`. The service's
/// response shape is stable enough that a handful of substring scans beats
/// pulling in a full XML parser for this one call site.
fn parse_list_blobs_xml(xml: &str) -> Result<Vec<BlobRecord>> {
    let mut out = Vec::new();
    for blob_xml in xml_fragments(xml, "<Blob>", "</Blob>") {
        let name = xml_field(&blob_xml, "Name").ok_or_else(|| Error::ObjectStore {
            message: "ListBlobs entry missing Name".to_string(),
        })?;
        let size = xml_field(&blob_xml, "Content-Length")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let content_md5 = xml_field(&blob_xml, "Content-MD5");
        let last_modified = xml_field(&blob_xml, "Last-Modified")
            .and_then(|s| DateTime::parse_from_rfc2822(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let mut metadata = HashMap::new();
        if let Some(meta_xml) = xml_fragments(&blob_xml, "<Metadata>", "</Metadata>").into_iter().next() {
            for (key, value) in xml_all_fields(&meta_xml) {
                metadata.insert(key, value);
            }
        }
        out.push(BlobRecord {
            name,
            size,
            content_md5,
            last_modified,
            metadata,
        });
    }
    Ok(out)
}

fn parse_block_list_xml(xml: &str) -> Result<Vec<CommittedBlock>> {
    let mut out = Vec::new();
    let committed = xml_fragments(xml, "<CommittedBlocks>", "</CommittedBlocks>")
        .into_iter()
        .next()
        .unwrap_or_default();
    for block_xml in xml_fragments(&committed, "<Block>", "</Block>") {
        let id_b64 = xml_field(&block_xml, "Name").ok_or_else(|| Error::ObjectStore {
            message: "block list entry missing Name".to_string(),
        })?;
        let id = String::from_utf8(BASE64.decode(&id_b64).map_err(|e| Error::ObjectStore {
            message: format!("block id not valid base64: {e}"),
        })?)
        .map_err(|e| Error::ObjectStore {
            message: format!("block id not valid utf-8: {e}"),
        })?;
        let length = xml_field(&block_xml, "Size").and_then(|s| s.parse().ok()).unwrap_or(0);
        out.push(CommittedBlock { id, length });
    }
    Ok(out)
}

fn urlencode(s: &str) -> String {
    let mut out = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn xml_fragments(xml: &str, open: &str, close: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len()..];
        if let Some(end) = after_open.find(close) {
            fragments.push(after_open[..end].to_string());
            rest = &after_open[end + close.len()..];
        } else {
            break;
        }
    }
    fragments
}

fn xml_field(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

fn xml_all_fields(xml: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut rest = xml;
    while let Some(tag_start) = rest.find('<') {
        let after = &rest[tag_start + 1..];
        let Some(tag_end) = after.find('>') else { break };
        let tag = &after[..tag_end];
        if tag.starts_with('/') {
            rest = &after[tag_end + 1..];
            continue;
        }
        let close = format!("</{tag}>");
        let body_start = tag_end + 1;
        if let Some(close_pos) = after[body_start..].find(&close) {
            let value = after[body_start..body_start + close_pos].to_string();
            fields.push((tag.to_string(), value));
            rest = &after[body_start + close_pos + close.len()..];
        } else {
            break;
        }
    }
    fields
}
