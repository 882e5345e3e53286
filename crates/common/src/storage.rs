/*
 * External storage destinations.
 *
 * A destination URI names where output files land. The factory turns a URI
 * into an opendal Operator; the processor never interprets the bytes it
 * writes. The `null` scheme routes to an in-memory operator and exists for
 * tests that discard backup data.
 */

use crate::{BackupError, Result};
use opendal::Operator;
use std::collections::HashMap;

/// Storage backend selected by the destination URI scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Gcs,
    Azure,
    Fs,
    Discard,
}

/// A parsed destination.
#[derive(Debug, Clone)]
pub struct Destination {
    pub backend: StorageBackend,
    /// Bucket or container name; filesystem root for `file` URIs.
    pub root: String,
    /// Path prefix under the root that output files are placed under.
    pub prefix: String,
    /// Additional options from the URI query string (credentials, region,
    /// endpoint overrides).
    pub options: HashMap<String, String>,
}

/// Parses a destination URI such as `s3://bucket/prefix?region=us-east-1`.
pub fn parse_destination(uri: &str) -> Result<Destination> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| BackupError::Storage(format!("malformed destination URI: {uri}")))?;

    let (rest, query) = match rest.split_once('?') {
        Some((r, q)) => (r, q),
        None => (rest, ""),
    };

    let mut options = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        if let Some((k, v)) = pair.split_once('=') {
            options.insert(k.to_string(), v.to_string());
        }
    }

    let backend = match scheme {
        "s3" => StorageBackend::S3,
        "gs" | "gcs" => StorageBackend::Gcs,
        "azure" | "azblob" => StorageBackend::Azure,
        "file" | "nodelocal" => StorageBackend::Fs,
        "null" | "mem" => StorageBackend::Discard,
        other => {
            return Err(BackupError::Storage(format!(
                "unsupported destination scheme: {other}"
            )))
        }
    };

    // Filesystem URIs treat the whole remainder as the root path; bucketed
    // backends split bucket from prefix.
    let (root, prefix) = match backend {
        StorageBackend::Fs => (rest.to_string(), String::new()),
        StorageBackend::Discard => (String::new(), String::new()),
        _ => match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket.to_string(), prefix.trim_matches('/').to_string()),
            None => (rest.to_string(), String::new()),
        },
    };

    Ok(Destination {
        backend,
        root,
        prefix,
        options,
    })
}

/// Builds an opendal Operator for a destination.
pub fn build_operator(dest: &Destination) -> Result<Operator> {
    match dest.backend {
        StorageBackend::S3 => build_s3_operator(dest),
        StorageBackend::Gcs => build_gcs_operator(dest),
        StorageBackend::Azure => build_azure_operator(dest),
        StorageBackend::Fs => build_fs_operator(dest),
        StorageBackend::Discard => build_discard_operator(),
    }
}

fn build_s3_operator(dest: &Destination) -> Result<Operator> {
    let mut builder = opendal::services::S3::default();

    builder = builder.bucket(&dest.root);

    if let Some(endpoint) = dest.options.get("endpoint") {
        builder = builder.endpoint(endpoint);
    }
    if let Some(region) = dest.options.get("region") {
        builder = builder.region(region);
    }
    if let Some(access_key) = dest.options.get("access_key_id") {
        builder = builder.access_key_id(access_key);
    }
    if let Some(secret_key) = dest.options.get("secret_access_key") {
        builder = builder.secret_access_key(secret_key);
    }
    if let Some(session_token) = dest.options.get("session_token") {
        builder = builder.session_token(session_token);
    }

    Operator::new(builder)
        .map(|op| op.finish())
        .map_err(|e| BackupError::Storage(format!("failed to build S3 operator: {e}")))
}

fn build_gcs_operator(dest: &Destination) -> Result<Operator> {
    let mut builder = opendal::services::Gcs::default();

    builder = builder.bucket(&dest.root);

    if let Some(endpoint) = dest.options.get("endpoint") {
        builder = builder.endpoint(endpoint);
    }
    if let Some(credential) = dest.options.get("credential") {
        builder = builder.credential(credential);
    }

    Operator::new(builder)
        .map(|op| op.finish())
        .map_err(|e| BackupError::Storage(format!("failed to build GCS operator: {e}")))
}

fn build_azure_operator(dest: &Destination) -> Result<Operator> {
    let mut builder = opendal::services::Azblob::default();

    builder = builder.container(&dest.root);

    if let Some(endpoint) = dest.options.get("endpoint") {
        builder = builder.endpoint(endpoint);
    }
    if let Some(account_name) = dest.options.get("account_name") {
        builder = builder.account_name(account_name);
    }
    if let Some(account_key) = dest.options.get("account_key") {
        builder = builder.account_key(account_key);
    }

    Operator::new(builder)
        .map(|op| op.finish())
        .map_err(|e| BackupError::Storage(format!("failed to build Azure operator: {e}")))
}

fn build_fs_operator(dest: &Destination) -> Result<Operator> {
    let mut builder = opendal::services::Fs::default();

    builder = builder.root(&dest.root);

    Operator::new(builder)
        .map(|op| op.finish())
        .map_err(|e| BackupError::Storage(format!("failed to build local operator: {e}")))
}

fn build_discard_operator() -> Result<Operator> {
    Operator::new(opendal::services::Memory::default())
        .map(|op| op.finish())
        .map_err(|e| BackupError::Storage(format!("failed to build discard operator: {e}")))
}
