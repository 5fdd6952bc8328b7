//! Pattern-based injection detection over JSON request bodies.
//!
//! The walk is exhaustive: every violation anywhere in the tree is reported,
//! each tagged with a dotted/indexed path (`items[2].name`). File uploads are
//! checked separately and fail fast.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ValidationConfig;

static SQL_INJECTION: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|EXECUTE)\b",
        r"(?i)UNION\s+SELECT",
        r#"['"]\s*;\s*--"#,
        r#"['"]\s*;\s*/\*"#,
        r"(?i)\b(OR|AND)\s+\d+\s*=\s*\d+",
        r#"(?i)['"]\s*(OR|AND)\s+['"]"#,
    ])
    .expect("SQL injection signatures compile")
});

static XSS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<script|javascript:|on\w+=").expect("XSS signature compiles"));

static NOSQL_OPERATORS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\$where",
        r"(?i)\$regex",
        r"(?i)\$ne",
        r"(?i)\$gt",
        r"(?i)\$lt",
        r"(?i)\$in",
        r"(?i)\$nin",
        r"(?i)javascript:",
    ])
    .expect("NoSQL signatures compile")
});

/// Category of a body violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    SqlInjection,
    Xss,
    NoSqlInjection,
    /// Serialized body exceeds `limit` bytes.
    BodyTooLarge { limit: usize },
    MalformedBody,
    FileRejected(String),
    /// Reported by a structured [`SchemaValidator`](crate::security::SchemaValidator).
    Schema(String),
}

/// One violation at one location in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Dotted/indexed path; empty for the document root.
    pub path: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = if self.path.is_empty() { "<root>" } else { &self.path };
        match &self.kind {
            ViolationKind::SqlInjection => write!(f, "SQL injection pattern detected at {}", at),
            ViolationKind::Xss => write!(f, "XSS pattern detected at {}", at),
            ViolationKind::NoSqlInjection => write!(f, "NoSQL injection pattern detected at {}", at),
            ViolationKind::BodyTooLarge { limit } => {
                write!(f, "Request body exceeds the {} byte limit", limit)
            }
            ViolationKind::MalformedBody => write!(f, "Request body is not valid JSON"),
            ViolationKind::FileRejected(reason) => write!(f, "File rejected at {}: {}", at, reason),
            ViolationKind::Schema(message) => write!(f, "{}: {}", at, message),
        }
    }
}

/// Aggregated result of validating one body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub errors: Vec<Violation>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Human-readable lines, one per violation.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|v| v.to_string()).collect()
    }
}

pub fn detect_sql_injection(input: &str) -> bool {
    SQL_INJECTION.is_match(input)
}

pub fn detect_xss(input: &str) -> bool {
    XSS.is_match(input)
}

/// Tests an object node, serialized as a whole, for query operators.
pub fn detect_nosql_injection(object: &Map<String, Value>) -> bool {
    match serde_json::to_string(object) {
        Ok(serialized) => NOSQL_OPERATORS.is_match(&serialized),
        Err(_) => false,
    }
}

/// Structured, field-level validation supplied by the application.
///
/// Runs after pattern detection; its findings are merged into the same
/// outcome as [`ViolationKind::Schema`].
pub trait SchemaValidator: Send + Sync {
    /// Returns `(path, message)` pairs for every field that does not conform.
    fn validate(&self, request_path: &str, body: &Value) -> Vec<(String, String)>;
}

/// Walk `body` and collect every violation.
///
/// The size limit applies to the compact serialization of the whole
/// document and is checked once, before the walk.
pub fn validate_body(body: &Value, config: &ValidationConfig) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    let size = serde_json::to_vec(body).map(|v| v.len()).unwrap_or(0);
    if size > config.max_body_size {
        outcome.errors.push(Violation::new(
            ViolationKind::BodyTooLarge {
                limit: config.max_body_size,
            },
            "",
        ));
    }

    let mut path = String::new();
    walk(body, &mut path, config, &mut outcome.errors);
    outcome
}

fn walk(value: &Value, path: &mut String, config: &ValidationConfig, errors: &mut Vec<Violation>) {
    match value {
        Value::String(s) => {
            if detect_sql_injection(s) {
                errors.push(Violation::new(ViolationKind::SqlInjection, path.clone()));
            }
            if !config.allow_xss && detect_xss(s) {
                errors.push(Violation::new(ViolationKind::Xss, path.clone()));
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let len = path.len();
                path.push_str(&format!("[{}]", i));
                walk(item, path, config, errors);
                path.truncate(len);
            }
        }
        Value::Object(map) => {
            if detect_nosql_injection(map) {
                errors.push(Violation::new(ViolationKind::NoSqlInjection, path.clone()));
            }
            for (key, child) in map {
                let len = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(key);
                walk(child, path, config, errors);
                path.truncate(len);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Escape `& < > " ' /` for safe output in HTML text and attributes.
pub fn sanitize_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

/// Metadata of an uploaded file.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

/// Upload acceptance rules.
#[derive(Debug, Clone)]
pub struct FileUploadPolicy {
    pub max_size: u64,
    pub allowed_types: Vec<String>,
    /// Lowercase, without the dot.
    pub allowed_extensions: Vec<String>,
}

/// First reason an upload was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileRejection {
    #[error("file is {size} bytes, limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("content type '{0}' is not allowed")]
    TypeNotAllowed(String),
    #[error("file extension '{0}' is not allowed")]
    ExtensionNotAllowed(String),
}

impl FileRejection {
    /// Report this rejection as a body violation for the upload field at `path`.
    pub fn into_violation(self, path: impl Into<String>) -> Violation {
        Violation::new(ViolationKind::FileRejected(self.to_string()), path)
    }
}

/// Size, then declared type, then extension; the first failure wins.
pub fn validate_file_upload(file: &FileDescriptor, policy: &FileUploadPolicy) -> Result<(), FileRejection> {
    if file.size > policy.max_size {
        return Err(FileRejection::TooLarge {
            size: file.size,
            max: policy.max_size,
        });
    }

    if !policy.allowed_types.iter().any(|t| t == &file.content_type) {
        return Err(FileRejection::TypeNotAllowed(file.content_type.clone()));
    }

    let extension = file
        .name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if extension.is_empty() || !policy.allowed_extensions.contains(&extension) {
        return Err(FileRejection::ExtensionNotAllowed(extension));
    }

    Ok(())
}
