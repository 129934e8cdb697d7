//! Parameter sets and their normalization into form fields.
//!
//! Callers hand the client one of a closed set of shapes ([`ParamSet`]); the
//! normalizer turns it into [`Normalized`] form fields plus file attachments
//! and fills in the wire defaults.

use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Defaults applied to every request unless the caller supplied the key.
pub(crate) const DEFAULTS: &[(&str, &str)] = &[
    ("action", "query"),
    ("format", "json"),
    ("formatversion", "2"),
    ("errorformat", "plaintext"),
];

/// A single parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent; the field is omitted.
    Null,
    /// Sent verbatim.
    Text(String),
    /// `true` is sent as `1`, `false` omits the field.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point number, sent without a trailing `.0` when integral.
    Float(f64),
    /// Sent as the elements joined with `|`.
    List(Vec<Value>),
    /// Uploaded as a file part.
    File(FilePart),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Text(_) => "text",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::UInt(_) => "integer",
            Value::Float(_) => "float",
            Value::List(_) => "nested list",
            Value::File(_) => "file",
        }
    }

    /// Text form of a scalar used inside a `|`-joined list.
    fn list_item(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(n) => Some(n.to_string()),
            Value::UInt(n) => Some(n.to_string()),
            Value::Float(f) => Some(f.to_string()),
            _ => None,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident as $conv:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(<$conv>::from(v))
                }
            }
        )*
    };
}

value_from! {
    bool => Bool as bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
    String => Text as String,
    &str => Text as String,
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::Text).collect())
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::List(v.into_iter().map(Value::from).collect())
    }
}

impl From<&[&str]> for Value {
    fn from(v: &[&str]) -> Self {
        Value::List(v.iter().copied().map(Value::from).collect())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::File(FilePart::new(v))
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::File(FilePart::new(v))
    }
}

impl From<FilePart> for Value {
    fn from(v: FilePart) -> Self {
        Value::File(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// File contents to upload, with an optional name and content type.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

impl FilePart {
    /// Creates an unnamed file part; its filename defaults to the field name.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            filename: None,
            content_type: None,
            data: data.into(),
        }
    }

    /// Reads a file from disk, naming the part after the file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|e| Error::Attachment {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Self {
            filename,
            content_type: None,
            data: data.into(),
        })
    }

    /// Sets the filename sent with the part.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the content type of the part.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A file attachment of a normalized request.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// The form field carrying the file.
    pub field: String,
    /// The filename sent with the part.
    pub filename: String,
    /// Content type of the part, if known.
    pub content_type: Option<String>,
    /// The file contents.
    pub data: Bytes,
}

/// An ordered key/value builder for request parameters.
///
/// # Examples
///
/// ```
/// use wikisession::{Params, ParamSet};
///
/// let params = Params::new()
///     .set("action", "edit")
///     .set("title", "Sandbox")
///     .set("minor", true)
///     .set("tags", vec!["bot", "test"]);
///
/// let normalized = ParamSet::from(params).normalize().unwrap();
/// assert_eq!(normalized.get("minor"), Some("1"));
/// assert_eq!(normalized.get("tags"), Some("bot|test"));
/// assert_eq!(normalized.get("format"), Some("json"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, Value)>,
}

impl Params {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any earlier value for the key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a parameter in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Returns `true` if no parameters are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The parameter shapes the client accepts.
///
/// Anything else has to be converted into one of these first; conversions
/// exist for the usual map and slice types and for [`Params`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSet {
    /// Already-encoded pairs; repeated keys are joined with `|`.
    Encoded(Vec<(String, String)>),
    /// Keys mapped to values of mixed kinds.
    Mixed(Vec<(String, Value)>),
    /// A serialized record; must be a JSON object of scalars and lists.
    Record(serde_json::Value),
}

impl ParamSet {
    /// Serializes a record type into a parameter set.
    ///
    /// # Examples
    ///
    /// ```
    /// use serde::Serialize;
    /// use wikisession::ParamSet;
    ///
    /// #[derive(Serialize)]
    /// struct Parse<'a> {
    ///     action: &'a str,
    ///     page: &'a str,
    ///     prop: Vec<&'a str>,
    ///     section: Option<u32>,
    /// }
    ///
    /// let set = ParamSet::record(&Parse {
    ///     action: "parse",
    ///     page: "Main Page",
    ///     prop: vec!["text", "links"],
    ///     section: None,
    /// })
    /// .unwrap();
    ///
    /// let normalized = set.normalize().unwrap();
    /// assert_eq!(normalized.get("prop"), Some("text|links"));
    /// assert_eq!(normalized.get("section"), None);
    /// ```
    pub fn record<T: Serialize>(record: &T) -> Result<Self> {
        serde_json::to_value(record)
            .map(ParamSet::Record)
            .map_err(|_| Error::UnsupportedParameterKind {
                key: String::new(),
                kind: "unserializable record",
            })
    }

    /// Normalizes the set into form fields and attachments.
    ///
    /// Fails as a whole if any value is unsupported; the wire defaults are
    /// added for keys the caller did not set.
    pub fn normalize(self) -> Result<Normalized> {
        let mut out = Normalized::default();

        match self {
            ParamSet::Encoded(pairs) => {
                let mut joined: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for (key, value) in pairs {
                    joined.entry(key).or_default().push(value);
                }
                for (key, values) in joined {
                    out.fields.insert(key, values.join("|"));
                }
            }
            ParamSet::Mixed(entries) => {
                for (key, value) in entries {
                    out.add(key, value)?;
                }
            }
            ParamSet::Record(serde_json::Value::Object(map)) => {
                for (key, value) in map {
                    let value = json_value(&key, value)?;
                    out.add(key, value)?;
                }
            }
            ParamSet::Record(serde_json::Value::Null) => {}
            ParamSet::Record(_) => {
                return Err(Error::UnsupportedParameterKind {
                    key: String::new(),
                    kind: "record that is not an object",
                });
            }
        }

        for (key, value) in DEFAULTS {
            out.fields
                .entry((*key).to_string())
                .or_insert_with(|| (*value).to_string());
        }

        Ok(out)
    }
}

fn json_value(key: &str, value: serde_json::Value) -> Result<Value> {
    use serde_json::Value as Json;

    Ok(match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => Value::Text(s),
        Json::Array(items) => Value::List(
            items
                .into_iter()
                .map(|item| match item {
                    Json::Array(_) | Json::Object(_) => Err(Error::UnsupportedParameterKind {
                        key: key.to_string(),
                        kind: "nested list",
                    }),
                    scalar => json_value(key, scalar),
                })
                .collect::<Result<_>>()?,
        ),
        Json::Object(_) => {
            return Err(Error::UnsupportedParameterKind {
                key: key.to_string(),
                kind: "object",
            })
        }
    })
}

impl From<Params> for ParamSet {
    fn from(params: Params) -> Self {
        ParamSet::Mixed(params.entries)
    }
}

impl From<Vec<(String, String)>> for ParamSet {
    fn from(pairs: Vec<(String, String)>) -> Self {
        ParamSet::Encoded(pairs)
    }
}

impl From<&[(&str, &str)]> for ParamSet {
    fn from(pairs: &[(&str, &str)]) -> Self {
        ParamSet::Encoded(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl<const N: usize> From<[(&str, &str); N]> for ParamSet {
    fn from(pairs: [(&str, &str); N]) -> Self {
        ParamSet::from(&pairs[..])
    }
}

impl From<HashMap<String, String>> for ParamSet {
    fn from(map: HashMap<String, String>) -> Self {
        ParamSet::Encoded(map.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for ParamSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        ParamSet::Encoded(map.into_iter().collect())
    }
}

impl From<HashMap<String, Value>> for ParamSet {
    fn from(map: HashMap<String, Value>) -> Self {
        ParamSet::Mixed(map.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for ParamSet {
    fn from(map: BTreeMap<String, Value>) -> Self {
        ParamSet::Mixed(map.into_iter().collect())
    }
}

impl From<serde_json::Value> for ParamSet {
    fn from(value: serde_json::Value) -> Self {
        ParamSet::Record(value)
    }
}

/// Canonical request parameters: encoded fields plus file attachments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    fields: BTreeMap<String, String>,
    attachments: Vec<Attachment>,
}

impl Normalized {
    /// Returns the encoded value of a field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Returns the field value lowercased, or an empty string.
    pub(crate) fn get_lower(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_ascii_lowercase()
    }

    /// Returns `true` if the field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Sets an already-encoded field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// The encoded fields, ordered by key.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// The file attachments.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    fn add(&mut self, key: String, value: Value) -> Result<()> {
        match value {
            Value::Null | Value::Bool(false) => {}
            Value::Bool(true) => {
                self.fields.insert(key, "1".to_string());
            }
            Value::Text(s) => {
                self.fields.insert(key, s);
            }
            Value::Int(n) => {
                self.fields.insert(key, n.to_string());
            }
            Value::UInt(n) => {
                self.fields.insert(key, n.to_string());
            }
            Value::Float(f) => {
                self.fields.insert(key, f.to_string());
            }
            Value::List(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items.iter().filter(|item| **item != Value::Null) {
                    match item.list_item() {
                        Some(part) => parts.push(part),
                        None => {
                            return Err(Error::UnsupportedParameterKind {
                                key,
                                kind: item.kind(),
                            })
                        }
                    }
                }
                if !parts.is_empty() {
                    self.fields.insert(key, parts.join("|"));
                }
            }
            Value::File(part) => {
                let filename = part.filename.unwrap_or_else(|| key.clone());
                self.attachments.push(Attachment {
                    field: key,
                    filename,
                    content_type: part.content_type,
                    data: part.data,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(params: Params) -> Normalized {
        ParamSet::from(params).normalize().unwrap()
    }

    #[test]
    fn encodes_each_value_kind() {
        let n = normalize(
            Params::new()
                .set("title", "Main Page")
                .set("bot", true)
                .set("minor", false)
                .set("prop", vec!["info", "revisions"])
                .set("limit", 50)
                .set("offset", -3i64)
                .set("ratio", 2.0)
                .set("weight", 0.25)
                .set("section", Option::<u32>::None)
                .set("empty", Vec::<String>::new()),
        );

        assert_eq!(n.get("title"), Some("Main Page"));
        assert_eq!(n.get("bot"), Some("1"));
        assert_eq!(n.get("minor"), None);
        assert_eq!(n.get("prop"), Some("info|revisions"));
        assert_eq!(n.get("limit"), Some("50"));
        assert_eq!(n.get("offset"), Some("-3"));
        assert_eq!(n.get("ratio"), Some("2"));
        assert_eq!(n.get("weight"), Some("0.25"));
        assert!(!n.contains_key("section"));
        assert!(!n.contains_key("empty"));
        assert!(n.attachments().is_empty());
    }

    #[test]
    fn large_floats_have_no_exponent_or_separators() {
        let n = normalize(Params::new().set("big", 1.0e21).set("ts", 1700000000u64));
        assert_eq!(n.get("big"), Some("1000000000000000000000"));
        assert_eq!(n.get("ts"), Some("1700000000"));
    }

    #[test]
    fn applies_defaults_only_when_absent() {
        let n = normalize(Params::new());
        assert_eq!(n.get("action"), Some("query"));
        assert_eq!(n.get("format"), Some("json"));
        assert_eq!(n.get("formatversion"), Some("2"));
        assert_eq!(n.get("errorformat"), Some("plaintext"));

        let n = normalize(
            Params::new()
                .set("action", "parse")
                .set("formatversion", 1)
                .set("errorformat", ""),
        );
        assert_eq!(n.get("action"), Some("parse"));
        assert_eq!(n.get("formatversion"), Some("1"));
        assert_eq!(n.get("errorformat"), Some(""));
        assert_eq!(n.get("format"), Some("json"));
    }

    #[test]
    fn encoded_pairs_join_repeated_keys() {
        let set = ParamSet::from(vec![
            ("titles".to_string(), "A".to_string()),
            ("titles".to_string(), "B".to_string()),
            ("prop".to_string(), "info".to_string()),
        ]);
        let n = set.normalize().unwrap();
        assert_eq!(n.get("titles"), Some("A|B"));
        assert_eq!(n.get("prop"), Some("info"));
    }

    #[test]
    fn array_of_pairs_converts() {
        let n = ParamSet::from([("action", "edit"), ("title", "X")])
            .normalize()
            .unwrap();
        assert_eq!(n.get("action"), Some("edit"));
        assert_eq!(n.get("title"), Some("X"));
    }

    #[test]
    fn bytes_and_named_parts_become_attachments() {
        let n = normalize(
            Params::new()
                .set("action", "upload")
                .set("file", b"PNGDATA".to_vec())
                .set(
                    "chunk",
                    FilePart::new(Bytes::from_static(b"abc"))
                        .filename("photo.png")
                        .content_type("image/png"),
                ),
        );

        assert!(!n.contains_key("file"));
        assert_eq!(n.attachments().len(), 2);
        assert_eq!(n.attachments()[0].field, "file");
        assert_eq!(n.attachments()[0].filename, "file");
        assert_eq!(n.attachments()[0].data, Bytes::from_static(b"PNGDATA"));
        assert_eq!(n.attachments()[1].filename, "photo.png");
        assert_eq!(n.attachments()[1].content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn list_rules() {
        let n = normalize(Params::new().set(
            "mixed",
            vec![Value::from("a"), Value::Null, Value::from(2), Value::from(true)],
        ));
        assert_eq!(n.get("mixed"), Some("a|2|true"));

        let n = normalize(Params::new().set("only_nulls", vec![Value::Null]));
        assert!(!n.contains_key("only_nulls"));
    }

    #[test]
    fn nested_list_fails_whole_set() {
        let err = ParamSet::from(
            Params::new()
                .set("ok", "fine")
                .set("bad", vec![Value::List(vec![Value::from("x")])]),
        )
        .normalize()
        .unwrap_err();

        match err {
            Error::UnsupportedParameterKind { key, kind } => {
                assert_eq!(key, "bad");
                assert_eq!(kind, "nested list");
            }
            other => panic!("Expected UnsupportedParameterKind, got {:?}", other),
        }
    }

    #[test]
    fn records_are_objects_of_scalars() {
        #[derive(Serialize)]
        struct Query {
            list: &'static str,
            aplimit: u32,
            apfilterredir: Option<&'static str>,
            redirects: bool,
        }

        let n = ParamSet::record(&Query {
            list: "allpages",
            aplimit: 10,
            apfilterredir: None,
            redirects: false,
        })
        .unwrap()
        .normalize()
        .unwrap();

        assert_eq!(n.get("list"), Some("allpages"));
        assert_eq!(n.get("aplimit"), Some("10"));
        assert!(!n.contains_key("apfilterredir"));
        assert!(!n.contains_key("redirects"));
    }

    #[test]
    fn unsupported_records_fail_closed() {
        let err = ParamSet::from(serde_json::json!(["a", "b"]))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedParameterKind { .. }));

        let err = ParamSet::from(serde_json::json!({"nested": {"a": 1}}))
            .normalize()
            .unwrap_err();
        match err {
            Error::UnsupportedParameterKind { key, kind } => {
                assert_eq!(key, "nested");
                assert_eq!(kind, "object");
            }
            other => panic!("Expected UnsupportedParameterKind, got {:?}", other),
        }
    }

    #[test]
    fn later_set_replaces_earlier_value() {
        let n = normalize(Params::new().set("title", "A").set("title", "B"));
        assert_eq!(n.get("title"), Some("B"));
    }
}
