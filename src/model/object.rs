use crate::error::ModelError;
use indexmap::IndexMap;

/// Object identifier: object number and generation number.
///
/// Mirrors lopdf's `ObjectId`; kept as a plain tuple so crypt filters can
/// destructure it without pulling in a newtype wrapper this crate doesn't
/// otherwise need.
pub type ObjectId = (u32, u16);

/// Dictionary object. Preserves insertion order, matching the teacher's
/// choice of `IndexMap` over `BTreeMap` so that `/Encrypt` dictionaries
/// serialize with entries in the order this crate wrote them.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct Dictionary(IndexMap<Vec<u8>, Object>);

impl Dictionary {
    pub fn new() -> Self {
        Dictionary(IndexMap::new())
    }

    pub fn set<K: Into<Vec<u8>>, V: Into<Object>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &[u8]) -> Result<&Object, ModelError> {
        self.0
            .get(key)
            .ok_or_else(|| ModelError::MissingKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Object)> {
        self.0.iter().map(|(k, v)| (k.as_slice(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Vec<u8>, &mut Object)> {
        self.0.iter_mut()
    }

    pub fn has_type(&self, type_name: &[u8]) -> bool {
        self.get(b"Type")
            .ok()
            .and_then(Object::as_name)
            .map(|name| name == type_name)
            .unwrap_or(false)
    }
}

/// Stream object. All streams in a real PDF are indirect objects; the
/// dictionary may still be embedded directly, matching lopdf.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub dict: Dictionary,
    pub content: Vec<u8>,
}

impl Stream {
    pub fn new(dict: Dictionary, content: Vec<u8>) -> Self {
        Stream { dict, content }
    }

    pub fn set_content(&mut self, content: Vec<u8>) {
        self.content = content;
    }

    /// Names in the `/Filter` chain, in declaration order.
    pub fn filters(&self) -> Option<Vec<&[u8]>> {
        match self.dict.get(b"Filter").ok()? {
            Object::Name(name) => Some(vec![name.as_slice()]),
            Object::Array(names) => Some(names.iter().filter_map(Object::as_name).collect()),
            _ => None,
        }
    }

    /// Attaches a named crypt filter override to this stream, as used by
    /// `test_custom_crypt_filter` / `test_custom_pubkey_crypt_filter` in the
    /// original implementation this spec was distilled from: a stream can opt
    /// into a crypt filter other than the string/stream default by declaring
    /// `/Crypt` in its filter chain and naming the filter in `/DecodeParms`.
    pub fn add_crypt_filter_override(&mut self, name: &[u8]) {
        let mut filters = self
            .filters()
            .map(|names| names.into_iter().map(|n| n.to_vec()).collect::<Vec<_>>())
            .unwrap_or_default();
        if !filters.iter().any(|f| f == b"Crypt") {
            filters.insert(0, b"Crypt".to_vec());
        }
        self.dict.set(
            "Filter",
            Object::Array(filters.into_iter().map(Object::Name).collect()),
        );

        let mut parms = Dictionary::new();
        parms.set("Name", Object::Name(name.to_vec()));
        self.dict.set("DecodeParms", Object::Dictionary(parms));
    }
}

/// Basic PDF object types, trimmed to what the security handler core touches:
/// string and stream payloads must be locatable for en/decryption, everything
/// else is opaque to us.
#[derive(Clone, PartialEq, Debug)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Name(Vec<u8>),
    String(Vec<u8>, StringFormat),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Integer(value)
    }
}

impl From<Dictionary> for Object {
    fn from(dict: Dictionary) -> Self {
        Object::Dictionary(dict)
    }
}

impl From<Vec<Object>> for Object {
    fn from(array: Vec<Object>) -> Self {
        Object::Array(array)
    }
}

impl<'a> From<&'a str> for Object {
    fn from(name: &'a str) -> Self {
        Object::Name(name.as_bytes().to_vec())
    }
}

impl Object {
    pub fn string_literal<S: Into<Vec<u8>>>(bytes: S) -> Self {
        Object::String(bytes.into(), StringFormat::Literal)
    }

    pub fn as_i64(&self) -> Result<i64, ModelError> {
        match self {
            Object::Integer(value) => Ok(*value),
            _ => Err(ModelError::WrongType { key: String::new(), expected: "Integer" }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ModelError> {
        match self {
            Object::Boolean(value) => Ok(*value),
            _ => Err(ModelError::WrongType { key: String::new(), expected: "Boolean" }),
        }
    }

    pub fn as_name(&self) -> Option<&[u8]> {
        match self {
            Object::Name(name) => Some(name.as_slice()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Result<&[u8], ModelError> {
        match self {
            Object::String(content, _) => Ok(content.as_slice()),
            _ => Err(ModelError::WrongType { key: String::new(), expected: "String" }),
        }
    }

    pub fn as_array(&self) -> Result<&[Object], ModelError> {
        match self {
            Object::Array(items) => Ok(items.as_slice()),
            _ => Err(ModelError::WrongType { key: String::new(), expected: "Array" }),
        }
    }

    pub fn as_dict(&self) -> Result<&Dictionary, ModelError> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(ModelError::WrongType { key: String::new(), expected: "Dictionary" }),
        }
    }

    pub fn as_stream(&self) -> Result<&Stream, ModelError> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(ModelError::WrongType { key: String::new(), expected: "Stream" }),
        }
    }

    pub fn type_name(&self) -> Option<&[u8]> {
        self.as_dict()
            .ok()
            .or_else(|| self.as_stream().ok().map(|s| &s.dict))
            .and_then(|dict| dict.get(b"Type").ok())
            .and_then(Object::as_name)
    }
}

/// Builds a [`Dictionary`] from `key => value` pairs, matching lopdf's
/// `dictionary!` macro so callers assembling `/Encrypt` sub-dictionaries read
/// the same way the teacher's object-construction code does.
#[macro_export]
macro_rules! dictionary {
    () => { $crate::model::Dictionary::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut dict = $crate::model::Dictionary::new();
        $(dict.set($key, $value);)+
        dict
    }};
}
