use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Request headers grouped by name, in arrival order.
///
/// Repeated headers keep every value under a single entry, the same way
/// they arrived on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderBag(IndexMap<String, Vec<String>>);

impl HeaderBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, grouping it with earlier values of the same name.
    ///
    /// Names are grouped case-insensitively; the first spelling seen is kept.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some((_, values)) = self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            values.push(value.into());
            return;
        }
        self.0.insert(name, vec![value.into()]);
    }

    /// All values for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderBag {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut bag = HeaderBag::new();
        for (name, value) in iter {
            bag.append(name, value);
        }
        bag
    }
}

/// Which request headers get persisted with a webhook call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HeaderPolicy {
    #[default]
    All,
    Only(Vec<String>),
}

// Config form is either the string "*" or a list of header names.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPolicy {
    Wildcard(String),
    Names(Vec<String>),
}

impl<'de> Deserialize<'de> for HeaderPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawPolicy::deserialize(deserializer)? {
            RawPolicy::Wildcard(s) if s == "*" => Ok(HeaderPolicy::All),
            RawPolicy::Wildcard(s) => Err(serde::de::Error::custom(format!(
                "store_headers must be \"*\" or a list of header names, got \"{s}\""
            ))),
            RawPolicy::Names(names) => Ok(HeaderPolicy::Only(names)),
        }
    }
}

impl Serialize for HeaderPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HeaderPolicy::All => RawPolicy::Wildcard("*".to_string()).serialize(serializer),
            HeaderPolicy::Only(names) => RawPolicy::Names(names.clone()).serialize(serializer),
        }
    }
}

/// Pick the headers to persist according to `policy`.
pub fn select(policy: &HeaderPolicy, headers: &HeaderBag) -> HeaderBag {
    let wanted = match policy {
        HeaderPolicy::All => return headers.clone(),
        HeaderPolicy::Only(names) => names
            .iter()
            .map(|n| n.to_ascii_lowercase())
            .collect::<Vec<_>>(),
    };

    HeaderBag(
        headers
            .0
            .iter()
            .filter(|(name, _)| wanted.contains(&name.to_ascii_lowercase()))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect(),
    )
}
