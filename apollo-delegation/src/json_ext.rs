//! Performance oriented JSON manipulation.

#![allow(missing_docs)]

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// A path element in a response: either an object key or a list index.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index in a list.
    Index(usize),

    /// A key in an object.
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => f.write_str(key),
        }
    }
}

impl From<&str> for PathElement {
    fn from(key: &str) -> Self {
        PathElement::Key(key.to_string())
    }
}

impl From<String> for PathElement {
    fn from(key: String) -> Self {
        PathElement::Key(key)
    }
}

impl From<usize> for PathElement {
    fn from(index: usize) -> Self {
        PathElement::Index(index)
    }
}

/// A path into the result document.
///
/// Serialized as a JSON array of keys and indexes, the same way GraphQL errors carry them.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn from_slice<T: Into<PathElement> + Clone>(elements: &[T]) -> Self {
        Path(elements.iter().cloned().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&PathElement> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    pub fn push(&mut self, element: impl Into<PathElement>) {
        self.0.push(element.into())
    }

    /// Returns a new path with `element` appended.
    pub fn join(&self, element: impl Into<PathElement>) -> Path {
        let mut path = self.clone();
        path.push(element);
        path
    }

    /// Returns a new path with every element of `other` appended.
    pub fn concat(&self, other: &Path) -> Path {
        Path(self.0.iter().chain(other.0.iter()).cloned().collect())
    }

    /// True if `prefix` is a prefix of this path (a path is a prefix of itself).
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Removes `prefix` from the start of the path, if it is one.
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        self.0
            .strip_prefix(prefix.0.as_slice())
            .map(|rest| Path(rest.to_vec()))
    }

    /// Every element but the first one.
    pub fn tail(&self) -> Path {
        Path(self.0.iter().skip(1).cloned().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

impl<T> From<Vec<T>> for Path
where
    T: Into<PathElement>,
{
    fn from(elements: Vec<T>) -> Self {
        Path(elements.into_iter().map(Into::into).collect())
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<I: IntoIterator<Item = PathElement>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

/// Extension trait for [`Value`].
pub trait ValueExt {
    /// Returns the value found at `path`, if every element of it exists.
    fn get_path<'a>(&'a self, path: &Path) -> Option<&'a Value>;

    /// Merges `other` into `self`: objects and arrays are merged recursively, anything else is
    /// replaced.
    fn deep_merge(&mut self, other: Value);

    /// Deep merges `other` into the value at `path`, creating missing object keys on the way.
    /// Does nothing if `path` crosses a non-container or a missing list item.
    fn merge_at(&mut self, path: &Path, other: Value);
}

impl ValueExt for Value {
    fn get_path<'a>(&'a self, path: &Path) -> Option<&'a Value> {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object)) => object.get(key.as_str())?,
                (PathElement::Index(index), Value::Array(array)) => array.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn deep_merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.get_mut(key.as_str()) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                for (index, value) in b.into_iter().enumerate() {
                    match a.get_mut(index) {
                        Some(existing) => existing.deep_merge(value),
                        None => a.push(value),
                    }
                }
            }
            (a, b) => *a = b,
        }
    }

    fn merge_at(&mut self, path: &Path, other: Value) {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object)) => object
                    .entry(key.as_str())
                    .or_insert_with(|| Value::Object(Object::new())),
                (PathElement::Index(index), Value::Array(array)) => match array.get_mut(*index) {
                    Some(item) => item,
                    None => return,
                },
                _ => return,
            };
        }
        current.deep_merge(other)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn path_serializes_as_graphql_error_path() {
        let path: Path = serde_json::from_str(r#"["user",0,"name"]"#).unwrap();
        assert_eq!(
            path,
            Path(vec![
                PathElement::Key("user".to_string()),
                PathElement::Index(0),
                PathElement::Key("name".to_string()),
            ])
        );
        assert_eq!(serde_json::to_string(&path).unwrap(), r#"["user",0,"name"]"#);
        assert_eq!(path.to_string(), "/user/0/name");
    }

    #[test]
    fn strip_prefix_only_on_matching_paths() {
        let path = Path::from_slice(&["a", "b", "c"]);
        assert_eq!(
            path.strip_prefix(&Path::from_slice(&["a"])),
            Some(Path::from_slice(&["b", "c"]))
        );
        assert_eq!(path.strip_prefix(&Path::from_slice(&["b"])), None);
        assert_eq!(path.strip_prefix(&path), Some(Path::empty()));
    }

    #[test]
    fn get_path_walks_objects_and_lists() {
        let value = json!({"a": [{"b": 1}, {"b": 2}]});
        let path = Path(vec!["a".into(), 1.into(), "b".into()]);
        assert_eq!(value.get_path(&path), Some(&json!(2)));
        assert_eq!(value.get_path(&Path::from_slice(&["missing"])), None);
    }

    #[test]
    fn deep_merge_combines_objects() {
        let mut value = json!({"a": {"b": 1}});
        value.deep_merge(json!({"a": {"c": 2}, "d": 3}));
        assert_eq!(value, json!({"a": {"b": 1, "c": 2}, "d": 3}));
    }

    #[test]
    fn merge_at_creates_missing_keys_but_not_list_items() {
        let mut value = json!({"a": [{"b": 1}]});
        value.merge_at(&Path(vec!["a".into(), 0.into()]), json!({"c": 2}));
        value.merge_at(&Path::from_slice(&["x", "y"]), json!(true));
        value.merge_at(&Path(vec!["a".into(), 5.into()]), json!({"c": 3}));
        assert_eq!(value, json!({"a": [{"b": 1, "c": 2}], "x": {"y": true}}));
    }
}
