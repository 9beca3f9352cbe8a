//! What a memoized producer may return, and which results get stored.

use crate::error::CacheError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// A producer result that can round-trip through a cache blob.
///
/// `should_cache` lets a result opt out of being stored. `None` and empty
/// [`Frame`]s opt out so that failed or transient empty fetches are retried on
/// the next call; genuinely empty results pay the same repeated cost.
pub trait Cacheable: Serialize + DeserializeOwned {
    fn should_cache(&self) -> bool {
        true
    }
}

impl<T: Cacheable> Cacheable for Option<T> {
    fn should_cache(&self) -> bool {
        match self {
            Some(inner) => inner.should_cache(),
            None => false,
        }
    }
}

impl Cacheable for Value {
    fn should_cache(&self) -> bool {
        !self.is_null()
    }
}

macro_rules! always_cacheable {
    ($($ty:ty),* $(,)?) => {
        $(impl Cacheable for $ty {})*
    };
}

always_cacheable!(bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, String);

impl<T: Serialize + DeserializeOwned> Cacheable for Vec<T> {}

impl<K, V> Cacheable for HashMap<K, V>
where
    K: Serialize + DeserializeOwned + Eq + Hash,
    V: Serialize + DeserializeOwned,
{
}

impl<K, V> Cacheable for BTreeMap<K, V>
where
    K: Serialize + DeserializeOwned + Ord,
    V: Serialize + DeserializeOwned,
{
}

static NULL: Value = Value::Null;

/// A small column-oriented table, the shape most pipeline fetchers return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Builds a frame from serializable records (structs or maps).
    /// Columns are the first record's keys, sorted by name; later records
    /// missing a column get `null` and extra keys are dropped.
    pub fn from_records<T: Serialize>(records: &[T]) -> Result<Self, CacheError> {
        let mut objects: Vec<Map<String, Value>> = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::to_value(record)? {
                Value::Object(map) => objects.push(map),
                other => {
                    return Err(CacheError::Serialization(format!(
                        "record is not an object: {}",
                        other
                    )))
                }
            }
        }

        let columns: Vec<String> = objects
            .first()
            .map(|first| first.keys().cloned().collect())
            .unwrap_or_default();
        let rows = objects
            .into_iter()
            .map(|mut obj| {
                columns
                    .iter()
                    .map(|c| obj.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), CacheError> {
        if row.len() != self.columns.len() {
            return Err(CacheError::Serialization(format!(
                "row has {} values, frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, or `None` if the column does not exist.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value> + '_> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(move |row| row.get(idx).unwrap_or(&NULL)))
    }
}

impl Cacheable for Frame {
    fn should_cache(&self) -> bool {
        !self.is_empty()
    }
}
