//! Cache key derivation for memoized producers.
//!
//! A key is `cache:<producer>:<digest>`, where the digest is the first 128 bits
//! (hex) of a SHA-256 over a canonical text form of the call's arguments.
//! Named arguments are kept sorted by name, so the order in which they were
//! supplied never changes the key.
//!
//! Arguments are captured through their JSON form. Values that cannot be
//! represented as JSON fall back to their `Debug` text. Two different values
//! with the same printed form therefore produce the same key; this is an
//! accepted approximation, not something the cache tries to detect.
//!
//! Hash-ordered collections (`HashSet`, `HashMap`) give unstable keys: every
//! instance has its own `RandomState`, so two equal sets iterate, serialize and
//! print in different orders. Pass them as `BTreeSet` / `BTreeMap`, or add a
//! set through [`CallArgs::arg_unordered`], which sorts the elements first.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

pub const KEY_NAMESPACE: &str = "cache";
const DIGEST_BYTES: usize = 16;

/// Positional and named arguments of one producer call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<T>(mut self, value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        self.positional.push(to_key_value(value));
        self
    }

    /// Adds a named argument; a repeated name replaces the earlier value.
    pub fn kwarg<T>(mut self, name: impl Into<String>, value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        self.named.insert(name.into(), to_key_value(value));
        self
    }

    /// Adds a collection whose element order carries no meaning, such as a
    /// `HashSet`. Elements are sorted by their JSON text before hashing.
    pub fn arg_unordered<T>(mut self, value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        self.positional.push(sort_elements(to_key_value(value)));
        self
    }

    pub fn kwarg_unordered<T>(mut self, name: impl Into<String>, value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        self.named.insert(name.into(), sort_elements(to_key_value(value)));
        self
    }

    pub fn with_raw_arg(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    pub fn with_raw_kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named_args(&self) -> &BTreeMap<String, Value> {
        &self.named
    }

    /// Decodes the positional argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Option<T> {
        self.positional
            .get(index)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Decodes the named argument `name`.
    pub fn named<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.named
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// The text that gets hashed: positional values in call order, then
    /// `(name, value)` pairs sorted by name.
    pub fn canonical(&self) -> String {
        let mut out = String::from("[");
        for (i, value) in self.positional.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}", value);
        }
        out.push_str("][");
        for (i, (name, value)) in self.named.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "({:?}, {})", name, value);
        }
        out.push(']');
        out
    }
}

fn to_key_value<T>(value: &T) -> Value
where
    T: Serialize + fmt::Debug + ?Sized,
{
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(format!("{:?}", value)))
}

fn sort_elements(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut keyed: Vec<(String, Value)> = items.into_iter().map(|v| (v.to_string(), v)).collect();
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(keyed.into_iter().map(|(_, v)| v).collect())
        }
        other => other,
    }
}

/// Anything a memoized producer can be called with.
pub trait Arguments {
    fn to_call_args(&self) -> CallArgs;
}

impl Arguments for CallArgs {
    fn to_call_args(&self) -> CallArgs {
        self.clone()
    }
}

impl Arguments for () {
    fn to_call_args(&self) -> CallArgs {
        CallArgs::new()
    }
}

macro_rules! impl_arguments_for_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name),+> Arguments for ($($name,)+)
        where
            $($name: Serialize + fmt::Debug),+
        {
            fn to_call_args(&self) -> CallArgs {
                CallArgs::new()$(.arg(&self.$idx))+
            }
        }
    };
}

impl_arguments_for_tuple!(A: 0);
impl_arguments_for_tuple!(A: 0, B: 1);
impl_arguments_for_tuple!(A: 0, B: 1, C: 2);
impl_arguments_for_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_arguments_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The producer identity embedded in the key.
    pub fn producer(&self) -> &str {
        let rest = self
            .0
            .strip_prefix(KEY_NAMESPACE)
            .and_then(|r| r.strip_prefix(':'))
            .unwrap_or(&self.0);
        rest.rsplit_once(':').map(|(name, _)| name).unwrap_or(rest)
    }

    pub fn digest(&self) -> &str {
        self.0.rsplit_once(':').map(|(_, d)| d).unwrap_or("")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

pub fn derive_key(producer: &str, args: &CallArgs) -> CacheKey {
    let digest = Sha256::digest(args.canonical().as_bytes());
    CacheKey(format!(
        "{}:{}:{}",
        KEY_NAMESPACE,
        producer,
        hex::encode(&digest[..DIGEST_BYTES])
    ))
}

/// Glob pattern matching every key of one producer.
pub fn producer_pattern(producer: &str) -> String {
    format!("{}:{}:*", KEY_NAMESPACE, producer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeSet, HashSet};

    #[test]
    fn key_has_namespace_producer_and_128_bit_digest() {
        let key = derive_key("fetch_news", &CallArgs::new().arg("HPG"));
        assert!(key.as_str().starts_with("cache:fetch_news:"));
        assert_eq!(key.digest().len(), 32);
        assert!(key.digest().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.producer(), "fetch_news");
    }

    #[test]
    fn same_arguments_same_key() {
        let a = CallArgs::new().arg("HPG").kwarg("days", &7);
        let b = CallArgs::new().arg("HPG").kwarg("days", &7);
        assert_eq!(derive_key("fetch", &a), derive_key("fetch", &b));
    }

    #[test]
    fn named_argument_order_does_not_matter() {
        let a = CallArgs::new().kwarg("ticker", "HPG").kwarg("limit", &50);
        let b = CallArgs::new().kwarg("limit", &50).kwarg("ticker", "HPG");
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(derive_key("fetch", &a), derive_key("fetch", &b));
    }

    #[test]
    fn positional_order_matters() {
        let a = CallArgs::new().arg("HPG").arg("VNM");
        let b = CallArgs::new().arg("VNM").arg("HPG");
        assert_ne!(derive_key("fetch", &a), derive_key("fetch", &b));
    }

    #[test]
    fn different_values_or_producers_differ() {
        let hpg = CallArgs::new().kwarg("ticker", "HPG");
        let vnm = CallArgs::new().kwarg("ticker", "VNM");
        assert_ne!(derive_key("fetch", &hpg), derive_key("fetch", &vnm));
        assert_ne!(derive_key("fetch", &hpg), derive_key("fetch_profile", &hpg));
    }

    #[test]
    fn positional_and_named_are_not_interchangeable() {
        let positional = CallArgs::new().arg("HPG");
        let named = CallArgs::new().kwarg("ticker", "HPG");
        assert_ne!(derive_key("fetch", &positional), derive_key("fetch", &named));
    }

    #[test]
    fn non_json_values_fall_back_to_debug_text() {
        let mut grid: BTreeMap<(i32, i32), i32> = BTreeMap::new();
        for (x, y) in [(3, 1), (1, 2), (2, 7), (0, 0), (5, 5), (4, 9)] {
            grid.insert((x, y), x * y);
        }
        let mut reversed: BTreeMap<(i32, i32), i32> = BTreeMap::new();
        for (x, y) in [(4, 9), (5, 5), (0, 0), (2, 7), (1, 2), (3, 1)] {
            reversed.insert((x, y), x * y);
        }

        let args = CallArgs::new().arg(&grid);
        assert_eq!(args.positional()[0], Value::String(format!("{:?}", grid)));
        assert_eq!(derive_key("grid", &args), derive_key("grid", &CallArgs::new().arg(&reversed)));
    }

    #[test]
    fn ordered_sets_give_stable_keys() {
        let tickers = ["HPG", "VNM", "FPT", "MWG", "SSI", "VCB"];
        let forward: BTreeSet<&str> = tickers.iter().copied().collect();
        let backward: BTreeSet<&str> = tickers.iter().rev().copied().collect();
        assert_eq!(
            derive_key("fetch", &CallArgs::new().arg(&forward)),
            derive_key("fetch", &CallArgs::new().arg(&backward))
        );
    }

    #[test]
    fn unordered_helpers_sort_hash_set_elements() {
        let tickers = ["HPG", "VNM", "FPT", "MWG", "SSI", "VCB"];
        let sorted: BTreeSet<&str> = tickers.iter().copied().collect();
        let expected = derive_key("fetch", &CallArgs::new().arg(&sorted).kwarg("watch", &sorted));
        for _ in 0..20 {
            let a: HashSet<&str> = tickers.iter().copied().collect();
            let b: HashSet<&str> = tickers.iter().rev().copied().collect();
            let args_a = CallArgs::new().arg_unordered(&a).kwarg_unordered("watch", &a);
            let args_b = CallArgs::new().arg_unordered(&b).kwarg_unordered("watch", &b);
            assert_eq!(derive_key("fetch", &args_a), expected);
            assert_eq!(derive_key("fetch", &args_b), expected);
        }
    }

    #[test]
    fn tuple_arguments_are_positional() {
        let args = ("HPG", 3u32).to_call_args();
        assert_eq!(args, CallArgs::new().arg("HPG").arg(&3u32));
        assert!(().to_call_args().is_empty());
    }

    #[test]
    fn typed_accessors_decode_values() {
        let args = CallArgs::new().arg(&42u64).kwarg("ticker", "HPG");
        assert_eq!(args.get::<u64>(0), Some(42));
        assert_eq!(args.named::<String>("ticker").as_deref(), Some("HPG"));
        assert_eq!(args.named::<String>("missing"), None);
        assert_eq!(args.get::<String>(0), None);
    }

    #[test]
    fn producer_pattern_covers_derived_keys() {
        assert_eq!(producer_pattern("fetch"), "cache:fetch:*");
    }
}
