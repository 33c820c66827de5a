//! Stored values.
//!
//! A key holds exactly one [`Value`] variant. Commands reach the inner data
//! through the typed accessors, which yield `WrongType` instead of coercing.

use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

use super::sorted_set::SortedSet;
use crate::error::CommandError;

#[derive(Debug, Clone)]
pub enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    Set(HashSet<Bytes>),
    SortedSet(SortedSet),
}

macro_rules! accessors {
    ($variant:ident, $ty:ty, $as_ref:ident, $as_mut:ident) => {
        pub fn $as_ref(&self) -> Result<&$ty, CommandError> {
            match self {
                Value::$variant(inner) => Ok(inner),
                _ => Err(CommandError::WrongType),
            }
        }

        pub fn $as_mut(&mut self) -> Result<&mut $ty, CommandError> {
            match self {
                Value::$variant(inner) => Ok(inner),
                _ => Err(CommandError::WrongType),
            }
        }
    };
}

impl Value {
    accessors!(Str, Bytes, as_str, as_str_mut);
    accessors!(List, VecDeque<Bytes>, as_list, as_list_mut);
    accessors!(Hash, HashMap<Bytes, Bytes>, as_hash, as_hash_mut);
    accessors!(Set, HashSet<Bytes>, as_set, as_set_mut);
    accessors!(SortedSet, SortedSet, as_zset, as_zset_mut);

    pub fn new_list() -> Self {
        Value::List(VecDeque::new())
    }

    pub fn new_hash() -> Self {
        Value::Hash(HashMap::new())
    }

    pub fn new_set() -> Self {
        Value::Set(HashSet::new())
    }

    pub fn new_zset() -> Self {
        Value::SortedSet(SortedSet::new())
    }

    /// Name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
        }
    }

    /// True for a container with no elements. Strings are never "empty" here.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::SortedSet(z) => z.is_empty(),
        }
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value::Str(data)
    }
}
