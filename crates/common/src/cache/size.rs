//! Size estimation and the "worth caching" guard for cached values

use std::collections::{BTreeMap, HashMap};
use std::mem::size_of;
use std::sync::Arc;

/// Values the adaptive cache can store
///
/// `estimated_size` is a heuristic used for reporting, not an exact heap
/// measurement. `is_cacheable` returns `false` for values that carry nothing
/// to show (empty strings, empty collections, `None`, JSON `null`); caching
/// those would mask a transient empty result until the entry expires.
pub trait Cacheable: Clone + Send + Sync + 'static {
    fn estimated_size(&self) -> usize;

    fn is_cacheable(&self) -> bool {
        true
    }
}

macro_rules! impl_cacheable_for_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Cacheable for $ty {
                fn estimated_size(&self) -> usize {
                    size_of::<$ty>()
                }
            }
        )*
    };
}

impl_cacheable_for_primitive!(bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl Cacheable for String {
    fn estimated_size(&self) -> usize {
        size_of::<Self>() + self.len()
    }

    fn is_cacheable(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Cacheable> Cacheable for Vec<T> {
    fn estimated_size(&self) -> usize {
        size_of::<Self>() + self.iter().map(Cacheable::estimated_size).sum::<usize>()
    }

    fn is_cacheable(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Cacheable> Cacheable for Option<T> {
    fn estimated_size(&self) -> usize {
        self.as_ref().map_or(size_of::<Self>(), Cacheable::estimated_size)
    }

    fn is_cacheable(&self) -> bool {
        self.as_ref().is_some_and(Cacheable::is_cacheable)
    }
}

impl<T: Cacheable> Cacheable for Arc<T> {
    fn estimated_size(&self) -> usize {
        (**self).estimated_size()
    }

    fn is_cacheable(&self) -> bool {
        (**self).is_cacheable()
    }
}

impl<T: Cacheable, S> Cacheable for HashMap<String, T, S>
where
    S: std::hash::BuildHasher + Clone + Send + Sync + 'static,
{
    fn estimated_size(&self) -> usize {
        size_of::<Self>()
            + self.iter().map(|(k, v)| k.estimated_size() + v.estimated_size()).sum::<usize>()
    }

    fn is_cacheable(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Cacheable> Cacheable for BTreeMap<String, T> {
    fn estimated_size(&self) -> usize {
        size_of::<Self>()
            + self.iter().map(|(k, v)| k.estimated_size() + v.estimated_size()).sum::<usize>()
    }

    fn is_cacheable(&self) -> bool {
        !self.is_empty()
    }
}

impl Cacheable for serde_json::Value {
    fn estimated_size(&self) -> usize {
        use serde_json::Value;
        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) => size_of::<Value>(),
            Value::String(s) => size_of::<Value>() + s.len(),
            Value::Array(items) => {
                size_of::<Value>() + items.iter().map(Cacheable::estimated_size).sum::<usize>()
            }
            Value::Object(map) => {
                size_of::<Value>()
                    + map.iter().map(|(k, v)| k.len() + v.estimated_size()).sum::<usize>()
            }
        }
    }

    fn is_cacheable(&self) -> bool {
        use serde_json::Value;
        match self {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Bool(_) | Value::Number(_) => true,
        }
    }
}
