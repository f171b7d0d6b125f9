//! Case-insensitive multi-value header storage.
//!
//! [`HeaderStore`] maps header names (compared ASCII case-insensitively) to
//! ordered arrays of raw string values. Each array element corresponds to one
//! header line as received; values are never split on commas at storage time.
//! The comma-aware logical view is derived on demand through
//! [`get_normalized`](HeaderStore::get_normalized).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::tokenizer;

/// An insertion-ordered, case-insensitive map from header name to raw values.
///
/// Invariant: the store never contains a key mapped to an empty array.
/// Setting a key to an empty array removes it; appending an empty value is
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderStore {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Returns the raw value array for `name`, one element per header line.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|at| self.entries[at].1.as_slice())
    }

    /// Returns all raw values joined with `,` and no extra trimming; quotes
    /// and inner spaces are preserved verbatim.
    pub fn get_joined(&self, name: &str) -> Option<String> {
        self.get(name).map(|values| values.join(","))
    }

    /// Returns the logical values of `name`: the quote-aware comma split of
    /// the raw array, recomputed per read and never persisted.
    pub fn get_normalized(&self, name: &str) -> Vec<String> {
        self.get(name).map(tokenizer::normalize_values).unwrap_or_default()
    }

    /// Replaces the value array for `name`. An empty array removes the key.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        if values.is_empty() {
            self.remove(name);
            return;
        }
        match self.position(name) {
            Some(at) => self.entries[at].1 = values,
            None => self.entries.push((name.to_owned(), values)),
        }
    }

    /// Replaces `name` with a single raw value. An empty value removes the key.
    pub fn set_value(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.remove(name);
        } else {
            self.set(name, vec![value]);
        }
    }

    /// Adds one more raw array element for `name`. Empty values are ignored.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        match self.position(name) {
            Some(at) => self.entries[at].1.push(value),
            None => self.entries.push((name.to_owned(), vec![value])),
        }
    }

    /// Like [`set`](Self::set), but wraps any element containing a comma in
    /// double quotes before storing, so it survives the comma tokenizer.
    pub fn set_comma_separated(&mut self, name: &str, values: Vec<String>) {
        self.set(name, values.into_iter().map(quote_commas).collect());
    }

    /// Like [`append`](Self::append), but quotes the value when it contains a
    /// comma.
    pub fn append_comma_separated(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.append(name, quote_commas(value));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(name, values)| (name.as_str(), values.as_slice()))
    }
}

fn quote_commas(value: String) -> String {
    if value.contains(',') { format!("\"{value}\"") } else { value }
}

/// A shareable handle over a [`HeaderStore`].
///
/// The environment holds header collections by handle so that the guarded
/// assign-once semantics can compare identities via [`ptr_eq`](Self::ptr_eq).
#[derive(Debug, Clone, Default)]
pub struct SharedHeaders {
    inner: Arc<Mutex<HeaderStore>>,
}

impl SharedHeaders {
    pub fn new(store: HeaderStore) -> Self {
        Self { inner: Arc::new(Mutex::new(store)) }
    }

    fn lock(&self) -> MutexGuard<'_, HeaderStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn get(&self, name: &str) -> Option<Vec<String>> {
        self.lock().get(name).map(<[String]>::to_vec)
    }

    pub fn get_joined(&self, name: &str) -> Option<String> {
        self.lock().get_joined(name)
    }

    pub fn get_normalized(&self, name: &str) -> Vec<String> {
        self.lock().get_normalized(name)
    }

    pub fn set(&self, name: &str, values: Vec<String>) {
        self.lock().set(name, values);
    }

    pub fn set_value(&self, name: &str, value: impl Into<String>) {
        self.lock().set_value(name, value);
    }

    pub fn append(&self, name: &str, value: impl Into<String>) {
        self.lock().append(name, value);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.lock().remove(name)
    }

    /// Clones the current contents out of the handle.
    pub fn snapshot(&self) -> HeaderStore {
        self.lock().clone()
    }

    /// True when both handles point at the same underlying store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
