// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! A string-keyed map that keeps the order entries were written in the
//! catalog file. Group precedence ties and the order flavors are reported
//! to hubs both depend on it.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq)]
pub struct Named<T> {
	entries: Vec<(String, T)>,
}

impl<T> Default for Named<T> {
	fn default() -> Self {
		Self {
			entries: Vec::new(),
		}
	}
}

impl<T> Named<T> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn get(&self, key: &str) -> Option<&T> {
		self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
	}

	pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
		self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.get(key).is_some()
	}

	/// Replaces an existing value in place, otherwise appends.
	pub fn insert(&mut self, key: impl Into<String>, value: T) {
		let key = key.into();
		match self.get_mut(&key) {
			Some(slot) => *slot = value,
			None => self.entries.push((key, value)),
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v))
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.entries.iter().map(|(k, _)| k.as_str())
	}
}

impl<T> FromIterator<(String, T)> for Named<T> {
	fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
		let mut named = Named::new();
		for (k, v) in iter {
			named.insert(k, v);
		}
		named
	}
}

impl<T> IntoIterator for Named<T> {
	type Item = (String, T);
	type IntoIter = std::vec::IntoIter<(String, T)>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.into_iter()
	}
}

impl<T: Serialize> Serialize for Named<T> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.entries.len()))?;
		for (k, v) in &self.entries {
			map.serialize_entry(k, v)?;
		}
		map.end()
	}
}

struct NamedVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for NamedVisitor<T> {
	type Value = Named<T>;

	fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("a map with string keys")
	}

	fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
		let mut named = Named::new();
		while let Some((key, value)) = access.next_entry::<String, T>()? {
			named.insert(key, value);
		}
		Ok(named)
	}

	// An empty YAML key (`flavors:`) parses as null.
	fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
		Ok(Named::new())
	}
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Named<T> {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserializer.deserialize_any(NamedVisitor(PhantomData))
	}
}
