//! Dot-separated paths into structured values, as used by
//! [`Focus`](`crate::Focus`).

use std::fmt::{self, Display, Formatter};

use serde_json::Value as Json;

/// One step of a [`Path`]: a numeric segment indexes into arrays, anything
/// else keys into objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
	/// An object key.
	Key(String),
	/// An array index.
	Index(usize),
}

/// A parsed path like `user.addresses.0.street`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
	segments: Vec<Segment>,
}

impl Path {
	/// Parses a dot-separated path. Purely numeric segments become array
	/// indices.
	#[must_use]
	pub fn parse(path: &str) -> Self {
		Self {
			segments: path
				.split('.')
				.filter(|segment| !segment.is_empty())
				.map(|segment| match segment.parse::<usize>() {
					Ok(index) => Segment::Index(index),
					Err(_) => Segment::Key(segment.to_owned()),
				})
				.collect(),
		}
	}

	/// The path's steps.
	#[must_use]
	pub fn segments(&self) -> &[Segment] {
		&self.segments
	}

	/// Resolves the path within `root`, or `None` where it does not exist.
	#[must_use]
	pub fn get<'a>(&self, root: &'a Json) -> Option<&'a Json> {
		let mut current = root;
		for segment in &self.segments {
			current = match segment {
				Segment::Key(key) => current.as_object()?.get(key)?,
				Segment::Index(index) => current.as_array()?.get(*index)?,
			};
		}
		Some(current)
	}

	/// Replaces the value at the path within `root`, creating missing
	/// intermediates as inferred by the segment shapes (index segments make
	/// arrays, key segments make objects). Existing non-container
	/// intermediates are replaced by the inferred container.
	pub fn set(&self, root: &mut Json, value: Json) {
		let mut current = root;
		for segment in &self.segments[..self.segments.len().saturating_sub(1)] {
			current = descend(current, segment);
		}
		match self.segments.last() {
			Some(segment) => *descend(current, segment) = value,
			None => *current = value,
		}
	}
}

fn descend<'a>(current: &'a mut Json, segment: &Segment) -> &'a mut Json {
	match segment {
		Segment::Key(key) => {
			if !current.is_object() {
				*current = Json::Object(serde_json::Map::new());
			}
			current
				.as_object_mut()
				.expect("made an object above")
				.entry(key.clone())
				.or_insert(Json::Null)
		}
		Segment::Index(index) => {
			if !current.is_array() {
				*current = Json::Array(Vec::new());
			}
			let array = current.as_array_mut().expect("made an array above");
			while array.len() <= *index {
				array.push(Json::Null);
			}
			&mut array[*index]
		}
	}
}

impl Display for Path {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		for (i, segment) in self.segments.iter().enumerate() {
			if i > 0 {
				f.write_str(".")?;
			}
			match segment {
				Segment::Key(key) => f.write_str(key)?,
				Segment::Index(index) => write!(f, "{index}")?,
			}
		}
		Ok(())
	}
}

impl From<&str> for Path {
	fn from(path: &str) -> Self {
		Self::parse(path)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn numeric_segments_parse_as_indices() {
		let path = Path::parse("a.0.b");
		assert_eq!(
			path.segments(),
			&[
				Segment::Key("a".to_owned()),
				Segment::Index(0),
				Segment::Key("b".to_owned()),
			]
		);
	}

	#[test]
	fn get_resolves_or_declines() {
		let value = json!({ "a": [{ "b": 7 }] });
		assert_eq!(Path::parse("a.0.b").get(&value), Some(&json!(7)));
		assert_eq!(Path::parse("a.1.b").get(&value), None);
		assert_eq!(Path::parse("c").get(&value), None);
	}

	#[test]
	fn set_creates_intermediates_by_shape() {
		let mut value = json!({});
		Path::parse("list.2").set(&mut value, json!("x"));
		assert_eq!(value, json!({ "list": [null, null, "x"] }));
	}

	#[test]
	fn set_replaces_mismatched_containers() {
		let mut value = json!({ "a": 5 });
		Path::parse("a.b").set(&mut value, json!(1));
		assert_eq!(value, json!({ "a": { "b": 1 } }));
	}

	#[test]
	fn the_empty_path_replaces_the_root() {
		let mut value = json!({ "a": 1 });
		Path::parse("").set(&mut value, json!(2));
		assert_eq!(value, json!(2));
	}
}
