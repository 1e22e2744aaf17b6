//! Core types for the course catalog.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Unique identifier for a course.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub u64);

impl fmt::Debug for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CourseId({})", self.0)
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Course category tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Beginner,
    Intermediate,
    Advanced,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Beginner => "BEGINNER",
            Category::Intermediate => "INTERMEDIATE",
            Category::Advanced => "ADVANCED",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BEGINNER" => Ok(Category::Beginner),
            "INTERMEDIATE" => Ok(Category::Intermediate),
            "ADVANCED" => Ok(Category::Advanced),
            other => Err(StoreError::Serialization(format!(
                "unknown category: {other}"
            ))),
        }
    }
}

/// A single course.
///
/// Courses are values: an edit produces a new `Course` via [`Course::merged`].
/// Fields the backend sends that are not modelled here are kept in `extra`
/// so that a merge never loses them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: CourseId,

    pub category: Category,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub long_description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_list_icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lessons_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_no: Option<u32>,

    /// Release timestamp as sent by the backend (ISO-8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Course {
    /// Create a course with only the required fields set.
    pub fn new(id: CourseId, category: Category, description: impl Into<String>) -> Self {
        Self {
            id,
            category,
            description: description.into(),
            long_description: String::new(),
            icon_url: None,
            course_list_icon: None,
            lessons_count: None,
            seq_no: None,
            released_at: None,
            extra: Map::new(),
        }
    }

    /// Return a new course with `changes` laid over this one.
    ///
    /// Changed fields override, everything else is retained. The identifier
    /// cannot be changed.
    pub fn merged(&self, changes: &CourseChanges) -> Result<Course> {
        let mut value = serde_json::to_value(self)?;
        let Value::Object(fields) = &mut value else {
            return Err(StoreError::Serialization(
                "course did not serialize to an object".to_string(),
            ));
        };
        for (field, change) in changes.iter() {
            fields.insert(field.clone(), change.clone());
        }

        let merged: Course = serde_json::from_value(value)
            .map_err(|e| StoreError::InvalidChanges(e.to_string()))?;
        if merged.id != self.id {
            return Err(StoreError::InvalidChanges(format!(
                "identifier cannot change ({} -> {})",
                self.id, merged.id
            )));
        }
        Ok(merged)
    }
}

/// A partial update to a course, keyed by wire field name.
///
/// This is also the body of the persistence call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseChanges(Map<String, Value>);

impl CourseChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an arbitrary wire field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn description(self, description: impl Into<String>) -> Self {
        self.set("description", description.into())
    }

    pub fn long_description(self, long_description: impl Into<String>) -> Self {
        self.set("longDescription", long_description.into())
    }

    pub fn category(self, category: Category) -> Self {
        self.set("category", category.as_str())
    }

    pub fn released_at(self, released_at: impl Into<String>) -> Self {
        self.set("releasedAt", released_at.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for CourseChanges {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Ordered, identifier-unique sequence of courses.
///
/// Cheap to clone; every mutation returns a new collection.
#[derive(Clone, Default, PartialEq)]
pub struct Collection {
    courses: Arc<Vec<Course>>,
}

impl Collection {
    /// Build a collection, collapsing duplicate identifiers.
    ///
    /// A duplicate keeps the position of the first occurrence and the value
    /// of the last.
    pub fn new(courses: Vec<Course>) -> Self {
        let mut unique: Vec<Course> = Vec::with_capacity(courses.len());
        for course in courses {
            match unique.iter_mut().find(|c| c.id == course.id) {
                Some(existing) => *existing = course,
                None => unique.push(course),
            }
        }
        Self {
            courses: Arc::new(unique),
        }
    }

    /// Build from the backend's `payload` map, ordered by identifier.
    pub fn from_payload(payload: BTreeMap<String, Course>) -> Self {
        let mut courses: Vec<Course> = payload.into_values().collect();
        courses.sort_by_key(|c| c.id);
        Self::new(courses)
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Course> {
        self.courses.iter()
    }

    pub fn as_slice(&self) -> &[Course] {
        &self.courses
    }

    pub fn get(&self, id: CourseId) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: CourseId) -> bool {
        self.get(id).is_some()
    }

    /// Courses in `category`, in collection order.
    pub fn by_category(&self, category: Category) -> Vec<Course> {
        self.courses
            .iter()
            .filter(|c| c.category == category)
            .cloned()
            .collect()
    }

    /// New collection with `course` substituted for the entry sharing its
    /// identifier, or appended if there is none.
    pub fn replaced(&self, course: Course) -> Collection {
        let mut courses = self.courses.as_ref().clone();
        match courses.iter_mut().find(|c| c.id == course.id) {
            Some(existing) => *existing = course,
            None => courses.push(course),
        }
        Self {
            courses: Arc::new(courses),
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<u64> = self.courses.iter().map(|c| c.id.0).collect();
        write!(f, "Collection({ids:?})")
    }
}

impl Serialize for Collection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.courses.serialize(serializer)
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Course;
    type IntoIter = std::slice::Iter<'a, Course>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A lesson belonging to a course.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: u64,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_no: Option<u32>,

    pub course_id: CourseId,
}
