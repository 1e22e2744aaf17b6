//! Typed endpoints of the course backend.
//!
//! Every method returns a cold, cancelable [`Source`]: nothing is sent until
//! the source is attached, each attachment sends its own request, and
//! dropping the attachment aborts it.

use crate::source::Source;
use crate::store::StoreConfig;
use crate::transport::{get_json, send_checked, Request, Transport};
use crate::types::{Collection, Course, CourseChanges, CourseId, Lesson};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Backend bodies wrap their data in a `payload` field.
#[derive(Deserialize)]
struct Payload<P> {
    payload: P,
}

#[derive(Clone)]
pub struct CourseApi {
    transport: Arc<dyn Transport>,
    base_url: String,
    courses_path: String,
    page_size: usize,
}

impl CourseApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::from_config(transport, &StoreConfig::default())
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &StoreConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            courses_path: config.courses_path.trim_matches('/').to_string(),
            page_size: config.lessons_page_size,
        }
    }

    /// `<base>/<courses>`
    pub fn courses_url(&self) -> String {
        format!("{}/{}", self.base_url, self.courses_path)
    }

    /// `<base>/<courses>/<id>`
    pub fn course_url(&self, id: CourseId) -> String {
        format!("{}/{}", self.courses_url(), id)
    }

    /// `<base>/lessons?courseId=<id>&pageSize=<n>&filter=<term>`
    pub fn lessons_url(&self, course_id: CourseId, filter: &str) -> String {
        format!(
            "{}/lessons?courseId={}&pageSize={}&filter={}",
            self.base_url,
            course_id,
            self.page_size,
            encode_component(filter)
        )
    }

    /// The whole collection, from the `payload` map of courses by id.
    pub fn courses(&self) -> Source<Collection> {
        get_json::<Payload<BTreeMap<String, Course>>>(&self.transport, Request::get(self.courses_url()))
            .map(|body| Collection::from_payload(body.payload))
    }

    /// One course, sent unwrapped.
    pub fn course(&self, id: CourseId) -> Source<Course> {
        get_json(&self.transport, Request::get(self.course_url(id)))
    }

    /// Lessons of a course whose text matches `filter`.
    pub fn lessons(&self, course_id: CourseId, filter: &str) -> Source<Vec<Lesson>> {
        get_json::<Payload<Vec<Lesson>>>(&self.transport, Request::get(self.lessons_url(course_id, filter)))
            .map(|body| body.payload)
    }

    /// Persist `changes` for one course. Only the response status matters.
    pub fn update_course(&self, id: CourseId, changes: &CourseChanges) -> Source<()> {
        send_checked(
            &self.transport,
            Request::put(self.course_url(id), changes.to_value()),
        )
    }
}

impl std::fmt::Debug for CourseApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourseApi")
            .field("base_url", &self.base_url)
            .field("courses_path", &self.courses_path)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

/// Everything but RFC 3986 unreserved bytes is escaped in query components.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, QUERY_COMPONENT).to_string()
}
