//! Type-ahead lesson search.
//!
//! Search terms are pushed with [`LessonSearch::input`]. The results source
//! waits for typing to pause, skips a term equal to the previous one, and
//! keeps only the newest request alive: a newer term aborts the request for
//! the older one.

use crate::api::CourseApi;
use crate::source::{LogConfig, LogLevel, Publisher, Source};
use crate::types::{CourseId, Lesson};
use std::time::Duration;

/// Pause in typing after which a search is sent.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(400);

pub struct LessonSearch {
    course_id: CourseId,
    terms: Publisher<String>,
    results: Source<Vec<Lesson>>,
}

impl LessonSearch {
    /// Search the lessons of `course_id`.
    ///
    /// The current term starts out empty, so the first attachment to
    /// [`results`](Self::results) lists every lesson once `quiet` has passed.
    pub fn new(api: CourseApi, log: &LogConfig, course_id: CourseId, quiet: Duration) -> Self {
        let terms = Publisher::new(String::new());
        let results = terms
            .source()
            .debug(log, LogLevel::Trace, "search")
            .debounce(quiet)
            .distinct_until_changed()
            .switch_map(move |term: String| api.lessons(course_id, &term))
            .debug(log, LogLevel::Debug, "lessons");

        Self {
            course_id,
            terms,
            results,
        }
    }

    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    /// Replace the search term.
    pub fn input(&self, term: impl Into<String>) {
        self.terms.publish(term.into());
    }

    /// Latest term entered.
    pub fn term(&self) -> String {
        self.terms.value()
    }

    /// Lessons matching the settled term. Each attachment runs its own
    /// searches, starting from the current term.
    pub fn results(&self) -> Source<Vec<Lesson>> {
        self.results.clone()
    }
}

impl std::fmt::Debug for LessonSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LessonSearch")
            .field("course_id", &self.course_id)
            .field("term", &self.term())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, Method, Reply, Transport};
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_initial_search_lists_everything() {
        let memory = Arc::new(MemoryTransport::new());
        memory.route(
            Method::Get,
            "/api/lessons?courseId=4&pageSize=100&filter=",
            Reply::json(json!({"payload": [
                {"id": 1, "description": "Intro", "courseId": 4},
                {"id": 2, "description": "Operators", "courseId": 4}
            ]})),
        );
        let api = CourseApi::new(Arc::clone(&memory) as Arc<dyn Transport>);
        let search = LessonSearch::new(api, &LogConfig::default(), CourseId(4), DEFAULT_QUIET_PERIOD);

        let mut results = search.results().attach();
        let lessons = results.next().await.unwrap().unwrap();
        assert_eq!(lessons.len(), 2);
        assert_eq!(search.term(), "");
    }
}
