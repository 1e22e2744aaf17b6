//! Property tests: course identifiers stay unique under any sequence of edits.

use course_store::{
    Category, Collection, Course, CourseChanges, CourseId, MemoryTransport, Method, Reply, Store,
    StoreConfig, StoreError, StoreState, Transport,
};
use futures::StreamExt;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const COURSES: u64 = 4;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

fn test_store() -> (Arc<MemoryTransport>, Store) {
    let memory = Arc::new(MemoryTransport::new());
    let payload: serde_json::Map<String, serde_json::Value> = (1..=COURSES)
        .map(|id| {
            (
                id.to_string(),
                json!({"id": id, "category": "BEGINNER", "description": format!("course {id}")}),
            )
        })
        .collect();
    memory.route(Method::Get, "/api/courses", Reply::json(json!({"payload": payload})));
    for id in 0..=COURSES + 2 {
        memory.route(Method::Put, format!("/api/courses/{id}"), Reply::status(200));
    }
    let store = Store::new(Arc::clone(&memory) as Arc<dyn Transport>, StoreConfig::default());
    (memory, store)
}

async fn wait_initialized(store: &Store) {
    let mut courses = store.collection().attach();
    while let Some(Ok(_)) = courses.next().await {
        if store.state() == StoreState::Initialized {
            return;
        }
    }
}

fn assert_unique(collection: &Collection) -> Result<(), TestCaseError> {
    let ids: HashSet<CourseId> = collection.iter().map(|course| course.id).collect();
    prop_assert_eq!(ids.len(), collection.len());
    Ok(())
}

fn category() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::Beginner),
        Just(Category::Intermediate),
        Just(Category::Advanced),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_saves_never_duplicate_ids(
        edits in prop::collection::vec((0..COURSES + 3, "[a-z ]{0,12}", category()), 0..25)
    ) {
        let runtime = runtime();
        runtime.block_on(async {
            let (memory, store) = test_store();
            store.init();
            wait_initialized(&store).await;

            let mut expected: HashMap<u64, (String, Category)> = HashMap::new();
            let mut saved = 0;
            for (id, text, category) in &edits {
                let changes = CourseChanges::new().description(text.clone()).category(*category);
                match store.save(CourseId(*id), &changes) {
                    Ok(_) => {
                        prop_assert!((1..=COURSES).contains(id));
                        expected.insert(*id, (text.clone(), *category));
                        saved += 1;
                    }
                    Err(error) => {
                        prop_assert_eq!(error, StoreError::NotFound(CourseId(*id)));
                    }
                }
                assert_unique(&store.snapshot())?;
            }

            let snapshot = store.snapshot();
            prop_assert_eq!(snapshot.len(), COURSES as usize);
            for (id, (text, category)) in &expected {
                let course = snapshot.get(CourseId(*id)).unwrap();
                prop_assert_eq!(&course.description, text);
                prop_assert_eq!(course.category, *category);
            }

            // One GET plus one PUT per accepted save
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            prop_assert_eq!(memory.completed(), 1 + saved);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn test_collection_keeps_first_position(ids in prop::collection::vec(0u64..12, 0..40)) {
        let courses: Vec<Course> = ids
            .iter()
            .enumerate()
            .map(|(n, id)| Course::new(CourseId(*id), Category::Beginner, format!("v{n}")))
            .collect();
        let collection = Collection::new(courses);

        assert_unique(&collection)?;

        let mut first_seen = Vec::new();
        for id in &ids {
            if !first_seen.contains(id) {
                first_seen.push(*id);
            }
        }
        let order: Vec<u64> = collection.iter().map(|course| course.id.0).collect();
        prop_assert_eq!(order, first_seen);

        // The last occurrence's value wins
        for course in collection.iter() {
            let last = ids.iter().rposition(|id| *id == course.id.0).unwrap();
            prop_assert_eq!(&course.description, &format!("v{last}"));
        }
    }

    #[test]
    fn test_replacing_keeps_ids_unique(
        ids in prop::collection::vec(0u64..8, 0..20),
        replacements in prop::collection::vec(0u64..10, 0..20),
    ) {
        let mut collection = Collection::new(
            ids.iter().map(|id| Course::new(CourseId(*id), Category::Advanced, "seed")).collect(),
        );
        for id in replacements {
            collection = collection.replaced(Course::new(CourseId(id), Category::Beginner, "new"));
            assert_unique(&collection)?;
            prop_assert!(collection.contains(CourseId(id)));
        }
    }
}
