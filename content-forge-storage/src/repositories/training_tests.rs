/// Tests for the training corpus repository
#[cfg(test)]
#[allow(clippy::module_inception)]
mod tests {
    use super::super::*;
    use crate::{schema, Error};
    use content_forge_core::task::{ContentTask, TaskInput, TaskStatus};
    use content_forge_core::training::{DatasetSnapshot, ExampleFilter, TagMode, TrainingExample};
    use sqlx::SqlitePool;
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    async fn setup_test_db() -> (SqliteTrainingStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let database_url = format!("sqlite://{}", temp_file.path().display());

        let pool = SqlitePool::connect(&database_url)
            .await
            .expect("Failed to connect to test database");
        schema::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        (SqliteTrainingStore::new(pool), temp_file)
    }

    fn create_test_example(topic: &str, status: TaskStatus, score: f64) -> TrainingExample {
        let input = TaskInput::builder().topic(topic).build().unwrap();
        let mut task = ContentTask::new(input);
        task.status = status;
        task.quality_score = Some(score);
        TrainingExample::from_task(&task, Vec::new()).unwrap()
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_capture_is_one_per_task() {
        let (store, _temp) = setup_test_db().await;
        let example = create_test_example("solar leasing", TaskStatus::Published, 0.9);

        assert!(store.create_example(&example).await.unwrap());

        let mut again = example.clone();
        again.id = Uuid::new_v4();
        assert!(!store.create_example(&again).await.unwrap());

        let stored = store.find_by_task(example.task_id).await.unwrap().unwrap();
        assert_eq!(stored.id, example.id);
        assert_eq!(store.find_example(example.id).await.unwrap(), example);
        assert!(store.find_by_task(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tags_are_reversible_and_never_delete() {
        let (store, _temp) = setup_test_db().await;
        let a = create_test_example("solar leasing", TaskStatus::Published, 0.9);
        let b = create_test_example("wind permits", TaskStatus::Rejected, 0.85);
        store.create_example(&a).await.unwrap();
        store.create_example(&b).await.unwrap();

        let changed = store
            .set_tags(&[a.id, b.id], &tags(&["gold", "energy"]), TagMode::Add)
            .await
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(
            store
                .set_tags(&[a.id], &tags(&["gold"]), TagMode::Add)
                .await
                .unwrap(),
            0
        );

        store
            .set_tags(&[b.id], &tags(&["gold"]), TagMode::Remove)
            .await
            .unwrap();
        let gold = store
            .search(&ExampleFilter::new().with_tag("gold"))
            .await
            .unwrap();
        assert_eq!(gold.len(), 1);
        assert_eq!(gold[0].id, a.id);

        // Everything is still there
        assert_eq!(store.search(&ExampleFilter::new()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_tagging_unknown_id_changes_nothing() {
        let (store, _temp) = setup_test_db().await;
        let a = create_test_example("solar leasing", TaskStatus::Published, 0.9);
        store.create_example(&a).await.unwrap();

        let err = store
            .set_tags(&[a.id, Uuid::new_v4()], &tags(&["gold"]), TagMode::Add)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(store.find_example(a.id).await.unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn test_search_scalar_filters() {
        let (store, _temp) = setup_test_db().await;
        store
            .create_example(&create_test_example("solar leasing", TaskStatus::Published, 0.9))
            .await
            .unwrap();
        store
            .create_example(&create_test_example("solar myths", TaskStatus::FailedQuality, 0.5))
            .await
            .unwrap();
        store
            .create_example(&create_test_example("wind permits", TaskStatus::Rejected, 0.82))
            .await
            .unwrap();

        assert_eq!(
            store
                .search(&ExampleFilter::new().successful(true))
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            store
                .search(&ExampleFilter::new().min_score(0.8))
                .await
                .unwrap()
                .len(),
            2
        );
        let solar_failures = ExampleFilter {
            topic_contains: Some("solar".into()),
            success: Some(false),
            ..Default::default()
        };
        let found = store.search(&solar_failures).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].final_status, TaskStatus::FailedQuality);

        let stats = store.corpus_stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.by_status.get("rejected"), Some(&1));
    }

    #[tokio::test]
    async fn test_snapshot_is_frozen() {
        let (store, _temp) = setup_test_db().await;
        let a = create_test_example("solar leasing", TaskStatus::Published, 0.9);
        store.create_example(&a).await.unwrap();

        let examples = store.search(&ExampleFilter::new()).await.unwrap();
        let snapshot = DatasetSnapshot::freeze("v1", ExampleFilter::new(), examples).unwrap();
        store.create_snapshot(&snapshot).await.unwrap();

        store
            .set_tags(&[a.id], &tags(&["excluded"]), TagMode::Add)
            .await
            .unwrap();

        let loaded = store.find_snapshot(snapshot.id).await.unwrap();
        assert_eq!(loaded, snapshot);
        assert!(loaded.examples[0].tags.is_empty());

        let duplicate = DatasetSnapshot::freeze("v1", ExampleFilter::new(), Vec::new()).unwrap();
        let err = store.create_snapshot(&duplicate).await.unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));

        let summaries = store.snapshots().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].example_count, 1);
        assert_eq!(summaries[0].digest, snapshot.digest);
    }
}
