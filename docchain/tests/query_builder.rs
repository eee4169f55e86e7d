use docchain::{memory::InMemoryStore, prelude::*};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Record)]
struct Constant {
    #[record(id)]
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none", default)]
    id: Option<ObjectId>,
    name: String,
    value: f64,
    #[record(skip_update)]
    #[serde(rename = "createdBy", default)]
    created_by: String,
}

impl Constant {
    fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Record)]
struct Measurement {
    #[serde(rename = "_id")]
    id: Option<ObjectId>,
    name: String,
    value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
struct Point {
    x: i32,
    y: i32,
}

fn store() -> DocumentStore<InMemoryStore> {
    DocumentStore::new(InMemoryStore::with_database("app"))
}

#[tokio::test]
async fn inserted_records_get_an_identifier_and_can_be_found() {
    let store = store();
    let ctx = OpContext::background();
    let mut constants = store.collection("constants");

    let result = constants
        .insert_one(&ctx, Constant::new("pi", 3.14159))
        .await
        .unwrap();
    assert!(matches!(result.inserted_id, Bson::ObjectId(_)));

    let mut pi = Constant::default();
    constants
        .filter(doc! { "name": "pi" })
        .find_one(&ctx, &mut pi)
        .await
        .unwrap();

    assert_eq!(pi.value, 3.14159);
    assert_eq!(pi.id, result.inserted_id.as_object_id());
}

#[tokio::test]
async fn preset_identifiers_are_kept() {
    let store = store();
    let ctx = OpContext::background();
    let id = ObjectId::new();

    let result = store
        .collection("constants")
        .insert_one(&ctx, Constant { id: Some(id), ..Constant::new("e", 2.71828) })
        .await
        .unwrap();

    assert_eq!(result.inserted_id, Bson::ObjectId(id));
}

#[tokio::test]
async fn raw_documents_get_an_identifier_in_place() {
    let store = store();
    let ctx = OpContext::background();
    let mut document = doc! { "name": "tau", "value": 6.28318 };

    let result = store
        .collection("constants")
        .insert_one(&ctx, &mut document)
        .await
        .unwrap();

    assert_eq!(document.get("_id"), Some(&result.inserted_id));
}

#[tokio::test]
async fn insert_many_then_count_everything() {
    let store = store();
    let ctx = OpContext::background();
    let mut collection = store.collection("letters");

    let result = collection
        .insert_many(&ctx, vec![doc! { "a": 1 }, doc! { "b": 2 }])
        .await
        .unwrap();
    assert_eq!(result.inserted_ids.len(), 2);

    assert_eq!(collection.count(&ctx).await.unwrap(), 2);
}

#[tokio::test]
async fn insert_many_rejects_a_single_document() {
    let store = store();
    let ctx = OpContext::background();

    let err = store
        .collection("letters")
        .insert_many(&ctx, doc! { "a": 1 })
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
}

#[tokio::test]
async fn find_many_honours_filter_sort_and_limit() {
    let store = store();
    let ctx = OpContext::background();
    let mut points = store.collection("points");

    let mut seed: Vec<Point> = (0..10).map(|y| Point { x: 1, y }).collect();
    seed.extend((0..3).map(|y| Point { x: 2, y: 100 + y }));
    points.insert_many(&ctx, seed).await.unwrap();

    let mut found: Vec<Point> = Vec::new();
    points
        .filter(doc! { "x": 1 })
        .sort(doc! { "y": -1 })
        .limit(5)
        .find_many(&ctx, &mut found)
        .await
        .unwrap();

    assert_eq!(
        found.iter().map(|point| point.y).collect::<Vec<_>>(),
        vec![9, 8, 7, 6, 5]
    );
}

#[tokio::test]
async fn find_many_with_skip_and_projection() {
    let store = store();
    let ctx = OpContext::background();
    let mut points = store.collection("points");

    points
        .insert_many(&ctx, (0..4).map(|y| Point { x: 1, y }).collect::<Vec<_>>())
        .await
        .unwrap();

    let mut found: Vec<Document> = Vec::new();
    points
        .sort_by("y", SortDirection::Asc)
        .skip(1)
        .project(doc! { "y": 1, "_id": 0 })
        .find_many(&ctx, &mut found)
        .await
        .unwrap();

    assert_eq!(found, vec![doc! { "y": 1 }, doc! { "y": 2 }, doc! { "y": 3 }]);
}

#[tokio::test]
async fn clauses_reset_after_every_terminal_operation() {
    let store = store();
    let ctx = OpContext::background();
    let mut constants = store.collection("constants");

    constants
        .insert_many(&ctx, vec![Constant::new("pi", 3.14159), Constant::new("e", 2.71828)])
        .await
        .unwrap();

    assert_eq!(constants.filter(doc! { "name": "pi" }).count(&ctx).await.unwrap(), 1);
    assert_eq!(constants.count(&ctx).await.unwrap(), 2);

    // A failing terminal operation resets too.
    let mut missing = Constant::default();
    let err = constants
        .filter(doc! { "name": "phi" })
        .find_one(&ctx, &mut missing)
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::NotFound(collection) if collection == "constants"));
    assert!(constants.state().is_empty());
    assert_eq!(missing, Constant::default());
}

#[tokio::test]
async fn delete_without_filter_deletes_nothing() {
    let store = store();
    let ctx = OpContext::background();
    let mut constants = store.collection("constants");

    constants
        .insert_many(&ctx, vec![Constant::new("pi", 3.14159), Constant::new("e", 2.71828)])
        .await
        .unwrap();

    let err = constants.delete(&ctx).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::UnfilteredDelete(_)));
    assert_eq!(constants.count(&ctx).await.unwrap(), 2);

    let deleted = constants
        .filter(doc! { "name": "e" })
        .delete(&ctx)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(constants.count(&ctx).await.unwrap(), 1);
}

#[tokio::test]
async fn updates_leave_excluded_fields_alone() {
    let store = store();
    let ctx = OpContext::background();
    let mut constants = store.collection("constants");

    constants
        .insert_one(&ctx, Constant { created_by: "alice".into(), ..Constant::new("pi", 3.14) })
        .await
        .unwrap();

    let result = constants
        .filter(doc! { "name": "pi" })
        .update_one(&ctx, Constant { created_by: "bob".into(), ..Constant::new("pi", 3.14159) })
        .await
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 1);

    let mut pi = Constant::default();
    constants
        .filter(doc! { "name": "pi" })
        .find_one(&ctx, &mut pi)
        .await
        .unwrap();

    assert_eq!(pi.value, 3.14159);
    assert_eq!(pi.created_by, "alice");
}

#[tokio::test]
async fn records_with_unset_identifiers_can_be_updated() {
    let store = store();
    let ctx = OpContext::background();
    let mut measurements = store.collection("measurements");

    let inserted = measurements
        .insert_one(&ctx, Measurement { name: "pi".into(), value: 3.14, ..Measurement::default() })
        .await
        .unwrap();

    let result = measurements
        .filter(doc! { "name": "pi" })
        .update_one(&ctx, Measurement { name: "pi".into(), value: 3.14159, ..Measurement::default() })
        .await
        .unwrap();
    assert_eq!(result.modified_count, 1);

    let mut pi = Measurement::default();
    measurements
        .filter(doc! { "name": "pi" })
        .find_one(&ctx, &mut pi)
        .await
        .unwrap();

    assert_eq!(pi.value, 3.14159);
    assert_eq!(pi.id, inserted.inserted_id.as_object_id());
}

#[tokio::test]
async fn update_many_sets_fields_on_every_match() {
    let store = store();
    let ctx = OpContext::background();
    let mut points = store.collection("points");

    points
        .insert_many(&ctx, (0..3).map(|y| Point { x: 1, y }).collect::<Vec<_>>())
        .await
        .unwrap();

    let result = points
        .filter(Filter::gte("y", 1).to_document().unwrap())
        .update_many(&ctx, doc! { "x": 5 })
        .await
        .unwrap();
    assert_eq!(result.modified_count, 2);

    assert_eq!(points.filter(doc! { "x": 5 }).count(&ctx).await.unwrap(), 2);
}

#[tokio::test]
async fn raw_updates_pass_operators_through() {
    let store = store();
    let ctx = OpContext::background();
    let mut counters = store.collection("counters");

    counters.insert_one(&ctx, doc! { "name": "hits", "n": 1 }).await.unwrap();

    counters
        .filter(doc! { "name": "hits" })
        .update_one_raw(&ctx, doc! { "$inc": { "n": 2 } }, UpdateOptions::default())
        .await
        .unwrap();

    let mut counter = Document::new();
    counters.filter(doc! { "name": "hits" }).find_one(&ctx, &mut counter).await.unwrap();
    assert_eq!(counter.get_i32("n").unwrap(), 3);
}

#[tokio::test]
async fn upsert_many_inserts_when_nothing_matches() {
    let store = store();
    let ctx = OpContext::background();
    let mut constants = store.collection("constants");

    let result = constants
        .filter(doc! { "name": "phi" })
        .upsert_many(&ctx, vec![doc! { "$set": { "value": 1.61803 } }])
        .await
        .unwrap();
    assert!(result.upserted_id.is_some());

    let mut phi = Constant::default();
    constants
        .filter(doc! { "name": "phi" })
        .find_one(&ctx, &mut phi)
        .await
        .unwrap();
    assert_eq!(phi.value, 1.61803);
}

#[tokio::test]
async fn shape_mismatch_leaves_target_untouched() {
    let store = store();
    let ctx = OpContext::background();
    let mut points = store.collection("points");

    points
        .insert_many(&ctx, vec![doc! { "x": 1, "y": 1 }, doc! { "x": 1, "y": "two" }])
        .await
        .unwrap();

    let mut found = vec![Point { x: 0, y: 0 }];
    let err = points.find_many(&ctx, &mut found).await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::ShapeMismatch(_)));
    assert_eq!(found, vec![Point { x: 0, y: 0 }]);
}

#[tokio::test]
async fn aggregate_decodes_pipeline_output() {
    let store = store();
    let ctx = OpContext::background();
    let mut points = store.collection("points");

    points
        .insert_many(&ctx, (0..6).map(|y| Point { x: y % 2, y }).collect::<Vec<_>>())
        .await
        .unwrap();

    let mut counts: Vec<Document> = Vec::new();
    points
        .aggregate(
            &ctx,
            vec![doc! { "$match": { "x": 1 } }, doc! { "$count": "odd" }],
            &mut counts,
        )
        .await
        .unwrap();

    assert_eq!(counts, vec![doc! { "odd": 3 }]);
}

#[tokio::test]
async fn index_lifecycle() {
    let store = store();
    let ctx = OpContext::background();
    let mut constants = store.collection("constants");

    let name = constants
        .create_index(
            &ctx,
            doc! { "name": 1 },
            IndexOptions { unique: Some(true), ..IndexOptions::default() },
        )
        .await
        .unwrap();
    assert_eq!(name, "name_1");

    constants.insert_one(&ctx, Constant::new("pi", 3.14159)).await.unwrap();
    let err = constants
        .insert_one(&ctx, Constant::new("pi", 3.14))
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(..)));

    let names: Vec<String> = constants
        .list_indexes(&ctx)
        .await
        .unwrap()
        .iter()
        .filter_map(|index| index.get_str("name").ok().map(str::to_string))
        .collect();
    assert_eq!(names, vec!["_id_".to_string(), "name_1".to_string()]);

    constants.drop_index(&ctx, "name_1").await.unwrap();
    constants.insert_one(&ctx, Constant::new("pi", 3.14)).await.unwrap();
    assert_eq!(constants.count(&ctx).await.unwrap(), 2);
}

#[tokio::test]
async fn drop_removes_the_collection() {
    let store = store();
    let ctx = OpContext::background();
    let mut constants = store.collection("constants");

    constants.insert_one(&ctx, Constant::new("pi", 3.14159)).await.unwrap();
    constants.drop(&ctx).await.unwrap();

    assert_eq!(constants.count(&ctx).await.unwrap(), 0);
}
