use docstore::common::{SortOrder, Value};
use docstore::cursor::{CursorState, Population, Projection};
use docstore::doc;
use docstore::errors::ErrorKind;
use docstore::filter::{all, field, or, where_fn, Criteria, FuzzyQuery};
use docstore::DocStore;
use docstore_int_test::test_util::{cleanup, create_test_context, run_test};

fn names(docs: &[docstore::collection::Document]) -> Vec<String> {
    docs.iter()
        .map(|d| d.get("name").as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_find_adults() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.insert(doc! { "name": "Ann", "age": 30 })?;
            collection.insert(doc! { "name": "Bo", "age": 17 })?;

            let adults = collection.find(field("age").gte(18))?.to_array()?;
            assert_eq!(names(&adults), vec!["Ann"]);

            let parsed = Criteria::parse(&doc! { "age": { "$gte": 18 } })?;
            assert_eq!(names(&collection.find(parsed)?.to_array()?), vec!["Ann"]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_sort_skip_limit() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            for (name, age) in [("d", 40), ("a", 30), ("c", 30), ("b", 20), ("e", 50)] {
                collection.insert(doc! { "name": name, "age": age })?;
            }

            let page = collection
                .find(all())?
                .sort("age", SortOrder::Descending)
                .sort("name", SortOrder::Ascending)
                .skip(1)
                .limit(3)
                .to_array()?;
            assert_eq!(names(&page), vec!["d", "a", "c"]);

            let cursor = collection.find(field("age").gt(20))?.skip(1).limit(2);
            assert_eq!(cursor.size()?, 2);
            assert_eq!(collection.find(all())?.skip(4).size()?, 1);

            let first = collection.find(all())?.sort("name", SortOrder::Descending).first()?;
            assert_eq!(first.map(|d| d.get("name")), Some(Value::from("e")));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_cursor_iteration_and_rewind() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.insert_many(vec![doc! { "name": "a" }, doc! { "name": "b" }])?;

            let mut cursor = collection.find(all())?.sort("name", SortOrder::Ascending);
            assert_eq!(cursor.state(), CursorState::Unstarted);
            let first = cursor.next().transpose()?;
            assert_eq!(first.map(|d| d.get("name")), Some(Value::from("a")));
            assert_eq!(cursor.state(), CursorState::Iterating);
            assert!(cursor.next().is_some());
            assert!(cursor.next().is_none());
            assert_eq!(cursor.state(), CursorState::Exhausted);

            cursor.rewind();
            assert_eq!(cursor.state(), CursorState::Unstarted);
            assert_eq!(cursor.collect::<Result<Vec<_>, _>>()?.len(), 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unbounded_materialization_is_capped() {
    run_test(
        create_test_context,
        |ctx| {
            ctx.db().close()?;
            let db = DocStore::builder()
                .max_unbounded_results(5)
                .safe_result_cap(3)
                .open(ctx.path())?;
            let collection = db.collection("many")?;
            collection.insert_many((0..6).map(|i| doc! { "n": i }).collect())?;

            let err = collection.find(all())?.to_array().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::CapacityError);
            assert_eq!(collection.find(all())?.limit(6).to_array()?.len(), 6);
            assert_eq!(collection.find(all())?.to_array_safe()?.len(), 3);
            assert_eq!(collection.find(field("n").lt(5))?.to_array()?.len(), 5);
            db.close()
        },
        cleanup,
    )
}

#[test]
fn test_fallback_criteria() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.insert(doc! { "name": "Jonathan", "tags": ["admin", "ops"], "age": 41 })?;
            collection.insert(doc! { "name": "Maria", "tags": ["dev"], "age": 28 })?;
            collection.insert(doc! { "name": "Jon", "tags": [], "age": 35 })?;

            let found = collection.find(field("tags").has("ops"))?.to_array()?;
            assert_eq!(names(&found), vec!["Jonathan"]);

            let found = collection.find(field("name").regex("^jo")?)?.sort("name", SortOrder::Ascending).to_array()?;
            assert_eq!(names(&found), vec!["Jon", "Jonathan"]);

            let found = collection.find(field("name").fuzzy(FuzzyQuery::new("mariaa")))?.to_array()?;
            assert_eq!(names(&found), vec!["Maria"]);

            let found = collection
                .find(or(vec![field("tags").size(0), field("age").modulo(2, 0)]))?
                .sort("name", SortOrder::Ascending)
                .to_array()?;
            assert_eq!(names(&found), vec!["Jon", "Maria"]);

            let found = collection
                .find(where_fn(|doc| doc.get("name").as_str().map_or(false, |n| n.len() == 5)))?
                .to_array()?;
            assert_eq!(names(&found), vec!["Maria"]);

            assert_eq!(ctx.db().store().registry().len(), 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_projection() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.insert(doc! { "_id": "1", "name": "Ann", "age": 30, "address": { "city": "Oslo", "zip": "0150" } })?;

            let doc = collection
                .find(all())?
                .project(Projection::include(&["name", "address.city"]))
                .first()?
                .unwrap_or_default();
            assert_eq!(doc, doc! { "_id": "1", "name": "Ann", "address": { "city": "Oslo" } });

            let doc = collection
                .find(all())?
                .project(Projection::from_document(&doc! { "age": 0, "address": 0 })?)
                .first()?
                .unwrap_or_default();
            assert_eq!(doc, doc! { "_id": "1", "name": "Ann" });
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_populate_across_collections() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let authors = db.collection("authors")?;
            authors.insert_many(vec![
                doc! { "_id": "a1", "name": "Le Guin" },
                doc! { "_id": "a2", "name": "Banks" },
            ])?;
            let books = db.collection("books")?;
            books.insert(doc! { "_id": "b1", "title": "Dispossessed", "author": "a1" })?;
            books.insert(doc! { "_id": "b2", "title": "Anthology", "author": ["a1", "a2"] })?;
            books.insert(doc! { "_id": "b3", "title": "Unknown", "author": "zz" })?;

            let found = books
                .find(all())?
                .sort("_id", SortOrder::Ascending)
                .populate(Population::new("author", &authors).alias("writer"))
                .to_array()?;
            assert_eq!(found[0].get("writer.name"), Value::from("Le Guin"));
            assert_eq!(found[0].get("author"), Value::from("a1"));
            assert_eq!(found[1].get("writer").as_array().map(|a| a.len()), Some(2));
            assert_eq!(found[2].get_ref("writer"), Some(&Value::Null));

            let mut docs = books.find(field("_id").eq("b1"))?.to_array()?;
            books.populate(&mut docs, "author", &authors, None, None)?;
            assert_eq!(docs[0].get("author.name"), Value::from("Le Guin"));

            // a target in another database
            let other = DocStore::builder().open_in_memory()?;
            let remote = other.collection("authors")?;
            remote.insert(doc! { "code": 7, "name": "Remote" })?;
            let mut docs = vec![doc! { "author": 7 }];
            books.populate(&mut docs, "author", &remote, Some("code"), None)?;
            assert_eq!(docs[0].get("author.name"), Value::from("Remote"));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_path_index_keeps_results() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.insert_many((0..20).map(|i| doc! { "profile": { "age": i } }).collect())?;
            collection.create_index("profile.age")?;
            assert_eq!(collection.count(field("profile.age").lt(5))?, 5);
            collection.drop_index("profile.age")?;
            assert_eq!(collection.count(field("profile.age").lt(5))?, 5);
            Ok(())
        },
        cleanup,
    )
}
