use docstore::collection::{FieldRule, FieldType, HookOutcome, IdMode, Schema};
use docstore::common::Value;
use docstore::doc;
use docstore::errors::{DocStoreError, ErrorKind};
use docstore::filter::all;
use docstore_int_test::test_util::{cleanup, create_test_context, run_test};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_batch_insert_bumps_version_once() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("batch")?;
            assert_eq!(collection.version()?.version, 0);

            let docs: Vec<_> = (0..25).map(|i| doc! { "index": i }).collect();
            let result = collection.insert_many(docs)?;
            assert_eq!(result.len(), 25);
            assert_eq!(collection.version()?.version, 1);
            assert!(collection.version()?.updated_at.is_some());

            collection.insert(doc! { "index": 99 })?;
            assert_eq!(collection.version()?.version, 2);
            assert_eq!(collection.count(all())?, 26);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_batch_insert_is_atomic() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("atomic")?;
            collection.insert(doc! { "_id": "dup", "n": 0 })?;

            let result = collection.insert_many(vec![
                doc! { "_id": "a", "n": 1 },
                doc! { "_id": "dup", "n": 2 },
                doc! { "_id": "b", "n": 3 },
            ]);
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::StorageError);
            assert_eq!(collection.count(all())?, 1);
            assert!(collection.get_by_id("a")?.is_none());
            assert_eq!(collection.version()?.version, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_schema_required_field() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.set_schema(Schema::new().field("name", FieldRule::new().required()))?;

            let err = collection.insert(doc! {}).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            assert_eq!(collection.count(all())?, 0);

            collection.insert(doc! { "name": "x" })?;
            assert_eq!(collection.count(all())?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_schema_reports_every_violation() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            let schema = Schema::from_document(&doc! {
                "name": { "required": true, "type": "string", "min": 2 },
                "age": { "type": "integer", "min": 0, "max": 150 },
                "role": { "enum": ["admin", "user"] },
                "email": { "pattern": "^[^@]+@[^@]+$" }
            })?;
            collection.set_schema(schema)?;

            let err = collection
                .insert(doc! { "name": "A", "age": 200, "role": "root", "email": "nope" })
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            let message = err.to_string();
            for field in ["name", "age", "role", "email"] {
                assert!(message.contains(field), "{} missing from {}", field, message);
            }

            collection.insert(doc! { "name": "Ann", "age": 30, "role": "admin", "email": "a@b" })?;
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_schema_survives_reopen() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.set_schema(
                Schema::new().field("age", FieldRule::new().of_type(FieldType::Number)),
            )?;
            ctx.db().close()?;

            let db = ctx.reopen(None)?;
            let collection = db.collection("people")?;
            let err = collection.insert(doc! { "age": "old" }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            db.close()
        },
        cleanup,
    )
}

#[test]
fn test_prefix_ids_are_sequential() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("users")?;
            collection.set_id_mode(IdMode::Prefix { prefix: "USR".into() })?;

            let mut ids = Vec::new();
            for name in ["a", "b", "c"] {
                ids.push(collection.insert(doc! { "name": name })?.first_id().unwrap_or_default().to_string());
            }
            assert_eq!(ids, vec!["USR-000001", "USR-000002", "USR-000003"]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_prefix_counter_resumes_after_reopen() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("users")?;
            collection.set_id_mode(IdMode::Prefix { prefix: "USR".into() })?;
            collection.insert_many(vec![doc! {}, doc! {}])?;
            collection.insert(doc! { "_id": "USR-000041" })?;
            ctx.db().close()?;

            let db = ctx.reopen(None)?;
            let collection = db.collection("users")?;
            let result = collection.insert(doc! {})?;
            assert_eq!(result.first_id(), Some("USR-000042"));
            db.close()
        },
        cleanup,
    )
}

#[test]
fn test_cancelling_hook_stores_nothing() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("hooked")?;
            collection.on_before_insert(|_| Ok(HookOutcome::Cancel));

            let err = collection.insert(doc! { "name": "Ann" }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::OperationCancelled);
            let err = collection
                .insert_many(vec![doc! { "name": "Bo" }, doc! { "name": "Cy" }])
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::OperationCancelled);

            assert_eq!(collection.count(all())?, 0);
            assert_eq!(collection.version()?.version, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_hooks_rewrite_and_observe() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("hooked")?;
            let seen = Arc::new(AtomicUsize::new(0));

            collection.on_before_insert(|doc| {
                let mut doc = doc.clone();
                doc.put("audit.source", "hook")?;
                Ok(HookOutcome::Rewrite(doc))
            });
            collection.on_before_insert(|_| Err(DocStoreError::new("broken hook", ErrorKind::InternalError)));
            collection.on_before_insert(|_| panic!("panicking hook"));
            let counter = seen.clone();
            collection.on_after_insert(move |doc, id| {
                assert_eq!(doc.id(), Some(id));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

            let id = collection.insert(doc! { "name": "Ann" })?.first_id().unwrap_or_default().to_string();
            let stored = collection.get_by_id(&id)?.unwrap_or_default();
            assert_eq!(stored.get("audit.source"), Value::from("hook"));
            assert_eq!(seen.load(Ordering::SeqCst), 1);
            Ok(())
        },
        cleanup,
    )
}
