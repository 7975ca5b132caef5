use docstore::common::Value;
use docstore::doc;
use docstore::filter::{all, field};
use docstore_int_test::test_util::{cleanup, create_encrypted_test_context, create_test_context, run_test};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_soft_delete_round_trip() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.enable_soft_delete(None)?;
            collection.insert(doc! { "name": "Ann" })?;
            collection.insert(doc! { "name": "Bo" })?;

            assert_eq!(collection.remove(field("name").eq("Ann"))?, 1);
            assert_eq!(collection.count(all())?, 1);
            assert_eq!(collection.find(all())?.with_trashed().size()?, 2);
            let trashed = collection.find(all())?.only_trashed().to_array()?;
            assert_eq!(trashed.len(), 1);
            assert_eq!(trashed[0].get("name"), Value::from("Ann"));
            assert!(trashed[0].get("_deleted_at").is_string());

            assert_eq!(collection.restore(field("name").eq("Ann"))?, 1);
            assert_eq!(collection.count(all())?, 2);
            let ann = collection.find_one(field("name").eq("Ann"))?.unwrap_or_default();
            assert!(!ann.contains_key("_deleted_at"));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_restore_live_document_is_noop() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.enable_soft_delete(None)?;
            collection.insert(doc! { "name": "Ann" })?;
            let version = collection.version()?.version;

            assert_eq!(collection.restore(field("name").eq("Ann"))?, 0);
            assert_eq!(collection.version()?.version, version);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_double_remove_keeps_first_timestamp() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.enable_soft_delete(None)?;
            collection.insert(doc! { "name": "Ann" })?;

            assert_eq!(collection.remove(field("name").eq("Ann"))?, 1);
            let first = collection.find(all())?.only_trashed().first()?.unwrap_or_default();
            assert_eq!(collection.remove(field("name").eq("Ann"))?, 0);
            let second = collection.find(all())?.only_trashed().first()?.unwrap_or_default();
            assert_eq!(first.get("_deleted_at"), second.get("_deleted_at"));
            assert_eq!(collection.find(all())?.with_trashed().size()?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_soft_delete_skips_remove_hooks() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            let removes = Arc::new(AtomicUsize::new(0));
            let updates = Arc::new(AtomicUsize::new(0));
            let counter = removes.clone();
            collection.on_after_remove(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            let counter = updates.clone();
            collection.on_after_update(move |_, updated| {
                assert!(updated.contains_key("_deleted_at"));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

            collection.enable_soft_delete(None)?;
            collection.insert(doc! { "name": "Ann" })?;
            collection.remove(all())?;
            assert_eq!(removes.load(Ordering::SeqCst), 0);
            assert_eq!(updates.load(Ordering::SeqCst), 1);

            collection.force_delete(all())?;
            assert_eq!(removes.load(Ordering::SeqCst), 1);
            assert_eq!(collection.find(all())?.with_trashed().size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_custom_field_and_disable() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.db().collection("people")?;
            collection.enable_soft_delete(Some("removed_on"))?;
            collection.insert_many(vec![doc! { "name": "Ann" }, doc! { "name": "Bo" }])?;
            collection.remove(field("name").eq("Bo"))?;
            assert_eq!(collection.count(all())?, 1);

            collection.disable_soft_delete()?;
            // trashed documents are visible again, and removal is physical
            assert_eq!(collection.count(all())?, 2);
            assert_eq!(collection.find(all())?.only_trashed().size()?, 1);
            assert_eq!(collection.remove(field("name").eq("Ann"))?, 1);
            assert_eq!(collection.find(all())?.with_trashed().size()?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_soft_delete_on_encrypted_collection() {
    run_test(
        create_encrypted_test_context,
        |ctx| {
            let collection = ctx.db().collection("secrets")?;
            assert!(collection.is_encrypted());
            collection.enable_soft_delete(None)?;
            collection.insert_many(vec![doc! { "name": "Ann" }, doc! { "name": "Bo" }])?;

            collection.remove(field("name").eq("Ann"))?;
            assert_eq!(collection.count(all())?, 1);
            assert_eq!(collection.find(all())?.only_trashed().size()?, 1);
            collection.restore(all())?;
            assert_eq!(collection.count(all())?, 2);
            Ok(())
        },
        cleanup,
    )
}
