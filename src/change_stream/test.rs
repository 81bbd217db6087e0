use pretty_assertions::assert_eq;

use super::{aggregate_command, options::FullDocumentType, ChangeStreamOptions, ChangeStreamTarget};
use crate::{
    bson::{doc, Bson, Timestamp},
    coll::Namespace,
};

#[test]
fn collection_stream_aggregates_over_the_collection() {
    let target = ChangeStreamTarget::Collection(Namespace::new("db", "coll"));
    let options = ChangeStreamOptions::builder()
        .full_document(FullDocumentType::UpdateLookup)
        .batch_size(10u32)
        .build();
    let command = aggregate_command(&target, &[doc! { "$match": { "x": 1 } }], &options, None, None);

    assert_eq!(
        command,
        doc! {
            "aggregate": "coll",
            "pipeline": [
                { "$changeStream": { "fullDocument": "updateLookup" } },
                { "$match": { "x": 1 } },
            ],
            "cursor": { "batchSize": 10 },
        }
    );
}

#[test]
fn cluster_stream_watches_all_changes() {
    let command = aggregate_command(
        &ChangeStreamTarget::Cluster,
        &[],
        &ChangeStreamOptions::default(),
        None,
        None,
    );

    assert_eq!(
        command,
        doc! {
            "aggregate": 1,
            "pipeline": [{ "$changeStream": { "allChangesForCluster": true } }],
            "cursor": {},
        }
    );
    assert_eq!(ChangeStreamTarget::Cluster.namespace(), Namespace::new("admin", "$cmd"));
}

#[test]
fn resume_token_takes_precedence_over_operation_time() {
    let target = ChangeStreamTarget::Database("db".to_string());
    let token = doc! { "_data": "8263" };
    let operation_time = Timestamp {
        time: 42,
        increment: 1,
    };
    let options = ChangeStreamOptions::default();

    let resumed = aggregate_command(&target, &[], &options, Some(&token), Some(operation_time));
    assert_eq!(
        resumed.get_array("pipeline").unwrap()[0],
        Bson::Document(doc! { "$changeStream": { "resumeAfter": { "_data": "8263" } } })
    );

    let restarted = aggregate_command(&target, &[], &options, None, Some(operation_time));
    assert_eq!(
        restarted.get_array("pipeline").unwrap()[0],
        Bson::Document(doc! { "$changeStream": { "startAtOperationTime": operation_time } })
    );
    assert_eq!(restarted.get_i32("aggregate"), Ok(1));
}
