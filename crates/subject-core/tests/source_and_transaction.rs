//! Source binding and transaction dispatch: routing writes to their bound
//! source, batching, and the three dispatch modes.

mod support;

use subject_core::change::ChangeOrigin;
use subject_core::config::RuntimeConfig;
use subject_core::context::Context;
use subject_core::error::Result;
use subject_core::property::{PropertyReference, PropertyValue};
use subject_core::transaction::{dispatch, PendingWrite, Transaction, TransactionMode};

use support::{as_dyn, Counter, RecordingSource};

#[tokio::test]
async fn default_mode_dispatches_independently_per_source() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let a = Counter::new(1);
    let b = Counter::new(1);
    context.attach(as_dyn(&a))?;
    context.attach(as_dyn(&b))?;

    let source_a = RecordingSource::new("source-a");
    let source_b = RecordingSource::new("source-b");
    source_b.reject("value");
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&a), "value"), source_a.clone());
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&b), "value"), source_b.clone());

    let writes = vec![
        PendingWrite {
            property: PropertyReference::new(as_dyn(&a), "value"),
            old_value: PropertyValue::Int(1),
            new_value: PropertyValue::Int(2),
            origin: ChangeOrigin::Local,
        },
        PendingWrite {
            property: PropertyReference::new(as_dyn(&b), "value"),
            old_value: PropertyValue::Int(1),
            new_value: PropertyValue::Int(99),
            origin: ChangeOrigin::Local,
        },
    ];
    let outcome = dispatch(&context, Transaction::new(TransactionMode::Default, writes)).await?;

    assert_eq!(outcome.applied.len(), 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(source_a.written_values(), vec![PropertyValue::Int(2)]);
    assert!(source_b.written_values().is_empty());

    // The applied write is reflected in subject storage.
    assert_eq!(subject_core::read(&as_dyn(&a), "value")?, PropertyValue::Int(2));
    // The rejected write left its subject untouched.
    assert_eq!(subject_core::read(&as_dyn(&b), "value")?, PropertyValue::Int(1));
    Ok(())
}

#[tokio::test]
async fn rollback_mode_undoes_an_applied_write_when_another_write_fails_on_the_same_source() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let a = Counter::new(1);
    let b = support::Node::new();
    context.attach(as_dyn(&a))?;
    context.attach(as_dyn(&b))?;

    // Both properties are routed to the same source instance, so a later
    // failure on `b.peer` must roll back the already-applied `a.value`.
    let shared_source = RecordingSource::new("shared");
    shared_source.reject("peer");
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&a), "value"), shared_source.clone());
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&b), "peer"), shared_source.clone());

    let writes = vec![
        PendingWrite {
            property: PropertyReference::new(as_dyn(&a), "value"),
            old_value: PropertyValue::Int(1),
            new_value: PropertyValue::Int(2),
            origin: ChangeOrigin::Local,
        },
        PendingWrite {
            property: PropertyReference::new(as_dyn(&b), "peer"),
            old_value: PropertyValue::Null,
            new_value: PropertyValue::from(a.clone()),
            origin: ChangeOrigin::Local,
        },
    ];
    let outcome = dispatch(&context, Transaction::new(TransactionMode::Rollback, writes)).await?;

    assert_eq!(outcome.applied, vec![PropertyReference::new(as_dyn(&a), "value")]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.rolled_back, vec![PropertyReference::new(as_dyn(&a), "value")]);
    assert_eq!(subject_core::read(&as_dyn(&a), "value")?, PropertyValue::Int(1));
    assert_eq!(subject_core::read(&as_dyn(&b), "peer")?, PropertyValue::Null);
    assert_eq!(
        shared_source.written_values(),
        vec![PropertyValue::Int(2), PropertyValue::Int(1)]
    );
    Ok(())
}

#[tokio::test]
async fn rollback_mode_reverts_an_applied_write_when_a_later_one_on_another_source_fails() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let a = Counter::new(1);
    let b = Counter::new(1);
    context.attach(as_dyn(&a))?;
    context.attach(as_dyn(&b))?;

    let source_a = RecordingSource::new("source-a");
    let source_b = RecordingSource::new("source-b");
    source_b.reject("value");
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&a), "value"), source_a.clone());
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&b), "value"), source_b.clone());

    let writes = vec![
        PendingWrite {
            property: PropertyReference::new(as_dyn(&a), "value"),
            old_value: PropertyValue::Int(1),
            new_value: PropertyValue::Int(2),
            origin: ChangeOrigin::Local,
        },
        PendingWrite {
            property: PropertyReference::new(as_dyn(&b), "value"),
            old_value: PropertyValue::Int(1),
            new_value: PropertyValue::Int(3),
            origin: ChangeOrigin::Local,
        },
    ];
    let outcome = dispatch(&context, Transaction::new(TransactionMode::Rollback, writes)).await?;

    assert_eq!(outcome.applied, vec![PropertyReference::new(as_dyn(&a), "value")]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.rolled_back, vec![PropertyReference::new(as_dyn(&a), "value")]);

    // `a`'s subject storage reflects the rollback's inverse write, not the
    // transaction's intended new value.
    assert_eq!(subject_core::read(&as_dyn(&a), "value")?, PropertyValue::Int(1));
    assert_eq!(subject_core::read(&as_dyn(&b), "value")?, PropertyValue::Int(1));
    // Source A saw both the original write and its inverse.
    assert_eq!(
        source_a.written_values(),
        vec![PropertyValue::Int(2), PropertyValue::Int(1)]
    );
    Ok(())
}

#[tokio::test]
async fn single_write_mode_rejects_a_transaction_spanning_more_than_one_source() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let a = Counter::new(1);
    let b = Counter::new(1);
    context.attach(as_dyn(&a))?;
    context.attach(as_dyn(&b))?;

    let source_a = RecordingSource::new("source-a");
    let source_b = RecordingSource::new("source-b");
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&a), "value"), source_a.clone());
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&b), "value"), source_b.clone());

    let writes = vec![
        PendingWrite {
            property: PropertyReference::new(as_dyn(&a), "value"),
            old_value: PropertyValue::Int(1),
            new_value: PropertyValue::Int(2),
            origin: ChangeOrigin::Local,
        },
        PendingWrite {
            property: PropertyReference::new(as_dyn(&b), "value"),
            old_value: PropertyValue::Int(1),
            new_value: PropertyValue::Int(2),
            origin: ChangeOrigin::Local,
        },
    ];
    let result = dispatch(&context, Transaction::new(TransactionMode::SingleWrite, writes)).await;
    assert!(result.is_err());
    assert!(source_a.written_values().is_empty());
    assert!(source_b.written_values().is_empty());
    Ok(())
}

#[tokio::test]
async fn single_write_mode_rejects_a_batch_larger_than_the_sources_declared_limit() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let a = Counter::new(1);
    context.attach(as_dyn(&a))?;

    let source = RecordingSource::with_batch_size("limited", 1);
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&a), "value"), source.clone());

    let writes = vec![
        PendingWrite {
            property: PropertyReference::new(as_dyn(&a), "value"),
            old_value: PropertyValue::Int(1),
            new_value: PropertyValue::Int(2),
            origin: ChangeOrigin::Local,
        },
        PendingWrite {
            property: PropertyReference::new(as_dyn(&a), "value"),
            old_value: PropertyValue::Int(2),
            new_value: PropertyValue::Int(3),
            origin: ChangeOrigin::Local,
        },
    ];
    let result = dispatch(&context, Transaction::new(TransactionMode::SingleWrite, writes)).await;
    assert!(result.is_err());
    assert!(source.written_values().is_empty());
    Ok(())
}

#[tokio::test]
async fn writes_to_the_same_source_are_sliced_into_its_declared_batch_size() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let a = Counter::new(0);
    context.attach(as_dyn(&a))?;

    let source = RecordingSource::with_batch_size("two-at-a-time", 2);
    context
        .sources()
        .bind(&context, &PropertyReference::new(as_dyn(&a), "value"), source.clone());

    let writes: Vec<PendingWrite> = (1..=5)
        .map(|i| PendingWrite {
            property: PropertyReference::new(as_dyn(&a), "value"),
            old_value: PropertyValue::Int(i - 1),
            new_value: PropertyValue::Int(i),
            origin: ChangeOrigin::Local,
        })
        .collect();
    let outcome = dispatch(&context, Transaction::new(TransactionMode::Default, writes)).await?;

    assert_eq!(outcome.applied.len(), 5);
    assert_eq!(
        source.written_values(),
        (1..=5).map(PropertyValue::Int).collect::<Vec<_>>()
    );
    assert_eq!(subject_core::read(&as_dyn(&a), "value")?, PropertyValue::Int(5));
    Ok(())
}
