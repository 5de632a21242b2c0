//! Change publication (push + pull) and derived-property dependency
//! cascading.

mod support;

use std::sync::{Arc, Mutex};

use subject_core::change::ChangeOrigin;
use subject_core::config::RuntimeConfig;
use subject_core::context::Context;
use subject_core::error::Result;
use subject_core::lifecycle::DerivedPropertyInitializer;
use subject_core::property::PropertyValue;

use support::{as_dyn, Counter, RecordingSource, Total};

#[test]
fn push_observer_sees_every_local_write() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let counter = Counter::new(0);
    context.attach(as_dyn(&counter))?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_for_observer = seen.clone();
    context.change_stream().observe(Arc::new(move |record: &subject_core::change::ChangeRecord| {
        seen_for_observer.lock().unwrap().push(record.new_value.clone());
    }));

    subject_core::write(&as_dyn(&counter), "value", PropertyValue::Int(1))?;
    subject_core::write(&as_dyn(&counter), "value", PropertyValue::Int(2))?;

    assert_eq!(*seen.lock().unwrap(), vec![PropertyValue::Int(1), PropertyValue::Int(2)]);
    Ok(())
}

#[tokio::test]
async fn pull_subscription_drains_published_records_in_order() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let counter = Counter::new(0);
    context.attach(as_dyn(&counter))?;

    let subscription = context.change_stream().subscribe(8);
    subject_core::write(&as_dyn(&counter), "value", PropertyValue::Int(10))?;
    subject_core::write(&as_dyn(&counter), "value", PropertyValue::Int(20))?;

    let first = subscription.recv().await.expect("first record");
    let second = subscription.recv().await.expect("second record");
    assert_eq!(first.new_value, PropertyValue::Int(10));
    assert_eq!(second.new_value, PropertyValue::Int(20));

    drop(subscription);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_bounded_subscription_with_a_concurrent_drainer_delivers_every_record_in_order() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let counter = Counter::new(0);
    context.attach(as_dyn(&counter))?;

    let subscription = context.change_stream().subscribe(2);

    let writer_counter = counter.clone();
    let writer = tokio::task::spawn_blocking(move || -> Result<()> {
        for i in 0..10 {
            subject_core::write(&as_dyn(&writer_counter), "value", PropertyValue::Int(i))?;
        }
        Ok(())
    });

    let mut drained = Vec::new();
    while drained.len() < 10 {
        let record = subscription.recv().await.expect("record before writer finishes");
        drained.push(record.new_value);
    }
    writer.await.expect("writer task panicked")?;

    assert_eq!(drained, (0..10).map(PropertyValue::Int).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn a_fresh_subscription_does_not_see_writes_published_before_it_opened() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let counter = Counter::new(0);
    context.attach(as_dyn(&counter))?;

    let early = context.change_stream().subscribe(4);
    early.cancel();

    let later = context.change_stream().subscribe(4);
    subject_core::write(&as_dyn(&counter), "value", PropertyValue::Int(5))?;
    let record = later.recv().await.expect("record");
    assert_eq!(record.new_value, PropertyValue::Int(5));
    Ok(())
}

#[test]
fn writing_a_dependency_recomputes_and_republishes_the_derived_property() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    context.add_lifecycle_handler(Arc::new(DerivedPropertyInitializer));

    let counter = Counter::new(1);
    let total = Total::new(counter.clone());
    context.attach(as_dyn(&total))?;

    assert_eq!(subject_core::read(&as_dyn(&total), "doubled")?, PropertyValue::Int(2));

    let published = Arc::new(Mutex::new(Vec::new()));
    let published_for_observer = published.clone();
    context.change_stream().observe(Arc::new(move |record: &subject_core::change::ChangeRecord| {
        published_for_observer
            .lock()
            .unwrap()
            .push((record.property, record.new_value.clone()));
    }));

    subject_core::write(&as_dyn(&counter), "value", PropertyValue::Int(10))?;

    assert_eq!(subject_core::read(&as_dyn(&total), "doubled")?, PropertyValue::Int(20));
    assert_eq!(
        *published.lock().unwrap(),
        vec![("value", PropertyValue::Int(10)), ("doubled", PropertyValue::Int(20))]
    );
    Ok(())
}

#[test]
fn a_value_applied_from_a_source_is_tagged_and_still_cascades() -> Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    context.add_lifecycle_handler(Arc::new(DerivedPropertyInitializer));

    let counter = Counter::new(1);
    let total = Total::new(counter.clone());
    context.attach(as_dyn(&total))?;

    let published = Arc::new(Mutex::new(Vec::new()));
    let published_for_observer = published.clone();
    context.change_stream().observe(Arc::new(move |record: &subject_core::change::ChangeRecord| {
        published_for_observer.lock().unwrap().push(record.origin);
    }));

    let source: Arc<dyn subject_core::source::Source> = RecordingSource::new("upstream");
    let source_id = subject_core::source::source_id(&source);
    let now = context.clock().now_utc();
    subject_core::source::set_value_from_source(
        &context,
        &source,
        &as_dyn(&counter),
        "value",
        PropertyValue::Int(7),
        now,
        now,
    )?;

    assert_eq!(subject_core::read(&as_dyn(&total), "doubled")?, PropertyValue::Int(14));
    assert_eq!(
        *published.lock().unwrap(),
        vec![ChangeOrigin::Source(source_id), ChangeOrigin::Local]
    );
    Ok(())
}
