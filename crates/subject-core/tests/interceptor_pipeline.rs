//! Interceptor chain ordering, transformation and veto.

mod support;

use std::sync::{Arc, Mutex};

use subject_core::config::RuntimeConfig;
use subject_core::context::Context;
use subject_core::property::PropertyValue;

use support::{as_dyn, Counter, DoublingWriteInterceptor, OrderingReadInterceptor, OrderingWriteInterceptor, VetoingWriteInterceptor};

#[test]
fn read_interceptors_run_in_attachment_order() -> subject_core::Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let log = Arc::new(Mutex::new(Vec::new()));
    context.add_read_interceptor(Arc::new(OrderingReadInterceptor {
        label: "first",
        log: log.clone(),
    }));
    context.add_read_interceptor(Arc::new(OrderingReadInterceptor {
        label: "second",
        log: log.clone(),
    }));

    let counter = Counter::new(7);
    context.attach(as_dyn(&counter))?;

    let value = subject_core::read(&as_dyn(&counter), "value")?;
    assert_eq!(value, PropertyValue::Int(7));
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    Ok(())
}

#[test]
fn write_interceptor_can_transform_the_value_before_the_terminal_write() -> subject_core::Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    context.add_write_interceptor(Arc::new(DoublingWriteInterceptor));

    let counter = Counter::new(0);
    context.attach(as_dyn(&counter))?;

    subject_core::write(&as_dyn(&counter), "value", PropertyValue::Int(5))?;
    let value = subject_core::read(&as_dyn(&counter), "value")?;
    assert_eq!(value, PropertyValue::Int(10));
    Ok(())
}

#[test]
fn write_interceptor_veto_leaves_the_stored_value_untouched() -> subject_core::Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    context.add_write_interceptor(Arc::new(VetoingWriteInterceptor));

    let counter = Counter::new(3);
    context.attach(as_dyn(&counter))?;

    let result = subject_core::write(&as_dyn(&counter), "value", PropertyValue::Int(99));
    assert!(result.is_err());

    let value = subject_core::read(&as_dyn(&counter), "value")?;
    assert_eq!(value, PropertyValue::Int(3));
    Ok(())
}

#[test]
fn write_interceptors_see_the_value_in_attachment_order_before_the_veto() -> subject_core::Result<()> {
    let context = Context::new(RuntimeConfig::default())?;
    let log = Arc::new(Mutex::new(Vec::new()));
    context.add_write_interceptor(Arc::new(OrderingWriteInterceptor {
        label: "audit",
        log: log.clone(),
    }));
    context.add_write_interceptor(Arc::new(VetoingWriteInterceptor));

    let counter = Counter::new(1);
    context.attach(as_dyn(&counter))?;

    let _ = subject_core::write(&as_dyn(&counter), "value", PropertyValue::Int(2));
    assert_eq!(*log.lock().unwrap(), vec!["audit"]);
    Ok(())
}
