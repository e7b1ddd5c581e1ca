//! Monitors, guest threads and host threads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytecode_system::{AccessFlags, ClassBuilder, Opcode, ValueKind};
use core_types::Value;
use interpreter::{Invocation, Vm, VmConfig, VmThread};
use parking_lot::Mutex;

use super::{default_constructor, describe, public_static, vm_with, vm_with_config, SharedBuffer};

fn locks() -> ClassBuilder {
    let mut class = ClassBuilder::new("t/Locks");
    class.field(AccessFlags::PRIVATE, "count", "I");
    default_constructor(&mut class, "java/lang/Object");

    let synchronized = AccessFlags::PUBLIC | AccessFlags::SYNCHRONIZED;
    let mut add = class.method(synchronized, "add", "(I)V");
    add.op(Opcode::Aload0)
        .op(Opcode::Dup)
        .field(Opcode::Getfield, "t/Locks", "count", "I")
        .load(ValueKind::Int, 1)
        .op(Opcode::Iadd)
        .field(Opcode::Putfield, "t/Locks", "count", "I")
        .op(Opcode::Return)
        .maxs(3, 2);
    add.finish().unwrap();

    let mut outer = class.method(synchronized, "outer", "()I");
    outer
        .op(Opcode::Aload0)
        .iconst(1)
        .invoke(Opcode::Invokevirtual, "t/Locks", "add", "(I)V")
        .op(Opcode::Aload0)
        .invoke(Opcode::Invokevirtual, "t/Locks", "peek", "()I")
        .op(Opcode::Ireturn)
        .maxs(2, 1);
    outer.finish().unwrap();

    class.declare_method(AccessFlags::PUBLIC | AccessFlags::NATIVE, "peek", "()I");

    let mut get = class.method(AccessFlags::PUBLIC, "get", "()I");
    get.op(Opcode::Aload0)
        .field(Opcode::Getfield, "t/Locks", "count", "I")
        .op(Opcode::Ireturn)
        .maxs(1, 1);
    get.finish().unwrap();

    let mut nested = class.method(public_static(), "nested", "(Ljava/lang/Object;)I");
    nested
        .load(ValueKind::Reference, 0)
        .op(Opcode::Monitorenter)
        .load(ValueKind::Reference, 0)
        .op(Opcode::Monitorenter)
        .load(ValueKind::Reference, 0)
        .op(Opcode::Monitorexit)
        .load(ValueKind::Reference, 0)
        .op(Opcode::Monitorexit)
        .iconst(1)
        .op(Opcode::Ireturn)
        .maxs(1, 1);
    nested.finish().unwrap();

    let mut unbalanced = class.method(public_static(), "unbalanced", "()V");
    unbalanced
        .type_op(Opcode::New, "java/lang/Object")
        .op(Opcode::Dup)
        .invoke(Opcode::Invokespecial, "java/lang/Object", "<init>", "()V")
        .op(Opcode::Monitorexit)
        .op(Opcode::Return)
        .maxs(2, 0);
    unbalanced.finish().unwrap();

    let mut null_lock = class.method(public_static(), "nullLock", "()V");
    null_lock
        .op(Opcode::AconstNull)
        .op(Opcode::Monitorenter)
        .op(Opcode::Return)
        .maxs(1, 0);
    null_lock.finish().unwrap();

    class
}

#[test]
fn test_synchronized_method_is_reentrant() {
    let vm = vm_with(vec![locks()]);
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    vm.register_native("t/Locks", "peek", "()I", |call: &Invocation<'_>| {
        let owner = call.vm.monitor_owner(call.this()?);
        Ok(Some(Value::Int(owner.map_or(-1, |id| id as i32))))
    });

    let locks = vm.new_instance(thread, "t/Locks", "()V", &[]).unwrap();
    let owner = vm.invoke_virtual(thread, &locks, "outer", "()I", &[]).unwrap();
    assert_eq!(owner, Some(Value::Int(thread.id() as i32)));
    assert_eq!(vm.monitor_owner(&locks), None);
    assert_eq!(
        vm.invoke_virtual(thread, &locks, "get", "()I", &[]).unwrap(),
        Some(Value::Int(1))
    );
}

#[test]
fn test_balanced_monitor_instructions() {
    let vm = vm_with(vec![locks()]);
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    let object = vm.new_instance(thread, "java/lang/Object", "()V", &[]).unwrap();
    let result = vm
        .invoke_static(
            thread,
            "t/Locks",
            "nested",
            "(Ljava/lang/Object;)I",
            &[Value::Reference(object.clone())],
        )
        .unwrap();
    assert_eq!(result, Some(Value::Int(1)));
    assert_eq!(vm.monitor_owner(&object), None);
}

#[test]
fn test_monitor_exit_without_enter() {
    let vm = vm_with(vec![locks()]);
    let main = vm.attach_thread("main").unwrap();
    let error = vm
        .invoke_static(main.thread(), "t/Locks", "unbalanced", "()V", &[])
        .unwrap_err();
    assert!(describe(&vm, &error)
        .starts_with("java.lang.IllegalMonitorStateException: current thread is not owner"));
}

#[test]
fn test_monitor_enter_on_null() {
    let vm = vm_with(vec![locks()]);
    let main = vm.attach_thread("main").unwrap();
    let error = vm
        .invoke_static(main.thread(), "t/Locks", "nullLock", "()V", &[])
        .unwrap_err();
    assert!(describe(&vm, &error).starts_with("java.lang.NullPointerException"));
}

#[test]
fn test_synchronized_method_excludes_other_threads() {
    const THREADS: usize = 4;
    const ROUNDS: i32 = 200;

    let vm = vm_with(vec![locks()]);
    let locks = {
        let main = vm.attach_thread("main").unwrap();
        vm.new_instance(main.thread(), "t/Locks", "()V", &[]).unwrap()
    };
    let pin = vm.make_handle(&locks);

    let workers: Vec<_> = (0..THREADS)
        .map(|index| {
            let locks = locks.clone();
            vm.spawn_thread(&format!("adder-{}", index), move |vm, thread| {
                for _ in 0..ROUNDS {
                    vm.invoke_virtual(thread, &locks, "add", "(I)V", &[Value::Int(1)])?;
                }
                Ok(())
            })
            .unwrap()
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let main = vm.attach_thread("main").unwrap();
    let total = vm
        .invoke_virtual(main.thread(), &locks, "get", "()I", &[])
        .unwrap();
    assert_eq!(total, Some(Value::Int(THREADS as i32 * ROUNDS)));
    assert!(vm.release_handle(&pin));
}

fn launcher() -> Vec<ClassBuilder> {
    let mut worker = ClassBuilder::new("t/Worker");
    worker
        .implements("java/lang/Runnable")
        .field(public_static(), "value", "I");
    default_constructor(&mut worker, "java/lang/Object");
    let mut run = worker.method(AccessFlags::PUBLIC, "run", "()V");
    run.iconst(7)
        .field(Opcode::Putstatic, "t/Worker", "value", "I")
        .op(Opcode::Return)
        .maxs(1, 1);
    run.finish().unwrap();

    let mut failing = ClassBuilder::new("t/Failing");
    failing.implements("java/lang/Runnable");
    default_constructor(&mut failing, "java/lang/Object");
    let mut run = failing.method(AccessFlags::PUBLIC, "run", "()V");
    run.iconst(1)
        .iconst(0)
        .op(Opcode::Idiv)
        .op(Opcode::Pop)
        .op(Opcode::Return)
        .maxs(2, 1);
    run.finish().unwrap();

    let mut launcher = ClassBuilder::new("t/Launcher");
    for (name, target) in [("launch", "t/Worker"), ("launchFailing", "t/Failing")] {
        let mut launch = launcher.method(public_static(), name, "()V");
        launch
            .type_op(Opcode::New, "java/lang/Thread")
            .op(Opcode::Dup)
            .type_op(Opcode::New, target)
            .op(Opcode::Dup)
            .invoke(Opcode::Invokespecial, target, "<init>", "()V")
            .invoke(
                Opcode::Invokespecial,
                "java/lang/Thread",
                "<init>",
                "(Ljava/lang/Runnable;)V",
            )
            .store(ValueKind::Reference, 0)
            .load(ValueKind::Reference, 0)
            .invoke(Opcode::Invokevirtual, "java/lang/Thread", "start", "()V")
            .load(ValueKind::Reference, 0)
            .invoke(Opcode::Invokevirtual, "java/lang/Thread", "join", "()V")
            .op(Opcode::Return)
            .maxs(4, 1);
        launch.finish().unwrap();
    }

    let mut twice = launcher.method(public_static(), "startTwice", "()V");
    twice
        .type_op(Opcode::New, "java/lang/Thread")
        .op(Opcode::Dup)
        .type_op(Opcode::New, "t/Worker")
        .op(Opcode::Dup)
        .invoke(Opcode::Invokespecial, "t/Worker", "<init>", "()V")
        .invoke(
            Opcode::Invokespecial,
            "java/lang/Thread",
            "<init>",
            "(Ljava/lang/Runnable;)V",
        )
        .store(ValueKind::Reference, 0)
        .load(ValueKind::Reference, 0)
        .invoke(Opcode::Invokevirtual, "java/lang/Thread", "start", "()V")
        .load(ValueKind::Reference, 0)
        .invoke(Opcode::Invokevirtual, "java/lang/Thread", "start", "()V")
        .op(Opcode::Return)
        .maxs(4, 1);
    twice.finish().unwrap();

    let mut current = launcher.method(public_static(), "currentName", "()Ljava/lang/String;");
    current
        .invoke(
            Opcode::Invokestatic,
            "java/lang/Thread",
            "currentThread",
            "()Ljava/lang/Thread;",
        )
        .invoke(
            Opcode::Invokevirtual,
            "java/lang/Thread",
            "getName",
            "()Ljava/lang/String;",
        )
        .op(Opcode::Areturn)
        .maxs(1, 0);
    current.finish().unwrap();

    let mut value = launcher.method(public_static(), "value", "()I");
    value
        .field(Opcode::Getstatic, "t/Worker", "value", "I")
        .op(Opcode::Ireturn)
        .maxs(1, 0);
    value.finish().unwrap();

    vec![worker, failing, launcher]
}

#[test]
fn test_guest_thread_start_and_join() {
    let vm = vm_with(launcher());
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    vm.invoke_static(thread, "t/Launcher", "launch", "()V", &[]).unwrap();
    assert_eq!(
        vm.invoke_static(thread, "t/Launcher", "value", "()I", &[]).unwrap(),
        Some(Value::Int(7))
    );
}

#[test]
fn test_thread_started_twice() {
    let vm = vm_with(launcher());
    let main = vm.attach_thread("main").unwrap();
    let error = vm
        .invoke_static(main.thread(), "t/Launcher", "startTwice", "()V", &[])
        .unwrap_err();
    assert!(describe(&vm, &error).starts_with("java.lang.IllegalThreadStateException"));
}

#[test]
fn test_uncaught_exception_in_guest_thread() {
    let vm = vm_with(launcher());
    let output = SharedBuffer::default();
    vm.set_output(Box::new(output.clone()));
    let main = vm.attach_thread("main").unwrap();
    vm.invoke_static(main.thread(), "t/Launcher", "launchFailing", "()V", &[])
        .unwrap();
    let text = output.contents();
    assert!(text.starts_with("Exception in thread \"Thread-"));
    assert!(text.contains("java.lang.ArithmeticException: / by zero"));
    assert!(text.contains("\tat t.Failing.run"));
}

#[test]
fn test_current_thread_name() {
    let vm = vm_with(launcher());
    let main = vm.attach_thread("main").unwrap();
    let name = vm
        .invoke_static(main.thread(), "t/Launcher", "currentName", "()Ljava/lang/String;", &[])
        .unwrap();
    let Some(Value::Reference(name)) = name else {
        panic!("expected a string, got {:?}", name);
    };
    assert_eq!(vm.read_string(&name).unwrap(), "main");
}

#[test]
fn test_attach_twice_rejected() {
    let vm = vm_with(vec![]);
    let _main = vm.attach_thread("main").unwrap();
    assert!(vm.attach_thread("again").is_err());
    assert_eq!(vm.threads().len(), 1);
}

#[test]
fn test_detach_on_drop() {
    let vm = vm_with(vec![]);
    let id = {
        let main = vm.attach_thread("main").unwrap();
        assert!(vm.current_thread().is_some());
        main.thread().id()
    };
    assert!(vm.current_thread().is_none());
    assert!(vm.threads().iter().all(|thread| thread.id() != id));
}

#[test]
fn test_spawned_thread_returns_value() {
    let vm = vm_with(launcher());
    let handle = vm
        .spawn_thread("helper", |vm, thread| {
            let name = vm
                .invoke_static(thread, "t/Launcher", "currentName", "()Ljava/lang/String;", &[])?;
            match name {
                Some(Value::Reference(name)) => Ok(vm.read_string(&name)?),
                other => panic!("expected a string, got {:?}", other),
            }
        })
        .unwrap();
    assert_eq!(handle.join().unwrap(), "helper");
}

#[test]
fn test_deep_recursion_overflows() {
    let mut class = ClassBuilder::new("t/Deep");
    let mut down = class.method(public_static(), "down", "(I)I");
    down.load(ValueKind::Int, 0)
        .iconst(1)
        .op(Opcode::Iadd)
        .invoke(Opcode::Invokestatic, "t/Deep", "down", "(I)I")
        .op(Opcode::Ireturn)
        .maxs(2, 1);
    down.finish().unwrap();

    let config = VmConfig {
        max_call_depth: 64,
        ..VmConfig::default()
    };
    let vm = vm_with_config(config, vec![class]);
    let handle = vm
        .spawn_thread("deep", |vm, thread| {
            let error = vm
                .invoke_static(thread, "t/Deep", "down", "(I)I", &[Value::Int(0)])
                .expect_err("recursion must overflow");
            assert_eq!(thread.depth(), 0);
            Ok(describe(vm, &error))
        })
        .unwrap();
    let text = handle.join().unwrap();
    assert!(text.starts_with("java.lang.StackOverflowError"));
    assert!(text.contains("\tat t.Deep.down"));
}

#[test]
fn test_tasks_run_at_next_entry() {
    let vm = vm_with(launcher());
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    let ran = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(None));

    {
        let ran = ran.clone();
        let seen = seen.clone();
        assert!(vm.submit_task(
            thread.id(),
            Box::new(move |_: &Vm, on: &Arc<VmThread>| {
                ran.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = Some(on.id());
            }),
        ));
    }
    assert_eq!(thread.pending_tasks(), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    vm.invoke_static(thread, "t/Launcher", "value", "()I", &[]).unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), Some(thread.id()));
    assert_eq!(thread.pending_tasks(), 0);

    assert!(!vm.submit_task(u64::MAX, Box::new(|_: &Vm, _: &Arc<VmThread>| {})));
}
