//! End-to-End CLI Integration Tests
//!
//! Tests complete programs through the vm_cli Runtime API: class files on
//! disk, a class path, `main`, threads and the uncaught-exception report.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytecode_system::{AccessFlags, ClassBuilder, Opcode, ValueKind};
use clap::Parser;
use integration_tests::{default_constructor, public_static};
use interpreter::VmConfig;
use tempfile::TempDir;
use vm_cli::{Cli, CliError, Runtime};

const OUT: &str = "Ljava/io/PrintStream;";
const PRINT_STREAM: &str = "java/io/PrintStream";
const MAIN: &str = "([Ljava/lang/String;)V";

#[derive(Clone, Default)]
struct Output(Arc<Mutex<Vec<u8>>>);

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Output {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn install(root: &Path, classes: &[ClassBuilder]) {
    for class in classes {
        let file = class.build();
        let path = root.join(format!("{}.class", file.this_class));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, file.to_bytes()).unwrap();
    }
}

fn println_int(method: &mut bytecode_system::MethodBuilder<'_>) {
    method.invoke(Opcode::Invokevirtual, PRINT_STREAM, "println", "(I)V");
}

/// Runnable printing the sum 1..=10 from a second thread.
fn worker() -> ClassBuilder {
    let mut class = ClassBuilder::new("app/Worker");
    class.implements("java/lang/Runnable");
    default_constructor(&mut class, "java/lang/Object");
    let mut run = class.method(AccessFlags::PUBLIC, "run", "()V");
    let top = run.new_label();
    let done = run.new_label();
    run.iconst(0)
        .store(ValueKind::Int, 1)
        .iconst(10)
        .store(ValueKind::Int, 2)
        .bind(top)
        .load(ValueKind::Int, 2)
        .branch(Opcode::Ifle, done)
        .load(ValueKind::Int, 1)
        .load(ValueKind::Int, 2)
        .op(Opcode::Iadd)
        .store(ValueKind::Int, 1)
        .iinc(2, -1)
        .goto(top)
        .bind(done)
        .field(Opcode::Getstatic, "java/lang/System", "out", OUT)
        .load(ValueKind::Int, 1);
    println_int(&mut run);
    run.op(Opcode::Return).maxs(2, 3);
    run.finish().unwrap();
    class
}

/// Starts a Worker thread, joins it, then prints the argument count.
fn launcher() -> ClassBuilder {
    let mut class = ClassBuilder::new("app/Main");
    class.source_file("Main.java");
    let mut main = class.method(public_static(), "main", MAIN);
    main.type_op(Opcode::New, "java/lang/Thread")
        .op(Opcode::Dup)
        .type_op(Opcode::New, "app/Worker")
        .op(Opcode::Dup)
        .invoke(Opcode::Invokespecial, "app/Worker", "<init>", "()V")
        .invoke(
            Opcode::Invokespecial,
            "java/lang/Thread",
            "<init>",
            "(Ljava/lang/Runnable;)V",
        )
        .store(ValueKind::Reference, 1)
        .load(ValueKind::Reference, 1)
        .invoke(Opcode::Invokevirtual, "java/lang/Thread", "start", "()V")
        .load(ValueKind::Reference, 1)
        .invoke(Opcode::Invokevirtual, "java/lang/Thread", "join", "()V")
        .field(Opcode::Getstatic, "java/lang/System", "out", OUT)
        .load(ValueKind::Reference, 0)
        .op(Opcode::Arraylength);
    println_int(&mut main);
    main.op(Opcode::Return).maxs(4, 2);
    main.finish().unwrap();
    class
}

/// Test: A threaded program runs from a class path directory
#[test]
fn test_e2e_threaded_program() {
    let dir = TempDir::new().unwrap();
    install(dir.path(), &[worker(), launcher()]);

    let runtime = Runtime::new(VmConfig::default(), vec![dir.path().to_path_buf()]).unwrap();
    let output = Output::default();
    runtime.vm().set_output(Box::new(output.clone()));
    runtime
        .run("app.Main", &["x".to_string(), "y".to_string(), "z".to_string()])
        .unwrap();

    assert_eq!(output.text(), "55\n3\n");
}

/// Test: Command-line flags reach the VM configuration
#[test]
fn test_e2e_runtime_from_cli() {
    let dir = TempDir::new().unwrap();
    install(dir.path(), &[worker(), launcher()]);

    let cli = Cli::try_parse_from([
        "corten-vm".to_string(),
        "--classpath".to_string(),
        dir.path().display().to_string(),
        "--address-size".to_string(),
        "32".to_string(),
        "--big-endian".to_string(),
        "--gc-stats".to_string(),
        "app/Main".to_string(),
    ])
    .unwrap();
    let runtime = Runtime::from_cli(&cli).unwrap();
    assert!(runtime.vm().config().gc_stats);

    let output = Output::default();
    runtime.vm().set_output(Box::new(output.clone()));
    runtime.run(&cli.main_class, &cli.args).unwrap();
    assert_eq!(output.text(), "55\n0\n");
    assert!(runtime.gc_summary().unwrap().starts_with("[gc] "));
}

/// Test: An exception escaping main becomes the launcher's error report
#[test]
fn test_e2e_uncaught_exception() {
    let mut class = ClassBuilder::new("app/Boom");
    class.source_file("Boom.java");
    let mut main = class.method(public_static(), "main", MAIN);
    main.line(9)
        .op(Opcode::AconstNull)
        .op(Opcode::Athrow)
        .maxs(1, 1);
    main.finish().unwrap();

    let dir = TempDir::new().unwrap();
    install(dir.path(), &[class]);
    let runtime = Runtime::new(VmConfig::default(), vec![dir.path().to_path_buf()]).unwrap();

    match runtime.run("app.Boom", &[]) {
        Err(error @ CliError::Uncaught { .. }) => {
            let text = error.to_string();
            assert!(text.starts_with("Exception in thread \"main\" java.lang.NullPointerException"));
            assert!(text.contains("\tat app.Boom.main(Boom.java:9)"));
            assert_eq!(error.exit_code(), 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}
