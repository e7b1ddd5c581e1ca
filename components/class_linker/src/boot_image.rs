//! The boot image.
//!
//! A minimal `java.lang` assembled in memory: enough of `Object`, `Class`,
//! `String`, `Throwable` and its hierarchy, `Thread`, `System` and
//! `PrintStream` for programs to run without a JDK. Methods the VM
//! implements in Rust are declared `native`; everything else is bytecode.

use bytecode_system::{
    AccessFlags, ArrayKind, ClassBuilder, FormatResult, Opcode, ValueKind,
};

use crate::source::MemoryClassSource;

const OBJECT: &str = "java/lang/Object";
const STRING: &str = "java/lang/String";
const THROWABLE: &str = "java/lang/Throwable";

const PUBLIC: AccessFlags = AccessFlags::PUBLIC;
const PUBLIC_STATIC: AccessFlags = AccessFlags(AccessFlags::PUBLIC.0 | AccessFlags::STATIC.0);
const PUBLIC_NATIVE: AccessFlags = AccessFlags(AccessFlags::PUBLIC.0 | AccessFlags::NATIVE.0);
const PUBLIC_STATIC_NATIVE: AccessFlags =
    AccessFlags(AccessFlags::PUBLIC.0 | AccessFlags::STATIC.0 | AccessFlags::NATIVE.0);

/// Throwable subclasses and their superclasses, parents first.
pub const EXCEPTION_HIERARCHY: &[(&str, &str)] = &[
    ("java/lang/Exception", THROWABLE),
    ("java/lang/Error", THROWABLE),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/ArrayStoreException", "java/lang/RuntimeException"),
    ("java/lang/IllegalMonitorStateException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalThreadStateException", "java/lang/IllegalArgumentException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/InterruptedException", "java/lang/Exception"),
    ("java/lang/CloneNotSupportedException", "java/lang/Exception"),
    ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
    ("java/lang/ClassNotFoundException", "java/lang/ReflectiveOperationException"),
    ("java/lang/InstantiationException", "java/lang/ReflectiveOperationException"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/NoClassDefFoundError", "java/lang/LinkageError"),
    ("java/lang/UnsatisfiedLinkError", "java/lang/LinkageError"),
    ("java/lang/ExceptionInInitializerError", "java/lang/LinkageError"),
    ("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
    ("java/lang/AbstractMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/InstantiationError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoSuchFieldError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoSuchMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ("java/lang/StackOverflowError", "java/lang/VirtualMachineError"),
    ("java/lang/InternalError", "java/lang/VirtualMachineError"),
];

/// Assembles the boot image.
///
/// # Example
///
/// ```
/// use class_linker::{boot_image, ClassSource};
///
/// let image = boot_image().unwrap();
/// assert!(image.lookup("java/lang/Object").is_some());
/// assert!(image.lookup("java/lang/StackOverflowError").is_some());
/// ```
pub fn boot_image() -> FormatResult<MemoryClassSource> {
    let source = MemoryClassSource::new();
    add(&source, &object_class()?);
    add(&source, &class_class()?);
    add(&source, &string_class()?);
    add(&source, &throwable_class()?);
    for (name, super_name) in EXCEPTION_HIERARCHY {
        add(&source, &exception_class(name, super_name)?);
    }
    add(&source, &thread_class()?);
    add(&source, &system_class()?);
    add(&source, &print_stream_class()?);
    add(&source, &class_loader_class()?);
    for interface in ["java/lang/Cloneable", "java/io/Serializable"] {
        let mut class = ClassBuilder::new(interface);
        class.interface();
        add(&source, &class);
    }
    let mut runnable = ClassBuilder::new("java/lang/Runnable");
    runnable
        .interface()
        .declare_method(AccessFlags::PUBLIC | AccessFlags::ABSTRACT, "run", "()V");
    add(&source, &runnable);
    Ok(source)
}

fn add(source: &MemoryClassSource, class: &ClassBuilder) {
    let file = class.build();
    source.insert(&file.this_class, file.to_bytes());
}

fn source_name(name: &str) -> String {
    let simple = name.rsplit('/').next().unwrap_or(name);
    format!("{}.java", simple)
}

fn new_class(name: &str) -> ClassBuilder {
    let mut class = ClassBuilder::new(name);
    class.source_file(&source_name(name));
    class
}

/// `<init>()V` that only chains to the superclass constructor.
fn default_constructor(class: &mut ClassBuilder, access: AccessFlags, super_name: &str) -> FormatResult<()> {
    let mut init = class.method(access, "<init>", "()V");
    init.load(ValueKind::Reference, 0)
        .invoke(Opcode::Invokespecial, super_name, "<init>", "()V")
        .op(Opcode::Return)
        .maxs(1, 1);
    init.finish()
}

fn object_class() -> FormatResult<ClassBuilder> {
    let mut class = new_class(OBJECT);
    class.extends(None);

    let mut init = class.method(PUBLIC, "<init>", "()V");
    init.op(Opcode::Return).maxs(0, 1);
    init.finish()?;

    let mut equals = class.method(PUBLIC, "equals", "(Ljava/lang/Object;)Z");
    let different = equals.new_label();
    equals
        .load(ValueKind::Reference, 0)
        .load(ValueKind::Reference, 1)
        .branch(Opcode::IfAcmpne, different)
        .iconst(1)
        .op(Opcode::Ireturn)
        .bind(different)
        .iconst(0)
        .op(Opcode::Ireturn)
        .maxs(2, 2);
    equals.finish()?;

    let mut wait = class.method(PUBLIC | AccessFlags::FINAL, "wait", "()V");
    wait.load(ValueKind::Reference, 0)
        .lconst(0)
        .invoke(Opcode::Invokevirtual, OBJECT, "wait", "(J)V")
        .op(Opcode::Return)
        .maxs(3, 1);
    wait.finish()?;

    let final_native = PUBLIC_NATIVE | AccessFlags::FINAL;
    class
        .declare_method(PUBLIC_NATIVE, "hashCode", "()I")
        .declare_method(final_native, "getClass", "()Ljava/lang/Class;")
        .declare_method(PUBLIC_NATIVE, "toString", "()Ljava/lang/String;")
        .declare_method(
            AccessFlags::PROTECTED | AccessFlags::NATIVE,
            "clone",
            "()Ljava/lang/Object;",
        )
        .declare_method(final_native, "wait", "(J)V")
        .declare_method(final_native, "notify", "()V")
        .declare_method(final_native, "notifyAll", "()V");
    Ok(class)
}

fn class_class() -> FormatResult<ClassBuilder> {
    let mut class = new_class("java/lang/Class");
    class
        .access(PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER)
        .field(AccessFlags::PRIVATE, "classLoader", "Ljava/lang/ClassLoader;");
    default_constructor(&mut class, AccessFlags::PRIVATE, OBJECT)?;
    class
        .declare_method(PUBLIC_NATIVE, "getName", "()Ljava/lang/String;")
        .declare_method(PUBLIC_NATIVE, "isInterface", "()Z")
        .declare_method(PUBLIC_NATIVE, "isArray", "()Z")
        .declare_method(PUBLIC_NATIVE, "getSuperclass", "()Ljava/lang/Class;");

    let mut loader = class.method(PUBLIC, "getClassLoader", "()Ljava/lang/ClassLoader;");
    loader
        .load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, "java/lang/Class", "classLoader", "Ljava/lang/ClassLoader;")
        .op(Opcode::Areturn)
        .maxs(1, 1);
    loader.finish()?;
    Ok(class)
}

fn string_class() -> FormatResult<ClassBuilder> {
    let mut class = new_class(STRING);
    class
        .access(PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER)
        .implements("java/io/Serializable")
        .field(AccessFlags::PRIVATE | AccessFlags::FINAL, "value", "[C")
        .field(AccessFlags::PRIVATE, "hash", "I");

    let mut empty = class.method(PUBLIC, "<init>", "()V");
    empty
        .load(ValueKind::Reference, 0)
        .invoke(Opcode::Invokespecial, OBJECT, "<init>", "()V")
        .load(ValueKind::Reference, 0)
        .iconst(0)
        .newarray(ArrayKind::Char)
        .field(Opcode::Putfield, STRING, "value", "[C")
        .op(Opcode::Return)
        .maxs(2, 1);
    empty.finish()?;

    // Copies the argument so later writes to it are not observed.
    let mut from_chars = class.method(PUBLIC, "<init>", "([C)V");
    from_chars
        .load(ValueKind::Reference, 0)
        .invoke(Opcode::Invokespecial, OBJECT, "<init>", "()V")
        .load(ValueKind::Reference, 1)
        .op(Opcode::Arraylength)
        .newarray(ArrayKind::Char)
        .store(ValueKind::Reference, 2)
        .load(ValueKind::Reference, 1)
        .iconst(0)
        .load(ValueKind::Reference, 2)
        .iconst(0)
        .load(ValueKind::Reference, 1)
        .op(Opcode::Arraylength)
        .invoke(
            Opcode::Invokestatic,
            "java/lang/System",
            "arraycopy",
            "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        )
        .load(ValueKind::Reference, 0)
        .load(ValueKind::Reference, 2)
        .field(Opcode::Putfield, STRING, "value", "[C")
        .op(Opcode::Return)
        .maxs(5, 3);
    from_chars.finish()?;

    let mut length = class.method(PUBLIC, "length", "()I");
    length
        .load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, STRING, "value", "[C")
        .op(Opcode::Arraylength)
        .op(Opcode::Ireturn)
        .maxs(1, 1);
    length.finish()?;

    let mut char_at = class.method(PUBLIC, "charAt", "(I)C");
    char_at
        .load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, STRING, "value", "[C")
        .load(ValueKind::Int, 1)
        .op(Opcode::Caload)
        .op(Opcode::Ireturn)
        .maxs(2, 2);
    char_at.finish()?;

    // h = 31 * h + c over every char, cached in `hash`.
    let mut hash = class.method(PUBLIC, "hashCode", "()I");
    let done = hash.new_label();
    let head = hash.new_label();
    let store = hash.new_label();
    hash.load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, STRING, "hash", "I")
        .store(ValueKind::Int, 1)
        .load(ValueKind::Int, 1)
        .branch(Opcode::Ifne, done)
        .load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, STRING, "value", "[C")
        .store(ValueKind::Reference, 2)
        .iconst(0)
        .store(ValueKind::Int, 3)
        .bind(head)
        .load(ValueKind::Int, 3)
        .load(ValueKind::Reference, 2)
        .op(Opcode::Arraylength)
        .branch(Opcode::IfIcmpge, store)
        .iconst(31)
        .load(ValueKind::Int, 1)
        .op(Opcode::Imul)
        .load(ValueKind::Reference, 2)
        .load(ValueKind::Int, 3)
        .op(Opcode::Caload)
        .op(Opcode::Iadd)
        .store(ValueKind::Int, 1)
        .iinc(3, 1)
        .goto(head)
        .bind(store)
        .load(ValueKind::Reference, 0)
        .load(ValueKind::Int, 1)
        .field(Opcode::Putfield, STRING, "hash", "I")
        .bind(done)
        .load(ValueKind::Int, 1)
        .op(Opcode::Ireturn)
        .maxs(3, 4);
    hash.finish()?;

    let mut to_string = class.method(PUBLIC, "toString", "()Ljava/lang/String;");
    to_string
        .load(ValueKind::Reference, 0)
        .op(Opcode::Areturn)
        .maxs(1, 1);
    to_string.finish()?;

    let mut value_of = class.method(PUBLIC_STATIC, "valueOf", "(Ljava/lang/Object;)Ljava/lang/String;");
    let present = value_of.new_label();
    value_of
        .load(ValueKind::Reference, 0)
        .branch(Opcode::Ifnonnull, present)
        .ldc_string("null")
        .op(Opcode::Areturn)
        .bind(present)
        .load(ValueKind::Reference, 0)
        .invoke(Opcode::Invokevirtual, OBJECT, "toString", "()Ljava/lang/String;")
        .op(Opcode::Areturn)
        .maxs(1, 1);
    value_of.finish()?;

    class
        .declare_method(PUBLIC_NATIVE, "equals", "(Ljava/lang/Object;)Z")
        .declare_method(PUBLIC_NATIVE, "intern", "()Ljava/lang/String;")
        .declare_method(PUBLIC_NATIVE, "concat", "(Ljava/lang/String;)Ljava/lang/String;")
        .declare_method(PUBLIC_STATIC_NATIVE, "valueOf", "(I)Ljava/lang/String;")
        .declare_method(PUBLIC_STATIC_NATIVE, "valueOf", "(J)Ljava/lang/String;");
    Ok(class)
}

/// The three standard constructors; each chains to the same constructor of
/// `super_name` and, for `Throwable` itself, records the stack trace.
fn throwable_constructors(class: &mut ClassBuilder, super_name: &str, is_root: bool) -> FormatResult<()> {
    let signatures: [(&str, u16); 3] = [
        ("()V", 1),
        ("(Ljava/lang/String;)V", 2),
        ("(Ljava/lang/String;Ljava/lang/Throwable;)V", 3),
    ];
    for (descriptor, locals) in signatures {
        let mut init = class.method(PUBLIC, "<init>", descriptor);
        init.load(ValueKind::Reference, 0);
        if is_root {
            init.invoke(Opcode::Invokespecial, OBJECT, "<init>", "()V");
            if locals > 1 {
                init.load(ValueKind::Reference, 0)
                    .load(ValueKind::Reference, 1)
                    .field(Opcode::Putfield, THROWABLE, "detailMessage", "Ljava/lang/String;");
            }
            if locals > 2 {
                init.load(ValueKind::Reference, 0)
                    .load(ValueKind::Reference, 2)
                    .field(Opcode::Putfield, THROWABLE, "cause", "Ljava/lang/Throwable;");
            }
            init.load(ValueKind::Reference, 0)
                .invoke(
                    Opcode::Invokevirtual,
                    THROWABLE,
                    "fillInStackTrace",
                    "()Ljava/lang/Throwable;",
                )
                .op(Opcode::Pop);
        } else {
            for local in 1..locals {
                init.load(ValueKind::Reference, local);
            }
            init.invoke(Opcode::Invokespecial, super_name, "<init>", descriptor);
        }
        init.op(Opcode::Return).maxs(locals, locals);
        init.finish()?;
    }
    Ok(())
}

fn throwable_class() -> FormatResult<ClassBuilder> {
    let mut class = new_class(THROWABLE);
    class
        .implements("java/io/Serializable")
        .field(AccessFlags::PRIVATE, "detailMessage", "Ljava/lang/String;")
        .field(AccessFlags::PRIVATE, "cause", "Ljava/lang/Throwable;");
    throwable_constructors(&mut class, OBJECT, true)?;

    let mut message = class.method(PUBLIC, "getMessage", "()Ljava/lang/String;");
    message
        .load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, THROWABLE, "detailMessage", "Ljava/lang/String;")
        .op(Opcode::Areturn)
        .maxs(1, 1);
    message.finish()?;

    let mut cause = class.method(PUBLIC, "getCause", "()Ljava/lang/Throwable;");
    cause
        .load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, THROWABLE, "cause", "Ljava/lang/Throwable;")
        .op(Opcode::Areturn)
        .maxs(1, 1);
    cause.finish()?;

    class
        .declare_method(PUBLIC_NATIVE, "fillInStackTrace", "()Ljava/lang/Throwable;")
        .declare_method(PUBLIC_NATIVE, "toString", "()Ljava/lang/String;")
        .declare_method(PUBLIC_NATIVE, "printStackTrace", "()V");
    Ok(class)
}

fn exception_class(name: &str, super_name: &str) -> FormatResult<ClassBuilder> {
    let mut class = new_class(name);
    class.extends(Some(super_name));
    throwable_constructors(&mut class, super_name, false)?;
    Ok(class)
}

fn thread_class() -> FormatResult<ClassBuilder> {
    const THREAD: &str = "java/lang/Thread";
    let mut class = new_class(THREAD);
    class
        .implements("java/lang/Runnable")
        .field(AccessFlags::PRIVATE, "name", "Ljava/lang/String;")
        .field(AccessFlags::PRIVATE, "eetop", "J")
        .field(AccessFlags::PRIVATE, "target", "Ljava/lang/Runnable;");
    default_constructor(&mut class, PUBLIC, OBJECT)?;

    let mut with_target = class.method(PUBLIC, "<init>", "(Ljava/lang/Runnable;)V");
    with_target
        .load(ValueKind::Reference, 0)
        .invoke(Opcode::Invokespecial, OBJECT, "<init>", "()V")
        .load(ValueKind::Reference, 0)
        .load(ValueKind::Reference, 1)
        .field(Opcode::Putfield, THREAD, "target", "Ljava/lang/Runnable;")
        .op(Opcode::Return)
        .maxs(2, 2);
    with_target.finish()?;

    let mut run = class.method(PUBLIC, "run", "()V");
    let end = run.new_label();
    run.load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, THREAD, "target", "Ljava/lang/Runnable;")
        .branch(Opcode::Ifnull, end)
        .load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, THREAD, "target", "Ljava/lang/Runnable;")
        .invoke(Opcode::Invokeinterface, "java/lang/Runnable", "run", "()V")
        .bind(end)
        .op(Opcode::Return)
        .maxs(1, 1);
    run.finish()?;

    class
        .declare_method(PUBLIC_STATIC_NATIVE, "currentThread", "()Ljava/lang/Thread;")
        .declare_method(PUBLIC_STATIC_NATIVE, "sleep", "(J)V")
        .declare_method(PUBLIC_STATIC_NATIVE, "yield", "()V")
        .declare_method(PUBLIC_NATIVE, "getName", "()Ljava/lang/String;")
        .declare_method(PUBLIC_NATIVE, "start", "()V")
        .declare_method(PUBLIC_NATIVE, "join", "()V");
    Ok(class)
}

fn system_class() -> FormatResult<ClassBuilder> {
    const SYSTEM: &str = "java/lang/System";
    const PRINT_STREAM: &str = "java/io/PrintStream";
    let mut class = new_class(SYSTEM);
    class
        .access(PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER)
        .field(
            PUBLIC_STATIC | AccessFlags::FINAL,
            "out",
            "Ljava/io/PrintStream;",
        );
    default_constructor(&mut class, AccessFlags::PRIVATE, OBJECT)?;

    let mut clinit = class.method(AccessFlags::STATIC, "<clinit>", "()V");
    clinit
        .type_op(Opcode::New, PRINT_STREAM)
        .op(Opcode::Dup)
        .invoke(Opcode::Invokespecial, PRINT_STREAM, "<init>", "()V")
        .field(Opcode::Putstatic, SYSTEM, "out", "Ljava/io/PrintStream;")
        .op(Opcode::Return)
        .maxs(2, 0);
    clinit.finish()?;

    class
        .declare_method(
            PUBLIC_STATIC_NATIVE,
            "arraycopy",
            "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        )
        .declare_method(PUBLIC_STATIC_NATIVE, "currentTimeMillis", "()J")
        .declare_method(PUBLIC_STATIC_NATIVE, "nanoTime", "()J")
        .declare_method(PUBLIC_STATIC_NATIVE, "identityHashCode", "(Ljava/lang/Object;)I")
        .declare_method(PUBLIC_STATIC_NATIVE, "gc", "()V");
    Ok(class)
}

fn print_stream_class() -> FormatResult<ClassBuilder> {
    const PRINT_STREAM: &str = "java/io/PrintStream";
    let mut class = new_class(PRINT_STREAM);
    default_constructor(&mut class, PUBLIC, OBJECT)?;

    let mut println_object = class.method(PUBLIC, "println", "(Ljava/lang/Object;)V");
    println_object
        .load(ValueKind::Reference, 0)
        .load(ValueKind::Reference, 1)
        .invoke(
            Opcode::Invokestatic,
            STRING,
            "valueOf",
            "(Ljava/lang/Object;)Ljava/lang/String;",
        )
        .invoke(Opcode::Invokevirtual, PRINT_STREAM, "println", "(Ljava/lang/String;)V")
        .op(Opcode::Return)
        .maxs(2, 2);
    println_object.finish()?;

    class
        .declare_method(PUBLIC_NATIVE, "println", "()V")
        .declare_method(PUBLIC_NATIVE, "println", "(Ljava/lang/String;)V")
        .declare_method(PUBLIC_NATIVE, "println", "(I)V")
        .declare_method(PUBLIC_NATIVE, "println", "(J)V")
        .declare_method(PUBLIC_NATIVE, "print", "(Ljava/lang/String;)V");
    Ok(class)
}

fn class_loader_class() -> FormatResult<ClassBuilder> {
    const CLASS_LOADER: &str = "java/lang/ClassLoader";
    let mut class = new_class(CLASS_LOADER);
    class
        .access(PUBLIC | AccessFlags::ABSTRACT | AccessFlags::SUPER)
        .field(AccessFlags::PRIVATE | AccessFlags::FINAL, "parent", "Ljava/lang/ClassLoader;");
    default_constructor(&mut class, AccessFlags::PROTECTED, OBJECT)?;

    let mut with_parent = class.method(AccessFlags::PROTECTED, "<init>", "(Ljava/lang/ClassLoader;)V");
    with_parent
        .load(ValueKind::Reference, 0)
        .invoke(Opcode::Invokespecial, OBJECT, "<init>", "()V")
        .load(ValueKind::Reference, 0)
        .load(ValueKind::Reference, 1)
        .field(Opcode::Putfield, CLASS_LOADER, "parent", "Ljava/lang/ClassLoader;")
        .op(Opcode::Return)
        .maxs(2, 2);
    with_parent.finish()?;

    let mut parent = class.method(PUBLIC, "getParent", "()Ljava/lang/ClassLoader;");
    parent
        .load(ValueKind::Reference, 0)
        .field(Opcode::Getfield, CLASS_LOADER, "parent", "Ljava/lang/ClassLoader;")
        .op(Opcode::Areturn)
        .maxs(1, 1);
    parent.finish()?;
    Ok(class)
}
