use std::sync::Arc;

use bytecode_system::{AccessFlags, ClassBuilder, ConstantValue, Opcode};
use class_linker::{
    boot_image, ClassLinker, ClassSource, FieldConstant, FieldKind, InitAction, LinkError,
    LoaderId, MemoryClassSource, ObjectKind,
};
use core_types::{Value, VmError};
use memory_manager::{HeapConfig, SimpleAllocator};

use super::linker_with;

fn returning(class: &mut ClassBuilder, name: &str, value: i32) {
    let mut method = class.method(AccessFlags::PUBLIC, name, "()I");
    method.iconst(value).op(Opcode::Ireturn).maxs(1, 1);
    method.finish().unwrap();
}

fn hierarchy() -> Vec<ClassBuilder> {
    let mut a = ClassBuilder::new("t/A");
    a.field(AccessFlags::PUBLIC, "a", "I")
        .field(AccessFlags::PUBLIC, "r", "Ljava/lang/Object;");
    returning(&mut a, "m", 1);
    returning(&mut a, "n", 2);

    let mut b = ClassBuilder::new("t/B");
    b.extends(Some("t/A")).field(AccessFlags::PUBLIC, "b", "J");
    returning(&mut b, "m", 10);

    let mut c = ClassBuilder::new("t/C");
    c.extends(Some("t/B")).field(AccessFlags::PUBLIC, "c", "B");
    returning(&mut c, "n", 20);

    let mut i = ClassBuilder::new("t/I");
    i.interface()
        .declare_method(AccessFlags::PUBLIC | AccessFlags::ABSTRACT, "i", "()I");

    vec![a, b, c, i]
}

#[test]
fn test_bootstrap_gives_every_class_a_mirror() {
    let linker = linker_with(vec![]);
    let class_class = linker.class_class().unwrap();
    for class in linker.classes() {
        let mirror = class.mirror().expect("mirror");
        assert_eq!(linker.mirror_target(mirror).unwrap().id(), class.id());
        assert_eq!(linker.class_of(mirror).unwrap().id(), class_class.id());
    }
    assert!(linker.primitive_class("int").is_some());
    assert!(linker.primitive_class("void").is_some());
}

#[test]
fn test_bootstrap_without_object_fails() {
    let heap = Arc::new(SimpleAllocator::new(HeapConfig::default()));
    let linker = ClassLinker::new(heap, Arc::new(MemoryClassSource::new()));
    assert_eq!(
        linker.bootstrap(),
        Err(LinkError::Vm(VmError::MissingBootClass(
            "java/lang/Object".to_string()
        )))
    );
}

#[test]
fn test_inherited_offsets_are_stable() {
    let linker = linker_with(hierarchy());
    let a = linker.load_class(LoaderId::BOOT, "t/A").unwrap();
    let c = linker.load_class(LoaderId::BOOT, "t/C").unwrap();

    let (holder, field) = c.find_field("a", "I").unwrap();
    assert_eq!(holder.name(), "t/A");
    assert_eq!(field.offset(), a.declared_field("a").unwrap().offset());
    assert_eq!(field.offset(), 8);
    assert_eq!(a.declared_field("r").unwrap().offset(), 16);

    let (_, b_field) = c.find_field("b", "J").unwrap();
    assert_eq!(b_field.offset(), 24);
    assert_eq!(c.declared_field("c").unwrap().offset(), 32);
    assert_eq!(c.instance_size(), 33);
    assert_eq!(c.reference_offsets(), &[16]);
}

#[test]
fn test_vtable_overrides_follow_hierarchy() {
    let linker = linker_with(hierarchy());
    let object = linker.object_class().unwrap();
    let a = linker.load_class(LoaderId::BOOT, "t/A").unwrap();
    let c = linker.load_class(LoaderId::BOOT, "t/C").unwrap();
    let base = object.vtable().len();

    let m = a.declared_method("m", "()I").unwrap();
    let n = a.declared_method("n", "()I").unwrap();
    assert_eq!(m.vtable_index(), Some(base));
    assert_eq!(n.vtable_index(), Some(base + 1));
    assert_eq!(c.vtable().len(), base + 2);

    assert_eq!(linker.select_method(&c, m).unwrap().class_name(), "t/B");
    assert_eq!(linker.select_method(&c, n).unwrap().class_name(), "t/C");
    assert_eq!(linker.select_method(&a, n).unwrap().class_name(), "t/A");
}

#[test]
fn test_array_classes_are_unique() {
    let linker = linker_with(vec![]);
    let first = linker.load_class(LoaderId::BOOT, "[I").unwrap();
    let second = linker.load_class(LoaderId::BOOT, "[I").unwrap();
    let int = linker.primitive_class("int").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &linker.array_class_of(&int).unwrap()));
    assert_eq!(first.element_kind(), Some(FieldKind::Int));
    assert!(first.mirror().is_some());

    let nested = linker
        .load_class(LoaderId::BOOT, "[[Ljava/lang/String;")
        .unwrap();
    let component = nested.component().unwrap();
    assert_eq!(component.name(), "[Ljava/lang/String;");
    assert_eq!(component.component().unwrap().name(), "java/lang/String");
}

#[test]
fn test_array_assignability() {
    let linker = linker_with(vec![]);
    let strings = linker.load_class(LoaderId::BOOT, "[Ljava/lang/String;").unwrap();
    let objects = linker.load_class(LoaderId::BOOT, "[Ljava/lang/Object;").unwrap();
    let ints = linker.load_class(LoaderId::BOOT, "[I").unwrap();
    let object = linker.object_class().unwrap();
    let cloneable = linker.load_class(LoaderId::BOOT, "java/lang/Cloneable").unwrap();

    assert!(strings.is_assignable_to(&objects));
    assert!(!objects.is_assignable_to(&strings));
    assert!(!ints.is_assignable_to(&objects));
    assert!(ints.is_assignable_to(&object));
    assert!(ints.is_assignable_to(&cloneable));
}

#[test]
fn test_missing_class_failure_is_cached() {
    let linker = linker_with(vec![]);
    let first = linker.load_class(LoaderId::BOOT, "t/Missing").unwrap_err();
    assert_eq!(first, LinkError::ClassNotFound("t/Missing".to_string()));
    let second = linker.load_class(LoaderId::BOOT, "t/Missing").unwrap_err();
    assert_eq!(first, second);
}

#[test]
fn test_interface_superclass_is_rejected() {
    let mut bad = ClassBuilder::new("t/Bad");
    bad.extends(Some("t/I"));
    let mut classes = hierarchy();
    classes.push(bad);
    let linker = linker_with(classes);

    let error = linker.load_class(LoaderId::BOOT, "t/Bad").unwrap_err();
    assert!(matches!(error, LinkError::IncompatibleClassChange(_)));
    assert_eq!(error.guest_class(), Some("java/lang/IncompatibleClassChangeError"));
    assert_eq!(linker.load_class(LoaderId::BOOT, "t/Bad").unwrap_err(), error);
}

#[test]
fn test_circular_superclasses() {
    let mut x = ClassBuilder::new("t/X");
    x.extends(Some("t/Y"));
    let mut y = ClassBuilder::new("t/Y");
    y.extends(Some("t/X"));
    let linker = linker_with(vec![x, y]);

    let error = linker.load_class(LoaderId::BOOT, "t/X").unwrap_err();
    assert!(matches!(error, LinkError::Circularity(_)));
    assert!(linker.load_class(LoaderId::BOOT, "t/Y").is_err());
}

#[test]
fn test_wrong_name_and_garbage() {
    let heap = Arc::new(SimpleAllocator::new(HeapConfig::default()));
    let image = boot_image().unwrap();
    image.insert("t/Alias", ClassBuilder::new("t/Real").to_bytes());
    image.insert("t/Garbage", vec![1, 2, 3]);
    let linker = ClassLinker::new(heap, Arc::new(image));
    linker.bootstrap().unwrap();

    assert_eq!(
        linker.load_class(LoaderId::BOOT, "t/Alias").unwrap_err(),
        LinkError::WrongName {
            expected: "t/Alias".to_string(),
            found: "t/Real".to_string()
        }
    );
    assert!(matches!(
        linker.load_class(LoaderId::BOOT, "t/Garbage"),
        Err(LinkError::Format { .. })
    ));
}

#[test]
fn test_define_class_once() {
    let linker = linker_with(vec![]);
    let bytes = ClassBuilder::new("t/Dyn").to_bytes();
    let defined = linker.define_class(LoaderId::BOOT, &bytes).unwrap();
    let loaded = linker.load_class(LoaderId::BOOT, "t/Dyn").unwrap();
    assert!(Arc::ptr_eq(&defined, &loaded));
    assert_eq!(
        linker.define_class(LoaderId::BOOT, &bytes).unwrap_err(),
        LinkError::Duplicate("t/Dyn".to_string())
    );
}

#[test]
fn test_guest_loader_delegates_to_boot() {
    let linker = linker_with(vec![]);
    let loader_class = linker
        .load_class(LoaderId::BOOT, "java/lang/ClassLoader")
        .unwrap();
    let loader_object = linker.allocate_instance(&loader_class).unwrap().unwrap();

    let app = Arc::new(MemoryClassSource::new());
    app.insert("app/Main", ClassBuilder::new("app/Main").to_bytes());
    let data = linker.register_loader(loader_object.clone(), Some(app.clone() as Arc<dyn ClassSource>));

    let main = linker.load_class(data.id(), "app/Main").unwrap();
    assert_eq!(main.loader(), data.id());
    assert!(Arc::ptr_eq(
        main.super_class().unwrap(),
        &linker.object_class().unwrap()
    ));
    assert!(linker.load_class(LoaderId::BOOT, "app/Main").is_err());

    let class_class = linker.class_class().unwrap();
    let field = class_class.declared_field("classLoader").unwrap();
    let mirror = main.mirror().unwrap();
    assert_eq!(
        linker.read_field(mirror, field).unwrap(),
        Value::Reference(loader_object)
    );
}

#[test]
fn test_statics_live_in_the_mirror() {
    let mut holder = ClassBuilder::new("t/S");
    holder
        .field(AccessFlags::PUBLIC | AccessFlags::STATIC, "count", "I")
        .field(AccessFlags::PUBLIC | AccessFlags::STATIC, "name", "Ljava/lang/String;")
        .constant_field(AccessFlags::PUBLIC | AccessFlags::FINAL, "K", "I", ConstantValue::Int(7));
    let linker = linker_with(vec![holder]);
    let class = linker.load_class(LoaderId::BOOT, "t/S").unwrap();

    let count = class.declared_field("count").unwrap();
    assert!(count.is_static());
    assert_eq!(linker.read_static(&class, count).unwrap(), Value::Int(0));
    linker.write_static(&class, count, &Value::Int(5)).unwrap();
    assert_eq!(linker.read_static(&class, count).unwrap(), Value::Int(5));

    assert_eq!(class.static_reference_offsets().len(), 1);
    let constant = class.declared_field("K").unwrap();
    assert_eq!(constant.constant(), Some(&FieldConstant::Int(7)));
}

#[test]
fn test_allocation_writes_headers() {
    let linker = linker_with(hierarchy());
    let a = linker.load_class(LoaderId::BOOT, "t/A").unwrap();
    let object = linker.allocate_instance(&a).unwrap().unwrap();
    assert_eq!(class_linker::object_model::object_kind(&object), Ok(ObjectKind::Instance));
    assert_eq!(linker.class_of(&object).unwrap().id(), a.id());

    let longs = linker.load_class(LoaderId::BOOT, "[J").unwrap();
    let array = linker.allocate_array(&longs, 3).unwrap().unwrap();
    assert_eq!(class_linker::object_model::array_length(&array), Ok(3));
    assert_eq!(array.block().size(), 16 + 3 * 8);

    assert!(linker.allocate_array(&a, 1).is_err());
    assert!(linker.allocate_instance(&longs).is_err());
}

#[test]
fn test_initialization_state_machine() {
    let linker = linker_with(hierarchy());
    let a = linker.load_class(LoaderId::BOOT, "t/A").unwrap();

    assert_eq!(a.begin_initialization(1), InitAction::Run);
    assert_eq!(a.begin_initialization(1), InitAction::Recursive);
    assert_eq!(a.begin_initialization(2), InitAction::Wait);

    std::thread::scope(|scope| {
        let waiter = scope.spawn(|| a.wait_for_initialization());
        a.finish_initialization(true);
        assert_eq!(waiter.join().unwrap(), InitAction::Done);
    });
    assert_eq!(a.begin_initialization(2), InitAction::Done);

    let b = linker.load_class(LoaderId::BOOT, "t/B").unwrap();
    assert_eq!(b.begin_initialization(1), InitAction::Run);
    b.finish_initialization(false);
    assert_eq!(b.begin_initialization(2), InitAction::Erroneous);
}
