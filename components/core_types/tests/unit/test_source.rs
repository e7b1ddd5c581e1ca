//! Unit tests for stack trace elements

use core_types::{StackTraceElement, NATIVE_LINE};

#[test]
fn test_display_with_line() {
    let frame = StackTraceElement {
        class_name: "java/lang/Object".to_string(),
        method_name: "wait".to_string(),
        source_file: Some("Object.java".to_string()),
        line: 7,
    };
    assert_eq!(frame.to_string(), "java.lang.Object.wait(Object.java:7)");
    assert!(!frame.is_native());
}

#[test]
fn test_native_marker() {
    let frame = StackTraceElement {
        class_name: "java/lang/System".to_string(),
        method_name: "arraycopy".to_string(),
        source_file: None,
        line: NATIVE_LINE,
    };
    assert!(frame.is_native());
    assert!(frame.to_string().ends_with("(Native Method)"));
}
