//! Stack trace elements.
//!
//! Backtraces captured for guest exceptions are lists of
//! [`StackTraceElement`], innermost frame first.

use std::fmt;

/// Line marker for frames executing a native method.
pub const NATIVE_LINE: i32 = -2;

/// Line marker for frames without line information.
pub const UNKNOWN_LINE: i32 = -1;

/// One frame of a captured backtrace.
///
/// # Examples
///
/// ```
/// use core_types::StackTraceElement;
///
/// let frame = StackTraceElement {
///     class_name: "demo/Main".to_string(),
///     method_name: "run".to_string(),
///     source_file: Some("Main.java".to_string()),
///     line: 12,
/// };
///
/// assert_eq!(frame.to_string(), "demo.Main.run(Main.java:12)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceElement {
    /// Internal (slash separated) class name
    pub class_name: String,
    /// Method name
    pub method_name: String,
    /// Source file attribute of the class, if present
    pub source_file: Option<String>,
    /// Line number, or [`NATIVE_LINE`] / [`UNKNOWN_LINE`]
    pub line: i32,
}

impl StackTraceElement {
    /// True when the frame was executing a native method.
    pub fn is_native(&self) -> bool {
        self.line == NATIVE_LINE
    }
}

impl fmt::Display for StackTraceElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}(",
            self.class_name.replace('/', "."),
            self.method_name
        )?;
        match (&self.source_file, self.line) {
            (_, NATIVE_LINE) => write!(f, "Native Method)"),
            (Some(file), line) if line >= 0 => write!(f, "{}:{})", file, line),
            (Some(file), _) => write!(f, "{})", file),
            (None, _) => write!(f, "Unknown Source)"),
        }
    }
}
