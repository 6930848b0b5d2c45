//! TOON 文本格式
//!
//! ```text
//! TOON
//! version: 1
//!
//! File: src/main/java/com/example/A.java
//! Class: com.example.A
//! Parent: null
//! Methods:
//!       - method: run
//!         visibility: public
//!         ...
//!         calledBy: []
//! ```

use std::io::{self, Write};

use super::{ClassReport, MethodReport, REPORT_VERSION};

pub const INDENT_METHOD: &str = "      ";
pub const INDENT_FIELD: &str = "        ";
pub const INDENT_LIST_ITEM: &str = "          - ";

pub fn write_header<W: Write>(w: &mut W) -> io::Result<()> {
    write!(w, "TOON\nversion: {REPORT_VERSION}\n\n")
}

/// One class block: header lines, each method followed by a blank line, then a closing blank line.
pub fn write_class<W: Write>(w: &mut W, class: &ClassReport) -> io::Result<()> {
    writeln!(w, "File: {}", class.file)?;
    writeln!(w, "Class: {}", class.class)?;
    writeln!(w, "Parent: {}", class.parent)?;
    writeln!(w, "Methods:")?;
    for method in &class.methods {
        write_method(w, method)?;
    }
    writeln!(w)
}

fn write_method<W: Write>(w: &mut W, m: &MethodReport) -> io::Result<()> {
    writeln!(w, "{INDENT_METHOD}- method: {}", m.method)?;
    writeln!(w, "{INDENT_FIELD}visibility: {}", m.visibility.as_str())?;
    writeln!(w, "{INDENT_FIELD}signature: {}", m.signature)?;
    write_list(w, "annotations", &m.annotations)?;
    write_list(w, "throws", &m.throws)?;
    writeln!(w, "{INDENT_FIELD}complexity: {}", m.complexity)?;
    writeln!(w, "{INDENT_FIELD}cost: {}", m.cost)?;
    write_list(w, "calls", &m.calls)?;
    write_list(w, "calledBy", &m.called_by)?;
    writeln!(w)
}

fn write_list<W: Write>(w: &mut W, name: &str, values: &[String]) -> io::Result<()> {
    if values.is_empty() {
        return writeln!(w, "{INDENT_FIELD}{name}: []");
    }
    writeln!(w, "{INDENT_FIELD}{name}:")?;
    for value in values {
        writeln!(w, "{INDENT_LIST_ITEM}{value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CostLevel, Visibility};
    use pretty_assertions::assert_eq;

    fn render(classes: &[ClassReport]) -> String {
        let mut out = Vec::new();
        write_header(&mut out).unwrap();
        for class in classes {
            write_class(&mut out, class).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_header_only() {
        assert_eq!(render(&[]), "TOON\nversion: 1\n\n");
    }

    #[test]
    fn test_block_layout() {
        let class = ClassReport {
            file: "src/com/example/UserDao.java".to_string(),
            class: "com.example.UserDao".to_string(),
            parent: "BaseDao".to_string(),
            methods: vec![MethodReport {
                method: "load".to_string(),
                visibility: Visibility::Public,
                signature: "public User load(String id) throws SQLException".to_string(),
                annotations: vec!["@Override".to_string()],
                throws: vec!["SQLException".to_string()],
                complexity: 4,
                cost: CostLevel::Critical,
                calls: Vec::new(),
                called_by: vec![
                    "com.example.UserService#find/1".to_string(),
                    "com.example.UserService#get/1".to_string(),
                ],
            }],
        };

        let expected = "TOON
version: 1

File: src/com/example/UserDao.java
Class: com.example.UserDao
Parent: BaseDao
Methods:
      - method: load
        visibility: public
        signature: public User load(String id) throws SQLException
        annotations:
          - @Override
        throws:
          - SQLException
        complexity: 4
        cost: CRITICAL
        calls: []
        calledBy:
          - com.example.UserService#find/1
          - com.example.UserService#get/1


";
        assert_eq!(render(&[class]), expected);
    }
}
