//! Text assembly listing of a bytecode artifact.

use std::fmt::Write;

use crate::artifact::{BytecodeArtifact, Record};

impl BytecodeArtifact {
    /// Render the artifact as a human-readable listing:
    ///
    /// ```text
    /// .module geo:Shape
    /// .strings 5
    /// .struct Shape
    ///     .field origin geo:Vec2
    /// .end
    /// .enum Kind
    ///     .variant Circle 0
    /// .end
    /// .const Default geo:Kind 0
    /// ```
    pub fn to_assembly(&self) -> String {
        let mut out = String::new();
        let name = |index| self.string(index).unwrap_or("?");
        let _ = writeln!(out, ".module {}", self.module_name());
        let _ = writeln!(out, ".strings {}", self.strings.len());
        for record in &self.records {
            match record {
                Record::Struct { name: type_name, fields } => {
                    let _ = writeln!(out, ".struct {}", name(*type_name));
                    for (field, ty) in fields {
                        let _ = writeln!(out, "    .field {} {}", name(*field), self.operand_text(*ty));
                    }
                    out.push_str(".end\n");
                }
                Record::Enum { name: type_name, variants } => {
                    let _ = writeln!(out, ".enum {}", name(*type_name));
                    for (ordinal, variant) in variants.iter().enumerate() {
                        let _ = writeln!(out, "    .variant {} {}", name(*variant), ordinal);
                    }
                    out.push_str(".end\n");
                }
                Record::Const { name: const_name, ty, ordinal } => {
                    let _ = writeln!(out, ".const {} {} {}", name(*const_name), self.operand_text(*ty), ordinal);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Operand;
    use bscript_ast::Builtin;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_listing() {
        let artifact = BytecodeArtifact {
            module: 0,
            strings: ["geo:Shape", "Shape", "size", "geo:Kind", "Kind", "Circle", "Square", "Default"]
                .map(String::from)
                .to_vec(),
            records: vec![
                Record::Struct {
                    name: 1,
                    fields: vec![(2, Operand::Builtin(Builtin::Int))],
                },
                Record::Enum { name: 4, variants: vec![5, 6] },
                Record::Const { name: 7, ty: Operand::Named(3), ordinal: 1 },
            ],
        };
        assert_eq!(
            artifact.to_assembly(),
            "\
.module geo:Shape
.strings 8
.struct Shape
    .field size int
.end
.enum Kind
    .variant Circle 0
    .variant Square 1
.end
.const Default geo:Kind 1
"
        );
    }
}
