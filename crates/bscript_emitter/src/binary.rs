//! The `BSBC` binary encoding.
//!
//! All integers are little-endian.
//!
//! ```text
//! file    = "BSBC" version:u16 module:u32 strings records
//! strings = count:u32 (len:u16 utf8-bytes)*
//! records = count:u32 record*
//! record  = 1 name:u32 count:u32 (name:u32 operand)*   struct
//!         | 2 name:u32 count:u32 name:u32*             enum
//!         | 3 name:u32 operand ordinal:u32             const
//! operand = 0 name:u32 | builtin-code:u8
//! ```

use bscript_ast::Builtin;

use crate::artifact::{BytecodeArtifact, Operand, Record, StringIndex};

pub const MAGIC: &[u8; 4] = b"BSBC";
pub const FORMAT_VERSION: u16 = 1;

const TAG_STRUCT: u8 = 1;
const TAG_ENUM: u8 = 2;
const TAG_CONST: u8 = 3;
const OPERAND_NAMED: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("not a bscript bytecode file")]
    BadMagic,
    #[error("unsupported bytecode version {0}")]
    UnsupportedVersion(u16),
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("string {index} is not valid UTF-8")]
    InvalidString { index: usize },
    #[error("string index {index} is out of range")]
    BadStringIndex { index: StringIndex },
    #[error("unknown record tag {tag} at offset {offset}")]
    UnknownRecord { tag: u8, offset: usize },
    #[error("unknown operand code {code} at offset {offset}")]
    UnknownOperand { code: u8, offset: usize },
    #[error("{count} trailing bytes after the last record")]
    TrailingBytes { count: usize },
}

impl BytecodeArtifact {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.strings.iter().map(|s| s.len() + 2).sum::<usize>());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        put_u32(&mut out, self.module);

        put_u32(&mut out, self.strings.len() as u32);
        for string in &self.strings {
            // Names longer than the prefix allows never get past the parser.
            let len = string.len().min(u16::MAX as usize);
            out.extend_from_slice(&(len as u16).to_le_bytes());
            out.extend_from_slice(&string.as_bytes()[..len]);
        }

        put_u32(&mut out, self.records.len() as u32);
        for record in &self.records {
            match record {
                Record::Struct { name, fields } => {
                    out.push(TAG_STRUCT);
                    put_u32(&mut out, *name);
                    put_u32(&mut out, fields.len() as u32);
                    for (field, ty) in fields {
                        put_u32(&mut out, *field);
                        put_operand(&mut out, *ty);
                    }
                }
                Record::Enum { name, variants } => {
                    out.push(TAG_ENUM);
                    put_u32(&mut out, *name);
                    put_u32(&mut out, variants.len() as u32);
                    for variant in variants {
                        put_u32(&mut out, *variant);
                    }
                }
                Record::Const { name, ty, ordinal } => {
                    out.push(TAG_CONST);
                    put_u32(&mut out, *name);
                    put_operand(&mut out, *ty);
                    put_u32(&mut out, *ordinal);
                }
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<BytecodeArtifact, DecodeError> {
        let mut reader = Reader { bytes, pos: 0 };
        if reader.take(MAGIC.len()).ok() != Some(&MAGIC[..]) {
            return Err(DecodeError::BadMagic);
        }
        let version = reader.u16()?;
        if version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let module = reader.u32()?;

        let string_count = reader.u32()? as usize;
        let mut strings = Vec::with_capacity(string_count.min(bytes.len() / 2));
        for index in 0..string_count {
            let len = reader.u16()? as usize;
            let raw = reader.take(len)?;
            let text = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidString { index })?;
            strings.push(text.to_string());
        }

        let record_count = reader.u32()? as usize;
        let mut records = Vec::with_capacity(record_count.min(bytes.len()));
        for _ in 0..record_count {
            let offset = reader.pos;
            let record = match reader.u8()? {
                TAG_STRUCT => {
                    let name = reader.u32()?;
                    let count = reader.u32()? as usize;
                    let mut fields = Vec::with_capacity(count.min(bytes.len()));
                    for _ in 0..count {
                        fields.push((reader.u32()?, reader.operand()?));
                    }
                    Record::Struct { name, fields }
                }
                TAG_ENUM => {
                    let name = reader.u32()?;
                    let count = reader.u32()? as usize;
                    let mut variants = Vec::with_capacity(count.min(bytes.len()));
                    for _ in 0..count {
                        variants.push(reader.u32()?);
                    }
                    Record::Enum { name, variants }
                }
                TAG_CONST => Record::Const {
                    name: reader.u32()?,
                    ty: reader.operand()?,
                    ordinal: reader.u32()?,
                },
                tag => return Err(DecodeError::UnknownRecord { tag, offset }),
            };
            records.push(record);
        }
        if reader.pos != bytes.len() {
            return Err(DecodeError::TrailingBytes {
                count: bytes.len() - reader.pos,
            });
        }

        let artifact = BytecodeArtifact { module, strings, records };
        artifact.check_string_indices()?;
        Ok(artifact)
    }

    fn check_string_indices(&self) -> Result<(), DecodeError> {
        let check = |index: StringIndex| {
            if (index as usize) < self.strings.len() {
                Ok(())
            } else {
                Err(DecodeError::BadStringIndex { index })
            }
        };
        let check_operand = |operand: Operand| match operand {
            Operand::Named(index) => check(index),
            Operand::Builtin(_) => Ok(()),
        };
        check(self.module)?;
        for record in &self.records {
            check(record.name())?;
            match record {
                Record::Struct { fields, .. } => {
                    for (name, ty) in fields {
                        check(*name)?;
                        check_operand(*ty)?;
                    }
                }
                Record::Enum { variants, .. } => {
                    for variant in variants {
                        check(*variant)?;
                    }
                }
                Record::Const { ty, .. } => check_operand(*ty)?,
            }
        }
        Ok(())
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_operand(out: &mut Vec<u8>, operand: Operand) {
    match operand {
        Operand::Builtin(builtin) => out.push(builtin.code()),
        Operand::Named(index) => {
            out.push(OPERAND_NAMED);
            put_u32(out, index);
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::UnexpectedEof { offset: self.pos })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn operand(&mut self) -> Result<Operand, DecodeError> {
        let offset = self.pos;
        match self.u8()? {
            OPERAND_NAMED => Ok(Operand::Named(self.u32()?)),
            code => Builtin::from_code(code)
                .map(Operand::Builtin)
                .ok_or(DecodeError::UnknownOperand { code, offset }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BytecodeArtifact {
        BytecodeArtifact {
            module: 0,
            strings: vec!["geo:Vec2".into(), "Vec2".into(), "x".into(), "y".into()],
            records: vec![Record::Struct {
                name: 1,
                fields: vec![(2, Operand::Builtin(Builtin::Float)), (3, Operand::Builtin(Builtin::Float))],
            }],
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample().encode();
        assert_eq!(&bytes[..4], b"BSBC");
        assert_eq!(&bytes[4..6], &FORMAT_VERSION.to_le_bytes());
        assert_eq!(&bytes[6..10], &0u32.to_le_bytes());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(BytecodeArtifact::decode(b"NOPE"), Err(DecodeError::BadMagic));

        let mut bytes = sample().encode();
        bytes[4] = 9;
        assert_eq!(BytecodeArtifact::decode(&bytes), Err(DecodeError::UnsupportedVersion(9)));

        let bytes = sample().encode();
        assert!(matches!(
            BytecodeArtifact::decode(&bytes[..bytes.len() - 1]),
            Err(DecodeError::UnexpectedEof { .. })
        ));

        let mut bytes = sample().encode();
        bytes.push(0);
        assert_eq!(BytecodeArtifact::decode(&bytes), Err(DecodeError::TrailingBytes { count: 1 }));
    }

    #[test]
    fn test_decode_checks_string_indices() {
        let mut artifact = sample();
        artifact.records.push(Record::Enum { name: 9, variants: vec![] });
        let bytes = artifact.encode();
        assert_eq!(
            BytecodeArtifact::decode(&bytes),
            Err(DecodeError::BadStringIndex { index: 9 })
        );
    }
}
