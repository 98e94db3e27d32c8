//! Word-level SPIR-V module container.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::ParseError;

const MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;

/// A SPIR-V module held as its word stream, plus the decoded header.
#[derive(Clone, Debug)]
pub struct Module {
    pub words: Vec<u32>,
    pub version: (u8, u8),
    pub bound: u32,
}

/// One instruction inside a module's word stream.
#[derive(Copy, Clone, Debug)]
pub struct RawInstruction<'m> {
    pub opcode: u16,
    /// Word offset of the opcode word within the module.
    pub offset: usize,
    /// Operand words, excluding the leading opcode/word-count word.
    pub operands: &'m [u32],
}

impl Module {
    /// Decodes a byte buffer, handling either endianness by the magic
    /// number's byte order.
    pub fn from_bytes(data: &[u8]) -> Result<Module, ParseError> {
        if data.len() < HEADER_WORDS * 4 || data.len() % 4 != 0 {
            return Err(ParseError::MissingHeader);
        }

        let words: Vec<u32> = if LittleEndian::read_u32(data) == MAGIC {
            data.chunks_exact(4).map(LittleEndian::read_u32).collect()
        } else if BigEndian::read_u32(data) == MAGIC {
            data.chunks_exact(4).map(BigEndian::read_u32).collect()
        } else {
            return Err(ParseError::WrongHeader);
        };

        Self::from_words(words)
    }

    pub fn from_words(words: Vec<u32>) -> Result<Module, ParseError> {
        if words.len() < HEADER_WORDS {
            return Err(ParseError::MissingHeader);
        }
        if words[0] != MAGIC {
            return Err(ParseError::WrongHeader);
        }

        let version = (
            ((words[1] & 0x00ff_0000) >> 16) as u8,
            ((words[1] & 0x0000_ff00) >> 8) as u8,
        );
        let bound = words[3];

        Ok(Module {
            words,
            version,
            bound,
        })
    }

    /// The module as native-endian bytes, e.g. for shader-module creation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.words.len() * 4];
        for (chunk, &word) in bytes.chunks_exact_mut(4).zip(self.words.iter()) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        bytes
    }

    /// Iterates the instruction stream after the header.
    pub fn instructions(&self) -> InstructionIter<'_> {
        InstructionIter {
            words: &self.words,
            offset: HEADER_WORDS,
        }
    }
}

pub struct InstructionIter<'m> {
    words: &'m [u32],
    offset: usize,
}

impl<'m> Iterator for InstructionIter<'m> {
    type Item = Result<RawInstruction<'m>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.words.len() {
            return None;
        }
        let first = self.words[self.offset];
        let word_count = (first >> 16) as usize;
        let opcode = (first & 0xffff) as u16;
        if word_count == 0 || self.offset + word_count > self.words.len() {
            self.offset = self.words.len();
            return Some(Err(ParseError::IncompleteInstruction));
        }
        let inst = RawInstruction {
            opcode,
            offset: self.offset,
            operands: &self.words[self.offset + 1..self.offset + word_count],
        };
        self.offset += word_count;
        Some(Ok(inst))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A minimal assembler for building test modules.

    pub struct Assembler {
        words: Vec<u32>,
        next_id: u32,
    }

    impl Assembler {
        pub fn new() -> Self {
            Assembler {
                // magic, version 1.0, generator 0, bound (patched later), schema 0
                words: vec![super::MAGIC, 0x0001_0000, 0, 0, 0],
                next_id: 1,
            }
        }

        pub fn id(&mut self) -> u32 {
            let id = self.next_id;
            self.next_id += 1;
            id
        }

        pub fn inst(&mut self, opcode: u16, operands: &[u32]) {
            self.words.push(((operands.len() as u32 + 1) << 16) | u32::from(opcode));
            self.words.extend_from_slice(operands);
        }

        /// Encodes a string operand (nul-terminated, little-endian packed).
        pub fn string_operand(text: &str) -> Vec<u32> {
            let mut bytes: Vec<u8> = text.as_bytes().to_vec();
            bytes.push(0);
            while bytes.len() % 4 != 0 {
                bytes.push(0);
            }
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }

        pub fn finish(mut self) -> super::Module {
            self.words[3] = self.next_id;
            super::Module::from_words(self.words).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        assert_eq!(
            Module::from_words(vec![0xdead_beef, 0, 0, 0, 0]).unwrap_err(),
            ParseError::WrongHeader
        );
    }

    #[test]
    fn decodes_either_endianness() {
        let mut asm = test_support::Assembler::new();
        asm.inst(19, &[1]); // OpTypeVoid %1
        let module = asm.finish();

        let le_bytes = module.to_bytes();
        let be_bytes: Vec<u8> = le_bytes
            .chunks_exact(4)
            .flat_map(|c| [c[3], c[2], c[1], c[0]])
            .collect();

        let from_le = Module::from_bytes(&le_bytes).unwrap();
        let from_be = Module::from_bytes(&be_bytes).unwrap();
        assert_eq!(from_le.words, from_be.words);
        assert_eq!(from_le.version, (1, 0));
    }

    #[test]
    fn iterates_instructions() {
        let mut asm = test_support::Assembler::new();
        let void = asm.id();
        asm.inst(19, &[void]); // OpTypeVoid
        let module = asm.finish();

        let insts: Vec<_> = module.instructions().map(|i| i.unwrap()).collect();
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].opcode, 19);
        assert_eq!(insts[0].operands, &[void]);
    }
}
