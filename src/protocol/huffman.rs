//! Huffman expansion for compressed dataflash reads
//!
//! The tree holds leaves only. Leaves are grouped by code length and the
//! per-length index points at the first leaf of each group, so a lookup scans
//! only codes of the current length.

use std::collections::HashMap;

use crate::core::{Error, Result};

/// Longest code the decoder accepts
pub const MAX_CODE_LEN: u8 = 32;

/// Decoded leaf value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    Byte(u8),
    /// End of stream sentinel
    Eof,
}

/// One leaf of the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HuffmanLeaf {
    pub code: u32,
    pub code_len: u8,
    pub value: Symbol,
}

/// Leaf table plus per-length index
#[derive(Debug, Clone)]
pub struct HuffmanTree {
    leaves: Vec<HuffmanLeaf>,
    len_index: Vec<Option<usize>>,
    max_code_len: u8,
}

impl HuffmanTree {
    /// Builds a tree from explicit leaves
    pub fn from_leaves(mut leaves: Vec<HuffmanLeaf>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(Error::invalid_argument("huffman tree has no leaves"));
        }
        for leaf in &leaves {
            if leaf.code_len == 0 || leaf.code_len > MAX_CODE_LEN {
                return Err(Error::invalid_argument(format!(
                    "huffman code length {} out of range",
                    leaf.code_len
                )));
            }
            if leaf.code_len < 32 && leaf.code >> leaf.code_len != 0 {
                return Err(Error::invalid_argument(format!(
                    "huffman code {:#x} wider than {} bits",
                    leaf.code, leaf.code_len
                )));
            }
        }
        leaves.sort_by_key(|l| (l.code_len, l.code));
        if leaves
            .windows(2)
            .any(|w| w[0].code_len == w[1].code_len && w[0].code == w[1].code)
        {
            return Err(Error::invalid_argument("duplicate huffman code"));
        }

        let max_code_len = leaves.iter().map(|l| l.code_len).max().unwrap_or(0);
        let mut len_index = vec![None; max_code_len as usize + 1];
        for (i, leaf) in leaves.iter().enumerate() {
            let slot = &mut len_index[leaf.code_len as usize];
            if slot.is_none() {
                *slot = Some(i);
            }
        }

        Ok(HuffmanTree {
            leaves,
            len_index,
            max_code_len,
        })
    }

    /// Builds a canonical tree from `(symbol, code length)` pairs
    pub fn canonical(lengths: &[(Symbol, u8)]) -> Result<Self> {
        let mut sorted: Vec<(Symbol, u8)> = lengths.to_vec();
        sorted.sort_by_key(|&(symbol, len)| (len, symbol));

        let mut leaves = Vec::with_capacity(sorted.len());
        let mut code: u64 = 0;
        let mut prev_len = 0u8;
        for (symbol, len) in sorted {
            if len == 0 || len > MAX_CODE_LEN {
                return Err(Error::invalid_argument(format!("huffman code length {} out of range", len)));
            }
            code <<= len - prev_len;
            if code >= 1u64 << len {
                return Err(Error::invalid_argument("huffman code lengths are over-subscribed"));
            }
            leaves.push(HuffmanLeaf {
                code: code as u32,
                code_len: len,
                value: symbol,
            });
            code += 1;
            prev_len = len;
        }
        HuffmanTree::from_leaves(leaves)
    }

    /// All leaves ordered by code length
    pub fn leaves(&self) -> &[HuffmanLeaf] {
        &self.leaves
    }

    fn lookup(&self, code: u32, code_len: u8) -> Option<Symbol> {
        let start = (*self.len_index.get(code_len as usize)?)?;
        self.leaves[start..]
            .iter()
            .take_while(|leaf| leaf.code_len == code_len)
            .find(|leaf| leaf.code == code)
            .map(|leaf| leaf.value)
    }

    /// Expands `input` into at most `char_count` bytes.
    ///
    /// Stops at the end-of-stream symbol or once `char_count` bytes have been
    /// produced; bits left after either are ignored. Running out of input
    /// before both is a malformed block.
    pub fn decode(&self, input: &[u8], char_count: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(char_count);
        let mut code: u32 = 0;
        let mut code_len: u8 = 0;

        for &byte in input {
            for shift in (0..8).rev() {
                if out.len() == char_count {
                    return Ok(out);
                }
                code = (code << 1) | ((byte >> shift) & 0x01) as u32;
                code_len += 1;
                if code_len > self.max_code_len {
                    return Err(Error::MalformedCompressedBlock {
                        produced: out.len(),
                        expected: char_count,
                    });
                }
                if let Some(symbol) = self.lookup(code, code_len) {
                    match symbol {
                        Symbol::Eof => return Ok(out),
                        Symbol::Byte(value) => out.push(value),
                    }
                    code = 0;
                    code_len = 0;
                }
            }
        }

        if out.len() == char_count {
            Ok(out)
        } else {
            Err(Error::MalformedCompressedBlock {
                produced: out.len(),
                expected: char_count,
            })
        }
    }

    /// Compresses `data`, optionally terminated by the end-of-stream symbol.
    ///
    /// Used to build device-side fixtures; the engine itself only decodes.
    pub fn encode(&self, data: &[u8], with_eof: bool) -> Result<Vec<u8>> {
        let table: HashMap<Symbol, (u32, u8)> = self
            .leaves
            .iter()
            .map(|leaf| (leaf.value, (leaf.code, leaf.code_len)))
            .collect();

        let mut out = Vec::new();
        let mut current = 0u8;
        let mut filled = 0u8;
        let symbols = data
            .iter()
            .map(|&b| Symbol::Byte(b))
            .chain(with_eof.then_some(Symbol::Eof));
        for symbol in symbols {
            let &(code, len) = table
                .get(&symbol)
                .ok_or_else(|| Error::invalid_argument(format!("no huffman code for {:?}", symbol)))?;
            for bit in (0..len).rev() {
                current = (current << 1) | ((code >> bit) & 0x01) as u8;
                filled += 1;
                if filled == 8 {
                    out.push(current);
                    current = 0;
                    filled = 0;
                }
            }
        }
        if filled > 0 {
            out.push(current << (8 - filled));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// a=0, b=10, c=110, EOF=111
    fn small_tree() -> HuffmanTree {
        HuffmanTree::canonical(&[
            (Symbol::Byte(b'a'), 1),
            (Symbol::Byte(b'b'), 2),
            (Symbol::Byte(b'c'), 3),
            (Symbol::Eof, 3),
        ])
        .unwrap()
    }

    #[test]
    fn test_canonical_codes() {
        let tree = small_tree();
        let codes: Vec<(u32, u8)> = tree.leaves().iter().map(|l| (l.code, l.code_len)).collect();
        assert_eq!(codes, vec![(0b0, 1), (0b10, 2), (0b110, 3), (0b111, 3)]);
    }

    #[test]
    fn test_decode_known_block() {
        let tree = small_tree();
        // a b c a -> 0 10 110 0, then EOF 111, padded
        let input = [0b0101_1001, 0b1100_0000];
        assert_eq!(tree.decode(&input, 4).unwrap(), b"abca");
    }

    #[test]
    fn test_eof_ignores_trailing_bits() {
        let tree = small_tree();
        // b EOF then junk that would decode to more symbols
        let input = [0b1011_1000, 0b0000_0000];
        assert_eq!(tree.decode(&input, 10).unwrap(), b"b");
    }

    #[test]
    fn test_char_count_stops_early() {
        let tree = small_tree();
        let input = tree.encode(b"abcabc", false).unwrap();
        assert_eq!(tree.decode(&input, 3).unwrap(), b"abc");
    }

    #[test]
    fn test_exhausted_input_is_malformed() {
        let tree = small_tree();
        // c c then two zero padding bits that read as a a
        let input = tree.encode(b"cc", false).unwrap();
        assert_eq!(input, vec![0b1101_1000]);
        match tree.decode(&input, 10) {
            Err(Error::MalformedCompressedBlock { produced, expected }) => {
                assert_eq!(produced, 4);
                assert_eq!(expected, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encode_decode_text() {
        let mut lengths: Vec<(Symbol, u8)> = (0u8..=255).map(|b| (Symbol::Byte(b), 9)).collect();
        lengths.push((Symbol::Eof, 9));
        let tree = HuffmanTree::canonical(&lengths).unwrap();
        let text = b"blackbox log header\n";
        let packed = tree.encode(text, true).unwrap();
        assert_eq!(tree.decode(&packed, text.len()).unwrap(), text);
    }

    #[test]
    fn test_rejects_bad_leaves() {
        assert!(HuffmanTree::from_leaves(vec![]).is_err());
        let wide = HuffmanLeaf { code: 0b100, code_len: 2, value: Symbol::Eof };
        assert!(HuffmanTree::from_leaves(vec![wide]).is_err());
        assert!(HuffmanTree::canonical(&[
            (Symbol::Byte(1), 1),
            (Symbol::Byte(2), 1),
            (Symbol::Byte(3), 1),
        ])
        .is_err());
    }
}
