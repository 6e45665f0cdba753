//! Dataflash block reads

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::{Error, Result};
use crate::messages::storage::{encode_dataflash_read_request, parse_dataflash_read, DataflashBlock};
use crate::protocol::huffman::HuffmanTree;
use crate::protocol::message as codes;
use super::EngineHandle;

impl EngineHandle {
    /// Reads up to `block_size` bytes of flash at `address`.
    ///
    /// With a tree the controller may compress the block and it is expanded
    /// here; without one compression is not offered. A reply for another
    /// address is a protocol error and the caller should read again.
    pub async fn read_dataflash(&self, address: u32, block_size: u16, tree: Option<&HuffmanTree>) -> Result<DataflashBlock> {
        let version = self.api_version();
        let request = encode_dataflash_read_request(version, address, block_size, tree.is_some());
        let frame = self.submit(codes::DATAFLASH_READ, request).await?;
        let block = parse_dataflash_read(version, &frame.payload, tree)?;
        if block.address != address {
            warn!(requested = address, received = block.address, "Dataflash reply for another address");
            return Err(Error::protocol(format!(
                "dataflash reply for address {:#x}, requested {:#x}",
                block.address, address
            )));
        }
        debug!(address, bytes = block.data.len(), compressed = block.compressed, "Read dataflash block");
        Ok(block)
    }

    /// Starts a full chip erase
    pub async fn erase_dataflash(&self) -> Result<()> {
        self.submit(codes::DATAFLASH_ERASE, Bytes::new()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::core::EngineConfig;
    use crate::messages::storage::COMPRESSION_HUFFMAN;
    use crate::protocol::huffman::Symbol;

    fn tree() -> HuffmanTree {
        HuffmanTree::canonical(&[
            (Symbol::Byte(b'a'), 1),
            (Symbol::Byte(b'b'), 2),
            (Symbol::Byte(b'c'), 3),
            (Symbol::Eof, 3),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_compressed_read() {
        let (handle, mut device, _task) = connect(EngineConfig::default());
        handshake(&handle, &mut device, 1, 41).await;

        let read = {
            let handle = handle.clone();
            tokio::spawn(async move {
                let tree = tree();
                handle.read_dataflash(0x1000, 4096, Some(&tree)).await
            })
        };
        let request = expect_request(&mut device).await;
        assert_eq!(&request.payload[..], &[0x00, 0x10, 0, 0, 0x00, 0x10, COMPRESSION_HUFFMAN]);

        let raw = b"abacab";
        let compressed = tree().encode(raw, true).unwrap();
        let mut reply = 0x1000u32.to_le_bytes().to_vec();
        reply.extend(((compressed.len() + 2) as u16).to_le_bytes());
        reply.push(COMPRESSION_HUFFMAN);
        reply.extend((raw.len() as u16).to_le_bytes());
        reply.extend(&compressed);
        respond(&mut device, codes::DATAFLASH_READ, &reply).await;

        let block = read.await.unwrap().unwrap();
        assert_eq!(&block.data[..], raw);
        assert!(block.compressed);
    }

    #[tokio::test]
    async fn test_address_mismatch_is_rejected() {
        let (handle, mut device, _task) = connect(EngineConfig::default());
        handshake(&handle, &mut device, 1, 30).await;

        let read = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.read_dataflash(0x200, 128, None).await })
        };
        let request = expect_request(&mut device).await;
        assert_eq!(request.payload.len(), 4);
        let mut reply = 0x100u32.to_le_bytes().to_vec();
        reply.extend([1, 2, 3]);
        respond(&mut device, codes::DATAFLASH_READ, &reply).await;

        assert!(matches!(read.await.unwrap(), Err(Error::Protocol(_))));
    }
}
