//! End-to-end behaviour of the engine over an in-memory link

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use msp_engine::protocol::huffman::{HuffmanTree, Symbol};
use msp_engine::protocol::message as codes;
use msp_engine::{ApiVersion, DeviceState, Engine, EngineConfig, EngineHandle, Error, Frame, MspCodec, Result};

type Device = Framed<DuplexStream, MspCodec>;

/// Code with no registered decoder; replies come back as raw frames
const RAW_CODE: u16 = 199;

fn connect(config: EngineConfig) -> (EngineHandle, Device, JoinHandle<Result<()>>) {
    let (client, device) = tokio::io::duplex(4096);
    let (handle, task) = Engine::spawn(client, config).unwrap();
    (handle, Framed::new(device, MspCodec::new()), task)
}

fn spawn_submit(handle: &EngineHandle, code: u16, payload: Vec<u8>) -> JoinHandle<Result<Frame>> {
    let handle = handle.clone();
    tokio::spawn(async move { handle.submit(code, payload).await })
}

async fn reply(device: &mut Device, code: u16, payload: &[u8]) {
    device.send(Frame::response(code, payload.to_vec())).await.unwrap();
}

async fn wait_for_pending(handle: &EngineHandle, count: usize) {
    while handle.pending().await.unwrap().len() < count {
        tokio::task::yield_now().await;
    }
}

async fn handshake(handle: &EngineHandle, device: &mut Device, minor: u8) {
    let pending = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.handshake().await })
    };
    let request = device.next().await.unwrap().unwrap();
    assert_eq!(request.code, codes::API_VERSION);
    reply(device, codes::API_VERSION, &[0, 1, minor]).await;
    pending.await.unwrap().unwrap();
}

#[tokio::test]
async fn replies_resolve_oldest_request_first() {
    let (handle, mut device, _task) = connect(EngineConfig::default());
    let first = spawn_submit(&handle, RAW_CODE, vec![1]);
    wait_for_pending(&handle, 1).await;
    let second = spawn_submit(&handle, RAW_CODE, vec![2]);
    wait_for_pending(&handle, 2).await;

    assert_eq!(&device.next().await.unwrap().unwrap().payload[..], &[1]);
    assert_eq!(&device.next().await.unwrap().unwrap().payload[..], &[2]);
    reply(&mut device, RAW_CODE, &[0xA1]).await;
    reply(&mut device, RAW_CODE, &[0xB2]).await;

    assert_eq!(&first.await.unwrap().unwrap().payload[..], &[0xA1]);
    assert_eq!(&second.await.unwrap().unwrap().payload[..], &[0xB2]);
}

#[tokio::test]
async fn identical_requests_are_suppressed() {
    let (handle, mut device, _task) = connect(EngineConfig::default());
    let first = spawn_submit(&handle, RAW_CODE, vec![7, 7]);
    wait_for_pending(&handle, 1).await;

    let err = handle.submit(RAW_CODE, vec![7u8, 7]).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateRequest { code: RAW_CODE }));
    assert_eq!(handle.pending().await.unwrap().len(), 1);

    device.next().await.unwrap().unwrap();
    reply(&mut device, RAW_CODE, &[]).await;
    first.await.unwrap().unwrap();

    // the same request is accepted again once the first completed
    let again = spawn_submit(&handle, RAW_CODE, vec![7, 7]);
    device.next().await.unwrap().unwrap();
    reply(&mut device, RAW_CODE, &[]).await;
    again.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_is_sent_max_attempts_times() {
    let config = EngineConfig::default();
    let max_attempts = config.max_attempts;
    let (handle, mut device, _task) = connect(config);

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    tokio::spawn(async move {
        while let Some(Ok(frame)) = device.next().await {
            assert_eq!(frame.code, RAW_CODE);
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let err = handle.submit(RAW_CODE, Bytes::new()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { code: RAW_CODE, attempts } if attempts == max_attempts));
    assert_eq!(seen.load(Ordering::SeqCst), max_attempts as usize);
    assert!(handle.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn submissions_past_capacity_are_refused() {
    let config = EngineConfig {
        max_queue_size: 2,
        ..EngineConfig::default()
    };
    let (handle, mut device, _task) = connect(config);
    let a = spawn_submit(&handle, RAW_CODE, vec![1]);
    let b = spawn_submit(&handle, RAW_CODE, vec![2]);
    wait_for_pending(&handle, 2).await;

    let err = handle.submit(RAW_CODE, vec![3u8]).await.unwrap_err();
    assert!(matches!(err, Error::QueueFull { capacity: 2 }));

    for _ in 0..2 {
        device.next().await.unwrap().unwrap();
        reply(&mut device, RAW_CODE, &[]).await;
    }
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();
    assert!(handle.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn checksum_failure_resolves_request() {
    let (handle, mut device, _task) = connect(EngineConfig::default());
    let pending = spawn_submit(&handle, RAW_CODE, vec![]);
    device.next().await.unwrap().unwrap();

    let mut corrupt = Frame::response(RAW_CODE, vec![1u8, 2, 3]).to_bytes().unwrap().to_vec();
    if let Some(last) = corrupt.last_mut() {
        *last ^= 0xFF;
    }
    device.get_mut().write_all(&corrupt).await.unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { code: RAW_CODE }));
    assert!(handle.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn partial_batch_reply_resubmits_the_tail() {
    let (handle, mut device, _task) = connect(EngineConfig::default());
    let batch = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.submit_batch(&[190, 191, 192]).await })
    };

    let request = device.next().await.unwrap().unwrap();
    assert_eq!(request.code, codes::MULTIPLE_MSP);
    assert_eq!(&request.payload[..], &[190, 191, 192]);
    reply(&mut device, codes::MULTIPLE_MSP, &[1, 0xAA]).await;

    let request = device.next().await.unwrap().unwrap();
    assert_eq!(&request.payload[..], &[191, 192]);
    reply(&mut device, codes::MULTIPLE_MSP, &[0, 1, 0xBB]).await;

    let results = batch.await.unwrap().unwrap();
    let codes: Vec<u16> = results.iter().map(|r| r.code).collect();
    assert_eq!(codes, vec![190, 191, 192]);
    assert_eq!(&results[0].payload[..], &[0xAA]);
    assert!(results[1].payload.is_empty());
    assert_eq!(&results[2].payload[..], &[0xBB]);
    assert!(results.iter().all(|r| r.decoded.is_ok()));
}

#[tokio::test]
async fn encoded_length_follows_negotiated_version() {
    let state = DeviceState::default();

    let (handle, mut device, _task) = connect(EngineConfig::default());
    handshake(&handle, &mut device, 35).await;
    assert_eq!(handle.api_version(), ApiVersion::new(1, 35, 0));
    assert_eq!(handle.encode(codes::SET_BLACKBOX_CONFIG, &state, 0).unwrap().len(), 3);

    let (handle, mut device, _task) = connect(EngineConfig::default());
    handshake(&handle, &mut device, 36).await;
    assert_eq!(handle.encode(codes::SET_BLACKBOX_CONFIG, &state, 0).unwrap().len(), 5);
}

#[tokio::test]
async fn closed_link_fails_outstanding_requests() {
    let (handle, mut device, task) = connect(EngineConfig::default());
    let pending = spawn_submit(&handle, RAW_CODE, vec![]);
    device.next().await.unwrap().unwrap();
    drop(device);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::ConnectionReset));
    task.await.unwrap().unwrap();
    assert!(matches!(handle.submit(RAW_CODE, Bytes::new()).await, Err(Error::EngineStopped)));
}

#[test]
fn huffman_stops_at_end_of_stream() {
    let tree = HuffmanTree::canonical(&[
        (Symbol::Byte(b'a'), 1),
        (Symbol::Byte(b'b'), 2),
        (Symbol::Byte(b'c'), 3),
        (Symbol::Eof, 3),
    ])
    .unwrap();

    let encoded = tree.encode(b"abcab", true).unwrap();
    // a generous char count must not read past the end-of-stream symbol
    assert_eq!(tree.decode(&encoded, 64).unwrap(), b"abcab");
    assert_eq!(tree.decode(&encoded, 3).unwrap(), b"abc");
}
