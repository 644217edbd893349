//! End-to-end session scenarios against a scripted RTU on a loopback
//! socket, with the in-memory store standing in for Redis.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Encoder;

use voltage_datacoll::session::{self, SessionCommand, SessionConfig, SessionHandle};
use voltage_datacoll::store::{keys, Measurement, MemoryStore, Store, TermItem};
use voltage_datacoll::types::{Apci, Asdu, AsduHeader, Cause, Cp56Time2a, Ioa, Typ, Vsq};
use voltage_datacoll::{Frame, Iec104Codec};

const STARTDT_ACT: [u8; 6] = [0x68, 0x04, 0x07, 0x00, 0x00, 0x00];
const STARTDT_CON: [u8; 6] = [0x68, 0x04, 0x0B, 0x00, 0x00, 0x00];
const STOPDT_ACT: [u8; 6] = [0x68, 0x04, 0x13, 0x00, 0x00, 0x00];
const STOPDT_CON: [u8; 6] = [0x68, 0x04, 0x23, 0x00, 0x00, 0x00];
const TESTFR_CON: [u8; 6] = [0x68, 0x04, 0x83, 0x00, 0x00, 0x00];

struct Harness {
    store: Arc<MemoryStore>,
    handle: SessionHandle,
    rtu: TcpStream,
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = [0u8; 2];
    timeout(Duration::from_secs(5), stream.read_exact(&mut head))
        .await
        .expect("timed out waiting for frame")
        .unwrap();
    let mut body = vec![0u8; head[1] as usize];
    timeout(Duration::from_secs(5), stream.read_exact(&mut body))
        .await
        .expect("timed out waiting for frame body")
        .unwrap();
    let mut frame = head.to_vec();
    frame.extend_from_slice(&body);
    frame
}

fn encode(frame: Frame) -> Vec<u8> {
    let mut buf = BytesMut::new();
    Iec104Codec::new().encode(frame, &mut buf).unwrap();
    buf.to_vec()
}

fn i_frame(ssn: u16, rsn: u16, asdu: Asdu) -> Vec<u8> {
    encode(Frame {
        apci: Apci::I {
            ssn,
            rsn,
        },
        asdu: Some(asdu),
    })
}

fn spont_asdu(typ: Typ, ioa: u32, payload: &[u8]) -> Asdu {
    Asdu::with_object(AsduHeader::new(typ, 1, Cause::Spont, 1), Ioa::new(ioa), payload)
}

fn test_config(address: String) -> SessionConfig {
    let mut cfg = SessionConfig::new("d1", address);
    cfg.reconnect_delay = Duration::from_millis(100);
    cfg
}

async fn seed_mapping(store: &Arc<MemoryStore>, ioa: u32, code_type: Option<u8>) -> TermItem {
    let binding = TermItem {
        term_id: "t1".to_string(),
        item_id: "i1".to_string(),
        device_id: "d1".to_string(),
        protocol_code: ioa,
        code_type,
    };
    store
        .hset_all(&keys::mapping("iec104", "d1", ioa), &binding.fields())
        .await
        .unwrap();
    binding
}

/// Spawn a session against a one-shot listener and complete the STARTDT
/// handshake.
async fn connect(cfg_mut: impl FnOnce(&mut SessionConfig)) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let store = Arc::new(MemoryStore::new());

    let mut cfg = test_config(address);
    cfg_mut(&mut cfg);
    let handle = session::spawn(cfg, store.clone());

    let (mut rtu, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("session never connected")
        .unwrap();
    assert_eq!(read_frame(&mut rtu).await, STARTDT_ACT);
    rtu.write_all(&STARTDT_CON).await.unwrap();

    Harness { store, handle, rtu }
}

#[tokio::test]
async fn cold_start_handshake() {
    let harness = connect(|_| {}).await;

    // the handshake must be fully logged before anything else happens
    tokio::time::sleep(Duration::from_millis(100)).await;
    let log = harness
        .store
        .lrange(&keys::frame_list("d1"), 0, -1)
        .await
        .unwrap();
    assert!(log.len() >= 2, "expected tx+rx in the frame log");
    let first: serde_json::Value = serde_json::from_str(&log[0]).unwrap();
    assert_eq!(first["dir"], "tx");
    assert_eq!(first["frame"], "680407000000");

    // link state is mirrored into the device hash
    let device = harness.store.hgetall(&keys::device("d1")).await.unwrap();
    assert_eq!(device.get("status").map(String::as_str), Some("online"));

    harness.handle.stop().await;
}

#[tokio::test]
async fn spontaneous_single_point_is_published() {
    let mut harness = connect(|_| {}).await;
    seed_mapping(&harness.store, 100, None).await;
    let mut sub = harness
        .store
        .subscribe(&[keys::data_channel("d1", "t1", "i1")])
        .await
        .unwrap();

    // M_SP_TB_1, spont, IOA=100, ON, CP56 2024-01-15 10:30:00.000
    let tag = Cp56Time2a {
        millis: 0,
        minutes: 30,
        hours: 10,
        day: 15,
        day_of_week: 1,
        month: 1,
        year: 24,
        invalid: false,
        summer_time: false,
    };
    let mut payload = vec![0x01];
    payload.extend_from_slice(&tag.to_bytes());
    let asdu = spont_asdu(Typ::M_SP_TB_1, 100, &payload);
    harness.rtu.write_all(&i_frame(0, 0, asdu)).await.unwrap();

    let msg = timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no measurement published")
        .unwrap();
    let event: Measurement = serde_json::from_str(&msg.payload).unwrap();
    assert_eq!(event.device_id, "d1");
    assert_eq!(event.term_id, "t1");
    assert_eq!(event.item_id, "i1");
    assert_eq!(event.time, "2024-01-15T10:30:00.000");
    assert_eq!(event.value, serde_json::json!(true));

    let list = harness
        .store
        .lrange(&keys::data_list("d1", "t1", "i1"), 0, -1)
        .await
        .unwrap();
    assert_eq!(list.len(), 1);

    harness.handle.stop().await;
}

#[tokio::test]
async fn w_threshold_emits_single_s_frame() {
    let mut harness = connect(|cfg| {
        // keep T2 out of the way so only the W threshold can trigger the ack
        cfg.t2 = Duration::from_secs(60);
    })
    .await;
    seed_mapping(&harness.store, 100, None).await;

    for ssn in 0..8u16 {
        let asdu = spont_asdu(Typ::M_SP_NA_1, 100, &[0x01]);
        harness.rtu.write_all(&i_frame(ssn, 0, asdu)).await.unwrap();
    }

    // exactly one S-frame carrying rsn=8
    let frame = read_frame(&mut harness.rtu).await;
    assert_eq!(frame, [0x68, 0x04, 0x01, 0x00, 0x10, 0x00]);

    harness.handle.stop().await;
}

#[tokio::test]
async fn read_call_roundtrip() {
    let mut harness = connect(|_| {}).await;
    let binding = seed_mapping(&harness.store, 200, None).await;
    let mut sub = harness
        .store
        .subscribe(&[keys::call_channel("d1", "t1", "i1")])
        .await
        .unwrap();

    harness
        .handle
        .send(SessionCommand::Call { binding })
        .await
        .unwrap();

    // expect C_RD_NA_1 act toward IOA 200
    let frame = read_frame(&mut harness.rtu).await;
    assert_eq!(frame[6], 102); // TYP
    assert_eq!(frame[8] & 0x3F, 6); // cause=act
    assert_eq!(&frame[12..15], &[200, 0, 0]); // IOA

    // respond with the measurement, cause=req
    let mut payload = 42.0f32.to_le_bytes().to_vec();
    payload.push(0x00); // QDS
    let mut asdu = spont_asdu(Typ::M_ME_NC_1, 200, &payload);
    asdu.header.cause = Cause::Req;
    harness.rtu.write_all(&i_frame(0, 1, asdu)).await.unwrap();

    let msg = timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no call response published")
        .unwrap();
    let event: Measurement = serde_json::from_str(&msg.payload).unwrap();
    assert_eq!(event.value, serde_json::json!(42.0));

    harness.handle.stop().await;
}

#[tokio::test]
async fn select_before_operate_control() {
    let mut harness = connect(|_| {}).await;
    let binding = seed_mapping(&harness.store, 100, Some(45)).await;
    let mut sub = harness
        .store
        .subscribe(&[keys::ctrl_channel("d1", "t1", "i1")])
        .await
        .unwrap();

    harness
        .handle
        .send(SessionCommand::Ctrl {
            binding,
            value: 1.0,
        })
        .await
        .unwrap();

    // select phase: C_SC_NA_1 act, SCO = SE|ON
    let frame = read_frame(&mut harness.rtu).await;
    assert_eq!(frame[6], 45);
    assert_eq!(frame[8] & 0x3F, 6);
    assert_eq!(frame[15], 0x81);

    // acknowledge the select
    let mut asdu = Asdu::single_command(1, Ioa::new(100), true, true);
    asdu.header.cause = Cause::ActCon;
    harness.rtu.write_all(&i_frame(0, 1, asdu)).await.unwrap();

    // execute phase: same command, SE cleared
    let frame = read_frame(&mut harness.rtu).await;
    assert_eq!(frame[6], 45);
    assert_eq!(frame[8] & 0x3F, 6);
    assert_eq!(frame[15], 0x01);

    // acknowledge the execute, which publishes the ctrl event
    let mut asdu = Asdu::single_command(1, Ioa::new(100), true, false);
    asdu.header.cause = Cause::ActCon;
    harness.rtu.write_all(&i_frame(1, 2, asdu)).await.unwrap();

    let msg = timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no ctrl event published")
        .unwrap();
    let event: Measurement = serde_json::from_str(&msg.payload).unwrap();
    assert_eq!(event.value, serde_json::json!(true));

    harness.handle.stop().await;
}

#[tokio::test]
async fn t1_expiry_triggers_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let store = Arc::new(MemoryStore::new());

    let mut cfg = test_config(address);
    cfg.t1 = Duration::from_millis(200);
    let handle = session::spawn(cfg, store.clone());

    // first attempt: swallow STARTDT act, never confirm
    let (mut rtu, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read_frame(&mut rtu).await, STARTDT_ACT);

    // T1 fires, the session drops the link and retries after the delay
    let (mut rtu2, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("no reconnect attempt")
        .unwrap();
    assert_eq!(read_frame(&mut rtu2).await, STARTDT_ACT);

    handle.stop().await;
}

#[tokio::test]
async fn t3_idle_sends_test_frame() {
    let mut harness = connect(|cfg| {
        cfg.t3 = Duration::from_millis(200);
    })
    .await;

    // idle line: expect exactly one TESTFR act
    let frame = read_frame(&mut harness.rtu).await;
    assert_eq!(frame, [0x68, 0x04, 0x43, 0x00, 0x00, 0x00]);
    harness.rtu.write_all(&TESTFR_CON).await.unwrap();

    harness.handle.stop().await;
}

#[tokio::test]
async fn remote_stopdt_is_terminal() {
    let mut harness = connect(|_| {}).await;

    harness.rtu.write_all(&STOPDT_ACT).await.unwrap();
    assert_eq!(read_frame(&mut harness.rtu).await, STOPDT_CON);

    // connection closes and the session does not come back
    let mut probe = [0u8; 1];
    let read = timeout(Duration::from_secs(5), harness.rtu.read(&mut probe))
        .await
        .expect("peer socket never closed")
        .unwrap();
    assert_eq!(read, 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.handle.is_finished());

    let device = harness.store.hgetall(&keys::device("d1")).await.unwrap();
    assert_eq!(device.get("status").map(String::as_str), Some("offline"));
}

#[tokio::test]
async fn cross_start_yields_one_con_each_way() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let store = Arc::new(MemoryStore::new());
    let handle = session::spawn(test_config(address), store.clone());

    let (mut rtu, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read_frame(&mut rtu).await, STARTDT_ACT);

    // both sides started: answer with our own act instead of a con
    rtu.write_all(&STARTDT_ACT).await.unwrap();

    // the session must reply with exactly one con and drop its own act
    assert_eq!(read_frame(&mut rtu).await, STARTDT_CON);

    // link is up: a spontaneous point flows through
    let _ = seed_mapping(&store, 100, None).await;
    let mut sub = store
        .subscribe(&[keys::data_channel("d1", "t1", "i1")])
        .await
        .unwrap();
    let asdu = spont_asdu(Typ::M_SP_NA_1, 100, &[0x01]);
    rtu.write_all(&i_frame(0, 0, asdu)).await.unwrap();
    let msg = timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no measurement after cross start")
        .unwrap();
    assert!(!msg.payload.is_empty());

    handle.stop().await;
}

#[tokio::test]
async fn sequence_violation_reconnects_with_fresh_counters() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let store = Arc::new(MemoryStore::new());
    let handle = session::spawn(test_config(address), store.clone());

    let (mut rtu, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read_frame(&mut rtu).await, STARTDT_ACT);
    rtu.write_all(&STARTDT_CON).await.unwrap();

    // wrong ssn (5 instead of 0) is fatal for the session
    let asdu = spont_asdu(Typ::M_SP_NA_1, 100, &[0x01]);
    rtu.write_all(&i_frame(5, 0, asdu)).await.unwrap();

    // a fresh connection restarts the handshake from zero
    let (mut rtu2, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("no reconnect after sequence violation")
        .unwrap();
    assert_eq!(read_frame(&mut rtu2).await, STARTDT_ACT);

    handle.stop().await;
}

#[tokio::test]
async fn unknown_typ_does_not_kill_session() {
    let mut harness = connect(|_| {}).await;
    seed_mapping(&harness.store, 100, None).await;
    let mut sub = harness
        .store
        .subscribe(&[keys::data_channel("d1", "t1", "i1")])
        .await
        .unwrap();

    // unsupported TYP is skipped
    let unknown = Asdu {
        header: AsduHeader {
            typ: Typ(120),
            vsq: Vsq::new(1, false),
            cause: Cause::Spont,
            test: false,
            negative: false,
            originator: 0,
            common_address: 1,
        },
        raw_data: bytes::Bytes::from_static(&[0x01, 0x00, 0x00, 0x00]),
    };
    harness.rtu.write_all(&i_frame(0, 0, unknown)).await.unwrap();

    // the session keeps running and routes the next frame
    let asdu = spont_asdu(Typ::M_SP_NA_1, 100, &[0x01]);
    harness.rtu.write_all(&i_frame(1, 0, asdu)).await.unwrap();

    let msg = timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("session died on unknown TYP")
        .unwrap();
    assert!(!msg.payload.is_empty());

    harness.handle.stop().await;
}

#[tokio::test]
async fn interrogation_cycle_fires_after_interval() {
    let mut harness = connect(|cfg| {
        cfg.coll_interval = Duration::from_millis(300);
    })
    .await;

    // after one interval: clock sync, general interrogation, counter
    // interrogation, all cause=act. The queue is strictly head-of-line, so
    // each command goes out only once its predecessor is confirmed.
    let frame = read_frame(&mut harness.rtu).await;
    assert_eq!(frame[6], 103);
    assert_eq!(frame[8] & 0x3F, 6);
    let mut con = Asdu::clock_sync(
        1,
        Cp56Time2a {
            millis: 0,
            minutes: 0,
            hours: 0,
            day: 1,
            day_of_week: 1,
            month: 1,
            year: 24,
            invalid: false,
            summer_time: false,
        },
    );
    con.header.cause = Cause::ActCon;
    harness.rtu.write_all(&i_frame(0, 1, con)).await.unwrap();

    let frame = read_frame(&mut harness.rtu).await;
    assert_eq!(frame[6], 100);
    let mut con = Asdu::interrogation_command(1);
    con.header.cause = Cause::ActCon;
    harness.rtu.write_all(&i_frame(1, 2, con)).await.unwrap();

    let frame = read_frame(&mut harness.rtu).await;
    assert_eq!(frame[6], 101);

    harness.handle.stop().await;
}

#[tokio::test]
async fn user_stop_sends_stopdt() {
    let mut harness = connect(|_| {}).await;

    let stopping = tokio::spawn(async move { harness.handle.stop().await });
    let frame = read_frame(&mut harness.rtu).await;
    assert_eq!(frame, STOPDT_ACT);
    stopping.await.unwrap();
}
