//! Supervisor end-to-end: configuration channels drive session lifecycle,
//! and operator requests travel store -> session -> RTU -> store.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use voltage_datacoll::store::{keys, Device, MemoryStore, Store, TermItem};
use voltage_datacoll::Supervisor;

const STARTDT_ACT: [u8; 6] = [0x68, 0x04, 0x07, 0x00, 0x00, 0x00];
const STARTDT_CON: [u8; 6] = [0x68, 0x04, 0x0B, 0x00, 0x00, 0x00];

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = [0u8; 2];
    timeout(Duration::from_secs(5), stream.read_exact(&mut head))
        .await
        .expect("timed out waiting for frame")
        .unwrap();
    let mut body = vec![0u8; head[1] as usize];
    stream.read_exact(&mut body).await.unwrap();
    let mut frame = head.to_vec();
    frame.extend_from_slice(&body);
    frame
}

async fn seed_config(store: &Arc<MemoryStore>, address: &str) {
    let (ip, port) = address.split_once(':').unwrap();
    let device = Device {
        id: "d1".to_string(),
        ip: ip.to_string(),
        port: port.parse().unwrap(),
        protocol: "iec104".to_string(),
        name: None,
        coll_interval: None,
    };
    store
        .hset_all(&keys::device("d1"), &device.fields())
        .await
        .unwrap();
    store.sadd(keys::DEVICE_SET, "d1").await.unwrap();

    let binding = TermItem {
        term_id: "t1".to_string(),
        item_id: "i1".to_string(),
        device_id: "d1".to_string(),
        protocol_code: 200,
        code_type: Some(45),
    };
    store
        .hset_all(&keys::term_item("t1", "i1"), &binding.fields())
        .await
        .unwrap();
    store
        .hset_all(&keys::mapping("iec104", "d1", 200), &binding.fields())
        .await
        .unwrap();
}

#[tokio::test]
async fn configured_device_gets_a_session_and_serves_calls() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let store = Arc::new(MemoryStore::new());
    seed_config(&store, &address).await;

    let supervisor = tokio::spawn(Supervisor::new(store.clone()).run());

    // the pre-configured device is picked up at startup
    let (mut rtu, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("supervisor never spawned a session")
        .unwrap();
    assert_eq!(read_frame(&mut rtu).await, STARTDT_ACT);
    rtu.write_all(&STARTDT_CON).await.unwrap();

    // wait until the supervisor is subscribed before publishing
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut call_sub = store
        .subscribe(&[keys::call_channel("d1", "t1", "i1")])
        .await
        .unwrap();
    store
        .publish(
            keys::CH_DEVICE_CALL,
            &serde_json::json!({"device_id": "d1", "term_id": "t1", "item_id": "i1"}).to_string(),
        )
        .await
        .unwrap();

    // session turns the request into a read command for the mapped IOA
    let frame = read_frame(&mut rtu).await;
    assert_eq!(frame[6], 102); // C_RD_NA_1
    assert_eq!(&frame[12..15], &[200, 0, 0]);

    // answer with a float measurement, cause=req
    let mut payload = vec![200u8, 0, 0];
    payload.extend_from_slice(&42.0f32.to_le_bytes());
    payload.push(0x00);
    let mut asdu_bytes = vec![
        0x0D, // M_ME_NC_1
        0x01, // one object
        0x05, // cause=req
        0x00, // originator
        0x01, 0x00, // common address
    ];
    asdu_bytes.extend_from_slice(&payload);
    let mut frame = vec![0x68, (4 + asdu_bytes.len()) as u8, 0x00, 0x00, 0x02, 0x00];
    frame.extend_from_slice(&asdu_bytes);
    rtu.write_all(&frame).await.unwrap();

    let msg = timeout(Duration::from_secs(5), call_sub.recv())
        .await
        .expect("no call response published")
        .unwrap();
    assert!(msg.payload.contains("42"));

    // deleting the device cancels the session: polite STOPDT, then close
    store
        .publish(keys::CH_DEVICE_DEL, &serde_json::to_string("d1").unwrap())
        .await
        .unwrap();
    let frame = read_frame(&mut rtu).await;
    assert_eq!(frame, [0x68, 0x04, 0x13, 0x00, 0x00, 0x00]);
    let mut probe = [0u8; 1];
    let read = timeout(Duration::from_secs(5), rtu.read(&mut probe))
        .await
        .expect("session socket never closed")
        .unwrap_or(0);
    assert_eq!(read, 0);

    supervisor.abort();
}

#[tokio::test]
async fn device_add_channel_spawns_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (ip, port) = address.split_once(':').unwrap();
    let store = Arc::new(MemoryStore::new());

    let supervisor = tokio::spawn(Supervisor::new(store.clone()).run());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let device = Device {
        id: "d9".to_string(),
        ip: ip.to_string(),
        port: port.parse().unwrap(),
        protocol: "iec104".to_string(),
        name: None,
        coll_interval: None,
    };
    store
        .publish(keys::CH_DEVICE_ADD, &serde_json::to_string(&device).unwrap())
        .await
        .unwrap();

    let (mut rtu, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("DEVICE_ADD did not spawn a session")
        .unwrap();
    assert_eq!(read_frame(&mut rtu).await, STARTDT_ACT);

    supervisor.abort();
}
