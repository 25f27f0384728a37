//! Object lifecycle over a real socket: create, seal, get, delete.

mod support;

use cairn_client::Client;
use cairn_wire::ObjectId;
use support::StoreProcess;

#[tokio::test]
async fn create_seal_get_on_one_client() {
    let store = StoreProcess::spawn();
    let mut client = Client::connect(&store.socket).await.unwrap();

    let id = ObjectId::repeat(0x01);
    let mut buffer = client.create(id, 8, b"").await.unwrap();
    buffer
        .data_mut()
        .copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE]);

    // Open objects are invisible to CONTAINS.
    assert!(!client.contains(id).await.unwrap());
    client.seal(id).await.unwrap();
    assert!(client.contains(id).await.unwrap());

    let got = client.get(id).await.unwrap();
    assert_eq!(got.data(), &[0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE]);
}

#[tokio::test]
async fn consumer_reads_the_producers_bytes() {
    let store = StoreProcess::spawn();
    let mut producer = Client::connect(&store.socket).await.unwrap();
    let mut consumer = Client::connect(&store.socket).await.unwrap();

    let id = ObjectId::repeat(0x02);
    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let mut buffer = producer.create(id, payload.len(), b"checksum:42").await.unwrap();
    buffer.data_mut().copy_from_slice(&payload);
    producer.seal(id).await.unwrap();

    let got = consumer.get(id).await.unwrap();
    assert_eq!(got.data(), payload.as_slice());
    assert_eq!(got.metadata(), b"checksum:42");
    assert_eq!(consumer.get_metadata(id).await.unwrap(), b"checksum:42");
}

#[tokio::test]
async fn zero_sized_object_is_observable() {
    let store = StoreProcess::spawn();
    let mut client = Client::connect(&store.socket).await.unwrap();

    let id = ObjectId::repeat(0x03);
    client.create(id, 0, b"").await.unwrap();
    client.seal(id).await.unwrap();
    assert!(client.contains(id).await.unwrap());

    let got = client.get(id).await.unwrap();
    assert!(got.data().is_empty());
    assert!(got.metadata().is_empty());
}

#[tokio::test]
async fn seal_of_unknown_id_is_a_noop() {
    let store = StoreProcess::spawn();
    let mut client = Client::connect(&store.socket).await.unwrap();

    client.seal(ObjectId::repeat(0x55)).await.unwrap();

    // The store is alive and well afterwards.
    let id = ObjectId::repeat(0x04);
    client.create(id, 1, b"").await.unwrap();
    client.seal(id).await.unwrap();
    assert!(client.contains(id).await.unwrap());
}

#[tokio::test]
async fn delete_releases_the_identifier() {
    let store = StoreProcess::spawn();
    let mut client = Client::connect(&store.socket).await.unwrap();

    let id = ObjectId::repeat(0x05);
    let mut buffer = client.create(id, 4, b"").await.unwrap();
    buffer.data_mut().copy_from_slice(b"gone");
    client.seal(id).await.unwrap();
    client.delete(id).await.unwrap();
    assert!(!client.contains(id).await.unwrap());

    // The identifier is no longer live, so creating it again is legal.
    let mut buffer = client.create(id, 5, b"").await.unwrap();
    buffer.data_mut().copy_from_slice(b"again");
    client.seal(id).await.unwrap();
    assert_eq!(client.get(id).await.unwrap().data(), b"again");
}

#[tokio::test]
async fn disconnect_is_orderly() {
    let store = StoreProcess::spawn();
    let mut client = Client::connect(&store.socket).await.unwrap();
    let id = ObjectId::repeat(0x06);
    client.create(id, 1, b"").await.unwrap();
    client.seal(id).await.unwrap();
    client.disconnect().await.unwrap();

    // The store keeps serving other clients.
    let mut other = Client::connect(&store.socket).await.unwrap();
    assert!(other.contains(id).await.unwrap());
}
