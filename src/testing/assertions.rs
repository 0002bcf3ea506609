//! Assertions over what ended up on a [`FakeQueue`].

use crate::backend::FakeQueue;
use crate::codec::ChunkCodec;
use crate::model::Chunk;

/// Decode every ready message of `queue`, oldest first.
///
/// # Panics
///
/// Panics if a message does not decode.
#[must_use]
pub fn ready_chunks(broker: &FakeQueue, queue: &str) -> Vec<Chunk> {
    let codec = ChunkCodec::default();
    broker
        .ready(queue)
        .iter()
        .enumerate()
        .map(|(i, payload)| {
            codec
                .decode(payload)
                .unwrap_or_else(|e| panic!("message #{i} on {queue} does not decode: {e}"))
        })
        .collect()
}

/// Assert the ready messages of `queue` hold chunks of exactly these sizes.
///
/// # Panics
///
/// Panics if the sizes differ or a message does not decode.
///
/// # Example
///
/// ```
/// use bulkload::backend::{FakeQueue, QueueClient};
/// use bulkload::codec::ChunkCodec;
/// use bulkload::model::Chunk;
/// use bulkload::testing::{assert_chunk_sizes, sample_users};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = FakeQueue::new();
/// queue.declare_queue("q").await.unwrap();
/// let payload = ChunkCodec::default().encode(&Chunk::new(sample_users(2))).unwrap();
/// queue.publish("q", payload).await.unwrap();
/// assert_chunk_sizes(&queue, "q", &[2]);
/// # }
/// ```
pub fn assert_chunk_sizes(broker: &FakeQueue, queue: &str, expected: &[usize]) {
    let sizes: Vec<usize> = ready_chunks(broker, queue).iter().map(Chunk::len).collect();
    assert_eq!(
        sizes, expected,
        "Chunk size mismatch on {queue}:\n  Expected: {expected:?}\n  Actual: {sizes:?}"
    );
}

/// Assert the chunks, concatenated, carry `user-0..user-{n-1}` in order.
///
/// # Panics
///
/// Panics on a missing, extra or out-of-order row.
pub fn assert_users_in_order(chunks: &[Chunk], n: usize) {
    let names: Vec<&str> = chunks
        .iter()
        .flat_map(Chunk::rows)
        .map(|row| row.get("Name").unwrap_or("<missing>"))
        .collect();
    assert_eq!(names.len(), n, "Row count mismatch: expected {n}, got {}", names.len());
    for (i, name) in names.iter().enumerate() {
        assert_eq!(*name, format!("user-{i}"), "Row order mismatch at index {i}");
    }
}
