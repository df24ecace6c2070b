//! # Job payload wire format and the producer helper.
//!
//! A job body is a 2-element JSON array: `["job.name", { ...args }]`.
//! [`Payload`] serializes to and from exactly that shape, and
//! [`enqueue`] is the producer side: it encodes the payload and puts it into
//! the tube named after the job, which is the same tube runners watch for it.
//!
//! ## Example
//! ```
//! use jobvisor::Payload;
//! use serde_json::json;
//!
//! let payload = Payload::new("jack.work", json!({"val": 42}));
//! let body = payload.encode();
//! assert_eq!(body, br#"["jack.work",{"val":42}]"#);
//!
//! let back = Payload::decode(&body).unwrap();
//! assert_eq!(back.name, "jack.work");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JobError, QueueError};
use crate::queue::{JobId, PutOptions, QueueClient};

/// Decoded job body: the job name plus its argument value.
///
/// On the wire this is the 2-tuple `[name, args]`, serialized as JSON text.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "(String, Value)", into = "(String, Value)")]
pub struct Payload {
    /// Registered job name; also the tube the job travels through.
    pub name: String,
    /// Handler argument, typically a JSON object.
    pub args: Value,
}

impl Payload {
    /// Creates a payload.
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Decodes a job body.
    pub fn decode(body: &[u8]) -> Result<Self, JobError> {
        serde_json::from_slice(body).map_err(|e| JobError::Malformed {
            reason: e.to_string(),
        })
    }

    /// Encodes to the wire representation.
    pub fn encode(&self) -> Vec<u8> {
        // a (String, Value) tuple always serializes
        serde_json::to_vec(self).expect("payload serialization is infallible")
    }
}

impl From<(String, Value)> for Payload {
    fn from((name, args): (String, Value)) -> Self {
        Self { name, args }
    }
}

impl From<Payload> for (String, Value) {
    fn from(payload: Payload) -> Self {
        (payload.name, payload.args)
    }
}

/// Enqueues a job for the daemon to pick up.
///
/// Serializes `[name, args]` and puts it into the tube named `name`.
///
/// # Example
/// ```no_run
/// use jobvisor::{enqueue, MemoryBroker, PutOptions};
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), jobvisor::QueueError> {
/// let broker = MemoryBroker::new();
/// let mut client = broker.client();
/// enqueue(&mut client, "jack.work", json!({"val": 42}), &PutOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn enqueue(
    client: &mut dyn QueueClient,
    name: &str,
    args: Value,
    opts: &PutOptions,
) -> Result<JobId, QueueError> {
    let body = Payload::new(name, args).encode();
    client.put(name, &body, opts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip() {
        let payload = Payload::new("reports.daily", json!({"day": "2026-08-07"}));
        let back = Payload::decode(&payload.encode()).unwrap();
        assert_eq!(back.name, "reports.daily");
        assert_eq!(back.args, json!({"day": "2026-08-07"}));
    }

    #[test]
    fn test_decode_array_args() {
        let back = Payload::decode(br#"["sum", [1, 2, 3]]"#).unwrap();
        assert_eq!(back.args, json!([1, 2, 3]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Payload::decode(b"not json"),
            Err(JobError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(matches!(
            Payload::decode(br#"{"name": "x"}"#),
            Err(JobError::Malformed { .. })
        ));
        assert!(matches!(
            Payload::decode(br#"["x", {}, "extra"]"#),
            Err(JobError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_enqueue_targets_tube_named_after_job() {
        let broker = crate::queue::MemoryBroker::new();
        let mut client = broker.client();
        enqueue(&mut client, "jack.work", json!({}), &PutOptions::default())
            .await
            .unwrap();
        assert_eq!(broker.ready_len("jack.work"), 1);
    }
}
