// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Messages
//!
//! Inbound deliveries and outbound publications as seen by the rest of the crate,
//! independent of the client library that produced them.

use std::collections::BTreeMap;

/// Header carrying the routing path of a message. The broker routing key is not used.
pub const PATH_HEADER: &str = "PATH";

/// Handle used to settle a delivery.
///
/// The handle is neither `Clone` nor `Copy`: acknowledging or rejecting a delivery
/// consumes it, so the same delivery cannot be settled twice.
#[derive(Debug, PartialEq, Eq)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Wraps the tag the broker assigned to a delivery.
    pub fn new(tag: u64) -> Self {
        DeliveryTag(tag)
    }

    /// The raw tag, as sent back to the broker.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A message received from the broker.
#[derive(Debug)]
pub struct InboundMessage {
    pub delivery_tag: DeliveryTag,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl InboundMessage {
    pub fn new(delivery_tag: DeliveryTag, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        InboundMessage {
            delivery_tag,
            headers,
            body,
        }
    }

    /// The routing path carried in the `PATH` header, if any.
    pub fn path(&self) -> Option<&str> {
        self.headers.get(PATH_HEADER).map(String::as_str)
    }
}

/// A message about to be published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub message_id: String,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_is_read_from_header() {
        let mut headers = BTreeMap::new();
        headers.insert(PATH_HEADER.to_owned(), "/users/42".to_owned());

        let msg = InboundMessage::new(DeliveryTag::new(1), headers, vec![]);

        assert_eq!(msg.path(), Some("/users/42"));
    }

    #[test]
    fn test_missing_path_header() {
        let msg = InboundMessage::new(DeliveryTag::new(1), BTreeMap::new(), b"{}".to_vec());

        assert_eq!(msg.path(), None);
        assert_eq!(msg.delivery_tag.value(), 1);
    }
}
