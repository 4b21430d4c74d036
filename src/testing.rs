// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Broker
//!
//! [`InMemoryChannel`] implements [`BrokerChannel`] without a server, for tests of
//! topologies, handlers and the processing loop. It models the broker behaviour the
//! crate depends on:
//! - declarations are declare-if-absent, a conflicting redeclaration fails
//! - queues declared without a name get a broker generated one
//! - exchanges fan out to every bound queue
//! - a message rejected without requeue goes to the queue's dead letter exchange
//! - [`InMemoryChannel::expire`] stands in for the message TTL elapsing
//!
//! Deliveries are handed out one at a time, when the consumer polls for the next one.

use crate::{
    channel::{BrokerChannel, DeliveryStream},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::{DeliveryTag, InboundMessage, OutboundMessage},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredMessage {
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

#[derive(Debug)]
struct StoredQueue {
    def: QueueDefinition,
    ready: VecDeque<StoredMessage>,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: BTreeMap<String, ExchangeDefinition>,
    queues: BTreeMap<String, StoredQueue>,
    bindings: BTreeSet<QueueBinding>,
    unacked: HashMap<u64, (String, StoredMessage)>,
    next_tag: u64,
    prefetch: Option<u16>,
    acks: Vec<u64>,
    nacks: Vec<(u64, bool)>,
    published: Vec<(String, OutboundMessage)>,
    fail_settlements: bool,
}

impl BrokerState {
    fn route(&mut self, exchange: &str, msg: StoredMessage) {
        let targets = self
            .bindings
            .iter()
            .filter(|b| b.exchange_name() == exchange)
            .map(|b| b.queue_name().to_owned())
            .collect::<Vec<_>>();

        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.ready.push_back(msg.clone());
            }
        }
    }

    fn dead_letter(&mut self, queue: &str, msg: StoredMessage) {
        let dlx = self
            .queues
            .get(queue)
            .and_then(|q| q.def.dead_letter_exchange().map(str::to_owned));

        if let Some(exchange) = dlx {
            self.route(&exchange, msg);
        }
    }

    fn next_delivery(&mut self, queue: &str) -> Option<InboundMessage> {
        let msg = self.queues.get_mut(queue)?.ready.pop_front()?;

        self.next_tag += 1;
        let tag = self.next_tag;
        self.unacked.insert(tag, (queue.to_owned(), msg.clone()));

        Some(InboundMessage::new(
            DeliveryTag::new(tag),
            msg.headers,
            msg.body,
        ))
    }
}

/// Broker double shared between the code under test and the test itself.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChannel {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        InMemoryChannel::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn exchange(&self, name: &str) -> Option<ExchangeDefinition> {
        self.state().exchanges.get(name).cloned()
    }

    pub fn queue(&self, name: &str) -> Option<QueueDefinition> {
        self.state().queues.get(name).map(|q| q.def.clone())
    }

    pub fn is_bound(&self, exchange: &str, queue: &str) -> bool {
        self.state()
            .bindings
            .iter()
            .any(|b| b.exchange_name() == exchange && b.queue_name() == queue)
    }

    pub fn exchange_count(&self) -> usize {
        self.state().exchanges.len()
    }

    pub fn queue_count(&self) -> usize {
        self.state().queues.len()
    }

    pub fn binding_count(&self) -> usize {
        self.state().bindings.len()
    }

    pub fn prefetch(&self) -> Option<u16> {
        self.state().prefetch
    }

    /// Puts a message straight into a queue, bypassing exchanges.
    ///
    /// Messages pushed to an undeclared queue are dropped, like a broker would.
    pub fn push(&self, queue: &str, headers: BTreeMap<String, String>, body: &[u8]) {
        if let Some(q) = self.state().queues.get_mut(queue) {
            q.ready.push_back(StoredMessage {
                headers,
                body: body.to_vec(),
            });
        }
    }

    /// Number of messages waiting in a queue.
    pub fn ready(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or_default()
    }

    /// Bodies of the messages waiting in a queue, oldest first.
    pub fn bodies(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of deliveries handed out and not settled yet.
    pub fn unacked(&self) -> usize {
        self.state().unacked.len()
    }

    pub fn acks(&self) -> Vec<u64> {
        self.state().acks.clone()
    }

    pub fn nacks(&self) -> Vec<(u64, bool)> {
        self.state().nacks.clone()
    }

    pub fn published(&self) -> Vec<(String, OutboundMessage)> {
        self.state().published.clone()
    }

    /// Makes every following ack and nack fail, as a dropped connection would.
    pub fn fail_settlements(&self) {
        self.state().fail_settlements = true;
    }

    /// Expires every waiting message of `queue`, dead-lettering them if the queue has a
    /// dead letter exchange.
    pub fn expire(&self, queue: &str) {
        let mut state = self.state();
        let expired = match state.queues.get_mut(queue) {
            Some(q) => q.ready.drain(..).collect::<Vec<_>>(),
            None => return,
        };

        for msg in expired {
            state.dead_letter(queue, msg);
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.state();

        if let Some(existing) = state.exchanges.get(def.name()) {
            if existing != def {
                return Err(AmqpError::DeclareExchangeError(def.name().to_owned()));
            }
            return Ok(());
        }

        state.exchanges.insert(def.name().to_owned(), def.clone());
        Ok(())
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        let mut state = self.state();

        if def.name.is_empty() {
            let name = format!("amq.gen-{}", Uuid::new_v4());
            let mut def = def.clone();
            def.name = name.clone();
            state.queues.insert(
                name.clone(),
                StoredQueue {
                    def,
                    ready: VecDeque::new(),
                },
            );
            return Ok(name);
        }

        if let Some(existing) = state.queues.get(&def.name) {
            if &existing.def != def {
                return Err(AmqpError::DeclareQueueError(def.name.clone()));
            }
            return Ok(def.name.clone());
        }

        state.queues.insert(
            def.name.clone(),
            StoredQueue {
                def: def.clone(),
                ready: VecDeque::new(),
            },
        );
        Ok(def.name.clone())
    }

    async fn bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.state();

        if !state.exchanges.contains_key(binding.exchange_name())
            || !state.queues.contains_key(binding.queue_name())
        {
            return Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name().to_owned(),
                binding.queue_name().to_owned(),
            ));
        }

        state.bindings.insert(binding.clone());
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), AmqpError> {
        self.state().prefetch = Some(count);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, AmqpError> {
        if !self.state().queues.contains_key(queue) {
            return Err(AmqpError::ConsumerDeclarationError(queue.to_owned()));
        }

        let channel = self.clone();
        let queue = queue.to_owned();

        Ok(stream::unfold((channel, queue), |(channel, queue)| async move {
            let next = channel.state().next_delivery(&queue);
            next.map(|msg| (Ok::<_, AmqpError>(msg), (channel, queue)))
        })
        .boxed())
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), AmqpError> {
        let mut state = self.state();

        if state.fail_settlements || state.unacked.remove(&tag.value()).is_none() {
            return Err(AmqpError::AckMessageError);
        }

        state.acks.push(tag.value());
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), AmqpError> {
        let mut state = self.state();

        if state.fail_settlements {
            return Err(AmqpError::NackMessageError);
        }

        let Some((queue, msg)) = state.unacked.remove(&tag.value()) else {
            return Err(AmqpError::NackMessageError);
        };

        state.nacks.push((tag.value(), requeue));

        if requeue {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_front(msg);
            }
        } else {
            state.dead_letter(&queue, msg);
        }

        Ok(())
    }

    async fn publish(&self, exchange: &str, msg: OutboundMessage) -> Result<(), AmqpError> {
        let mut state = self.state();

        if !state.exchanges.contains_key(exchange) {
            return Err(AmqpError::PublishingError);
        }

        state.published.push((exchange.to_owned(), msg.clone()));
        state.route(
            exchange,
            StoredMessage {
                headers: msg.headers,
                body: msg.body,
            },
        );

        Ok(())
    }
}
