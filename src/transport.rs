use crate::message::{DirectMethodResponse, Message, MessageType};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::Mutex;

/// Channel capacity for messages handed from a transport to its receiver
pub(crate) const RECEIVE_CHANNEL_CAPACITY: usize = 16;

/// Connection to the hub as seen by the device agent
#[async_trait]
pub trait Transport: Send {
    /// Send a device to cloud message
    async fn send_message(&mut self, message: Message) -> crate::Result<()>;
    /// Publish reported properties; `body` is a JSON patch of the reported section
    async fn send_property_update(&mut self, request_id: &str, body: &str) -> crate::Result<()>;
    /// Answer a direct method invocation
    async fn respond_to_direct_method(&mut self, response: DirectMethodResponse)
        -> crate::Result<()>;
    /// Subscribe to cloud to device traffic
    ///
    /// Can only be called once per transport.
    async fn get_receiver(&mut self) -> crate::Result<Receiver<MessageType>>;
    /// Keep the connection alive
    async fn ping(&mut self) -> crate::Result<()>;
}

/// Outgoing traffic a [`MemoryTransport`] has been asked to send
///
/// With a limit set, each queue keeps only the most recent entries.
#[derive(Debug, Default)]
pub struct Outbox {
    /// Device to cloud messages
    pub messages: VecDeque<Message>,
    /// Reported property patches as `(request id, body)`
    pub property_updates: VecDeque<(String, String)>,
    /// Direct method responses
    pub method_responses: VecDeque<DirectMethodResponse>,
    /// Number of pings
    pub pings: usize,
    limit: Option<usize>,
}

impl Outbox {
    fn record<T>(limit: Option<usize>, queue: &mut VecDeque<T>, item: T) {
        if let Some(limit) = limit {
            if limit == 0 {
                return;
            }
            while queue.len() >= limit {
                queue.pop_front();
            }
        }
        queue.push_back(item);
    }
}

/// In-process transport that keeps outgoing traffic in memory
///
/// Used for dry runs without hub credentials. Incoming traffic is injected through the
/// [`Sender`] returned by [`MemoryTransport::new`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    outbox: Arc<Mutex<Outbox>>,
    receiver: Arc<Mutex<Option<Receiver<MessageType>>>>,
}

impl MemoryTransport {
    /// Create the transport and the sender that feeds its receiver
    ///
    /// Everything sent is kept.
    pub fn new() -> (Self, Sender<MessageType>) {
        Self::with_outbox(Outbox::default())
    }

    /// Like [`new`](Self::new), but keep only the last `limit` entries of each kind
    pub fn with_limit(limit: usize) -> (Self, Sender<MessageType>) {
        Self::with_outbox(Outbox {
            limit: Some(limit),
            ..Outbox::default()
        })
    }

    fn with_outbox(outbox: Outbox) -> (Self, Sender<MessageType>) {
        let (tx, rx) = channel(RECEIVE_CHANNEL_CAPACITY);
        let transport = Self {
            outbox: Arc::new(Mutex::new(outbox)),
            receiver: Arc::new(Mutex::new(Some(rx))),
        };
        (transport, tx)
    }

    /// Shared handle to the recorded outgoing traffic
    pub fn outbox(&self) -> Arc<Mutex<Outbox>> {
        Arc::clone(&self.outbox)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_message(&mut self, message: Message) -> crate::Result<()> {
        debug!(
            "Message: {}",
            String::from_utf8_lossy(&message.body).into_owned()
        );
        let mut outbox = self.outbox.lock().await;
        let limit = outbox.limit;
        Outbox::record(limit, &mut outbox.messages, message);
        Ok(())
    }

    async fn send_property_update(&mut self, request_id: &str, body: &str) -> crate::Result<()> {
        debug!("Reported properties ({}): {}", request_id, body);
        let mut outbox = self.outbox.lock().await;
        let limit = outbox.limit;
        Outbox::record(
            limit,
            &mut outbox.property_updates,
            (request_id.to_string(), body.to_string()),
        );
        Ok(())
    }

    async fn respond_to_direct_method(
        &mut self,
        response: DirectMethodResponse,
    ) -> crate::Result<()> {
        debug!("Method response: {:?}", response);
        let mut outbox = self.outbox.lock().await;
        let limit = outbox.limit;
        Outbox::record(limit, &mut outbox.method_responses, response);
        Ok(())
    }

    async fn get_receiver(&mut self) -> crate::Result<Receiver<MessageType>> {
        self.receiver
            .lock()
            .await
            .take()
            .ok_or(crate::Error::ReceiverTaken)
    }

    async fn ping(&mut self) -> crate::Result<()> {
        self.outbox.lock().await.pings += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_outgoing_traffic() {
        let (mut transport, _tx) = MemoryTransport::new();
        let outbox = transport.outbox();

        transport
            .send_message(Message::new(b"{}".to_vec()))
            .await
            .unwrap();
        transport
            .send_property_update("1", "{\"Config\":{}}")
            .await
            .unwrap();
        transport.ping().await.unwrap();

        let outbox = outbox.lock().await;
        assert_eq!(outbox.messages.len(), 1);
        assert_eq!(
            outbox.property_updates,
            vec![("1".to_string(), "{\"Config\":{}}".to_string())]
        );
        assert_eq!(outbox.pings, 1);
    }

    #[tokio::test]
    async fn limited_outbox_keeps_latest() {
        let (mut transport, _tx) = MemoryTransport::with_limit(2);
        let outbox = transport.outbox();

        for i in 0..5 {
            transport
                .send_message(Message::new(vec![i]))
                .await
                .unwrap();
            transport
                .send_property_update(&i.to_string(), "{}")
                .await
                .unwrap();
        }

        let outbox = outbox.lock().await;
        let bodies: Vec<_> = outbox.messages.iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec![vec![3], vec![4]]);
        let ids: Vec<_> = outbox
            .property_updates
            .iter()
            .map(|(id, _)| id.as_str())
            .collect();
        assert_eq!(ids, vec!["3", "4"]);
    }

    #[tokio::test]
    async fn zero_limit_keeps_nothing() {
        let (mut transport, _tx) = MemoryTransport::with_limit(0);
        transport.send_message(Message::new(vec![1])).await.unwrap();
        transport.ping().await.unwrap();

        let outbox = transport.outbox();
        let outbox = outbox.lock().await;
        assert!(outbox.messages.is_empty());
        assert_eq!(outbox.pings, 1);
    }

    #[tokio::test]
    async fn receiver_is_handed_out_once() {
        let (mut transport, tx) = MemoryTransport::new();
        let mut rx = transport.get_receiver().await.unwrap();
        assert!(matches!(
            transport.get_receiver().await,
            Err(crate::Error::ReceiverTaken)
        ));

        tx.send(MessageType::C2DMessage(Message::new(b"hi".to_vec())))
            .await
            .unwrap();
        match rx.recv().await {
            Some(MessageType::C2DMessage(msg)) => assert_eq!(msg.body, b"hi"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
