//! Topic publisher: MessagePack frames broadcast to every subscriber
//!
//! Publishing never waits on a subscriber. Frames go into a bounded
//! broadcast ring; a subscriber that falls behind loses the oldest frames
//! and keeps going. Network subscribers connect over TCP and receive
//! length-delimited frames whose body starts with the topic name, so a
//! client can filter by prefix.

use bytes::{BufMut, Bytes, BytesMut};
use ecg_core::{
    DerivedLeads, EcgError, EcgResult, FilteredPayload, OutboundMessage, RawPayload, RawSample,
    Topic,
};
use futures_util::SinkExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One serialized message on a topic
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub topic: Topic,
    /// MessagePack map with named fields
    pub payload: Bytes,
}

impl Frame {
    fn encode<T: Serialize>(topic: Topic, payload: &T) -> EcgResult<Self> {
        let bytes = rmp_serde::to_vec_named(payload).map_err(|e| EcgError::PublishFailure {
            topic: topic.as_str(),
            reason: e.to_string(),
        })?;
        Ok(Frame {
            topic,
            payload: Bytes::from(bytes),
        })
    }

    pub fn raw(sample: &RawSample) -> EcgResult<Self> {
        Self::encode(Topic::Raw, &RawPayload::from(sample))
    }

    pub fn filtered(leads: &DerivedLeads, bpm: Option<f64>) -> EcgResult<Self> {
        Self::encode(Topic::Filtered, &FilteredPayload::new(leads, bpm))
    }

    pub fn from_message(message: &OutboundMessage) -> EcgResult<Self> {
        match message {
            OutboundMessage::Raw(sample) => Self::raw(sample),
            OutboundMessage::Filtered { leads, bpm } => Self::filtered(leads, *bpm),
        }
    }

    /// Decode the payload into its wire struct
    pub fn decode<T: DeserializeOwned>(&self) -> EcgResult<T> {
        rmp_serde::from_slice(&self.payload).map_err(|e| EcgError::PublishFailure {
            topic: self.topic.as_str(),
            reason: format!("undecodable payload: {e}"),
        })
    }

    /// Network body: topic name immediately followed by the payload
    pub fn to_wire(&self) -> Bytes {
        let topic = self.topic.as_str().as_bytes();
        let mut body = BytesMut::with_capacity(topic.len() + self.payload.len());
        body.put_slice(topic);
        body.put_slice(&self.payload);
        body.freeze()
    }

    /// Split a network body back into topic and payload
    pub fn from_wire(mut body: Bytes) -> EcgResult<Self> {
        for topic in Topic::ALL {
            let prefix = topic.as_str().as_bytes();
            if body.starts_with(prefix) {
                let payload = body.split_off(prefix.len());
                return Ok(Frame { topic, payload });
            }
        }
        Err(EcgError::malformed(
            &String::from_utf8_lossy(&body[..body.len().min(16)]),
            "frame has no known topic prefix",
        ))
    }
}

/// Fan-out handle shared by the pipeline and every subscriber endpoint
#[derive(Debug, Clone)]
pub struct Publisher {
    sender: broadcast::Sender<Frame>,
    closed: CancellationToken,
}

impl Publisher {
    /// Publisher buffering up to `capacity` frames per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            closed: CancellationToken::new(),
        }
    }

    /// Publish a pre-filter sample on `raw`.
    ///
    /// Returns how many subscribers the frame was queued for; zero
    /// subscribers is not an error.
    pub fn publish_raw(&self, sample: &RawSample) -> EcgResult<usize> {
        self.publish(&OutboundMessage::Raw(*sample))
    }

    /// Publish derived leads and the current rate on `filtered`
    pub fn publish_filtered(&self, leads: &DerivedLeads, bpm: Option<f64>) -> EcgResult<usize> {
        self.publish(&OutboundMessage::Filtered { leads: *leads, bpm })
    }

    /// Serialize one tick's message and queue it on its topic
    pub fn publish(&self, message: &OutboundMessage) -> EcgResult<usize> {
        let frame = Frame::from_message(message)?;
        if self.closed.is_cancelled() {
            return Err(EcgError::PublishFailure {
                topic: frame.topic.as_str(),
                reason: "publisher closed".to_string(),
            });
        }
        // Err only means nobody is listening
        Ok(self.sender.send(frame).unwrap_or(0))
    }

    /// Subscribe to the given topics; an empty list means all topics
    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        let topics = if topics.is_empty() {
            Topic::ALL.to_vec()
        } else {
            topics.to_vec()
        };
        Subscription {
            receiver: self.sender.subscribe(),
            topics,
            closed: self.closed.clone(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Stop publishing; subscriptions drain what is queued and then end
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Receiving end for a set of topics
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<Frame>,
    topics: Vec<Topic>,
    closed: CancellationToken,
    dropped: u64,
}

impl Subscription {
    /// Next frame on a subscribed topic, or `None` once the publisher is
    /// closed and the queue is drained
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            let received = tokio::select! {
                biased;
                received = self.receiver.recv() => received,
                _ = self.closed.cancelled() => match self.receiver.try_recv() {
                    Ok(frame) => Ok(frame),
                    Err(TryRecvError::Lagged(n)) => Err(RecvError::Lagged(n)),
                    Err(_) => return None,
                },
            };

            match received {
                Ok(frame) if self.topics.contains(&frame.topic) => return Some(frame),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    warn!(skipped, total = self.dropped, "Subscriber lagging, oldest frames dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next queued frame without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        loop {
            match self.receiver.try_recv() {
                Ok(frame) if self.topics.contains(&frame.topic) => return Some(frame),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => self.dropped += skipped,
                Err(_) => return None,
            }
        }
    }

    /// Frames lost to lagging so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }
}

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// TCP endpoint streaming every frame to each connected client
pub struct PublisherServer {
    listener: TcpListener,
    publisher: Publisher,
    write_timeout: Duration,
}

impl PublisherServer {
    pub async fn bind(address: &str, publisher: Publisher, write_timeout: Duration) -> EcgResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| EcgError::config(format!("cannot listen on {address}: {e}")))?;
        Ok(Self {
            listener,
            publisher,
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> EcgResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept subscribers until the publisher is closed
    pub async fn run(self) {
        if let Ok(address) = self.listener.local_addr() {
            info!(%address, "Publisher listening");
        }

        loop {
            let accepted = tokio::select! {
                _ = self.publisher.closed.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "Subscriber connected");
                    let subscription = self.publisher.subscribe(&Topic::ALL);
                    tokio::spawn(serve_subscriber(stream, peer, subscription, self.write_timeout));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept subscriber");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }

        info!("Publisher stopped accepting subscribers");
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut subscription: Subscription,
    write_timeout: Duration,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "Could not disable Nagle");
    }
    let mut framed = FramedWrite::new(stream, LengthDelimitedCodec::new());

    while let Some(frame) = subscription.recv().await {
        match tokio::time::timeout(write_timeout, framed.send(frame.to_wire())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                info!(%peer, error = %e, "Subscriber disconnected");
                return;
            }
            Err(_) => {
                warn!(
                    %peer,
                    timeout_ms = write_timeout.as_millis() as u64,
                    "Subscriber too slow, disconnecting"
                );
                return;
            }
        }
    }

    debug!(%peer, dropped = subscription.dropped(), "Subscription ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecg_core::Timestamp;
    use futures_util::StreamExt;
    use tokio_util::codec::{FramedRead, LengthDelimitedCodec};

    fn sample(ms: u64) -> RawSample {
        RawSample::new(Timestamp::from_millis(ms), 0.40, 0.55, 0.50)
    }

    fn leads(ms: u64) -> DerivedLeads {
        DerivedLeads {
            timestamp: Timestamp::from_millis(ms),
            i: 0.15,
            ii: 0.10,
            iii: -0.05,
            avr: -0.125,
            avl: 0.10,
            avf: 0.025,
        }
    }

    #[test]
    fn test_no_subscribers_is_success() {
        let publisher = Publisher::new(4);
        assert_eq!(publisher.publish_raw(&sample(0)).unwrap(), 0);
        assert_eq!(publisher.publish_filtered(&leads(0), None).unwrap(), 0);
    }

    #[test]
    fn test_raw_payload_fields() {
        let frame = Frame::raw(&sample(1500)).unwrap();
        let payload: RawPayload = frame.decode().unwrap();
        assert_eq!(payload.timestamp, 1.5);
        assert_eq!((payload.ra, payload.la, payload.ll), (0.40, 0.55, 0.50));

        // Named fields survive into an untyped decode
        let value: std::collections::BTreeMap<String, f64> =
            rmp_serde::from_slice(&frame.payload).unwrap();
        let keys: Vec<&str> = value.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["LA", "LL", "RA", "timestamp"]);
    }

    #[test]
    fn test_filtered_payload_bpm_optional() {
        let without: FilteredPayload = Frame::filtered(&leads(10), None).unwrap().decode().unwrap();
        assert_eq!(without.bpm, None);
        assert_eq!(without.leads.ii, 0.10);

        let with: FilteredPayload = Frame::filtered(&leads(10), Some(72.0)).unwrap().decode().unwrap();
        assert_eq!(with.bpm, Some(72.0));
    }

    #[test]
    fn test_wire_prefix() {
        let frame = Frame::filtered(&leads(0), Some(60.0)).unwrap();
        let wire = frame.to_wire();
        assert!(wire.starts_with(b"filtered"));
        assert_eq!(Frame::from_wire(wire).unwrap(), frame);
        assert!(Frame::from_wire(Bytes::from_static(b"bogus")).is_err());
    }

    #[test]
    fn test_publish_outbound_message() {
        let publisher = Publisher::new(4);
        let mut subscription = publisher.subscribe(&[Topic::Filtered]);

        let message = OutboundMessage::Filtered {
            leads: leads(30),
            bpm: Some(65.0),
        };
        assert_eq!(publisher.publish(&message).unwrap(), 1);

        let frame = subscription.try_recv().unwrap();
        assert_eq!(frame.topic, message.topic());
        assert_eq!(frame, Frame::filtered(&leads(30), Some(65.0)).unwrap());
    }

    #[tokio::test]
    async fn test_subscription_filters_topics() {
        let publisher = Publisher::new(16);
        let mut raw_only = publisher.subscribe(&[Topic::Raw]);
        let mut everything = publisher.subscribe(&[]);

        publisher.publish_raw(&sample(0)).unwrap();
        publisher.publish_filtered(&leads(0), None).unwrap();
        publisher.publish_raw(&sample(10)).unwrap();

        assert_eq!(raw_only.recv().await.unwrap().topic, Topic::Raw);
        assert_eq!(raw_only.recv().await.unwrap().topic, Topic::Raw);
        assert!(raw_only.try_recv().is_none());

        let topics: Vec<Topic> = (0..3).filter_map(|_| everything.try_recv()).map(|f| f.topic).collect();
        assert_eq!(topics, vec![Topic::Raw, Topic::Filtered, Topic::Raw]);
    }

    #[tokio::test]
    async fn test_slow_subscriber_never_blocks_publisher() {
        let publisher = Publisher::new(4);
        let mut slow = publisher.subscribe(&[Topic::Raw]);

        for ms in 0..100 {
            assert_eq!(publisher.publish_raw(&sample(ms)).unwrap(), 1);
        }

        // Only the newest frames survive
        let first: RawPayload = slow.recv().await.unwrap().decode().unwrap();
        assert_eq!(first.timestamp, 0.096);
        assert_eq!(slow.dropped(), 96);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions_after_drain() {
        let publisher = Publisher::new(8);
        let mut subscription = publisher.subscribe(&[Topic::Raw]);
        publisher.publish_raw(&sample(0)).unwrap();
        publisher.close();

        assert!(subscription.recv().await.is_some());
        assert!(subscription.recv().await.is_none());
        assert!(matches!(
            publisher.publish_raw(&sample(10)),
            Err(EcgError::PublishFailure { topic: "raw", .. })
        ));
    }

    #[tokio::test]
    async fn test_tcp_subscriber_receives_frames() {
        let publisher = Publisher::new(64);
        let server = PublisherServer::bind("127.0.0.1:0", publisher.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        let address = server.local_addr().unwrap();
        let server_task = tokio::spawn(server.run());

        let stream = TcpStream::connect(address).await.unwrap();
        let mut frames = FramedRead::new(stream, LengthDelimitedCodec::new());

        // Wait until the server has registered the subscriber
        while publisher.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        publisher.publish_raw(&sample(20)).unwrap();
        publisher.publish_filtered(&leads(20), Some(72.0)).unwrap();

        let first = Frame::from_wire(frames.next().await.unwrap().unwrap().freeze()).unwrap();
        let second = Frame::from_wire(frames.next().await.unwrap().unwrap().freeze()).unwrap();
        assert_eq!(first.topic, Topic::Raw);
        assert_eq!(second.decode::<FilteredPayload>().unwrap().bpm, Some(72.0));

        publisher.close();
        server_task.await.unwrap();
        assert!(frames.next().await.is_none());
    }
}
