//! Integration tests for duplex-rpc.
//!
//! Each test drives a `Connection` over an in-memory duplex pipe, speaking
//! raw frames the way a remote peer would.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use duplex_rpc::codec::WireFormat;
use duplex_rpc::protocol::{error_codes, frame_type, Frame, FrameBuffer};
use duplex_rpc::{Connection, Dispatcher, Message};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Test peer on the client end of the pipe.
struct Peer {
    io: DuplexStream,
    buffer: FrameBuffer,
    ready: VecDeque<Frame>,
    format: WireFormat,
}

impl Peer {
    async fn send(&mut self, frame: Frame) {
        self.io.write_all(&frame.encode()).await.unwrap();
    }

    /// Write several frames with a single write.
    async fn send_all(&mut self, frames: &[Frame]) {
        let bytes: Vec<u8> = frames.iter().flat_map(|f| f.encode().to_vec()).collect();
        self.io.write_all(&bytes).await.unwrap();
    }

    async fn request(&mut self, kind: u8, stream_id: u32, route: &str, message: Option<Message>) {
        let body = match message {
            Some(m) => self.format.encode_message(&m).unwrap(),
            None => Vec::new(),
        };
        self.send(Frame::request(kind, stream_id, route, &body).unwrap())
            .await;
    }

    async fn send_element(&mut self, stream_id: u32, message: Message) {
        let body = self.format.encode_message(&message).unwrap();
        self.send(Frame::next(stream_id, body.into())).await;
    }

    async fn recv(&mut self) -> Frame {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return frame;
            }
            let n = self.io.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed the connection");
            self.ready.extend(self.buffer.push(&buf[..n]).unwrap());
        }
    }

    fn decode(&self, frame: &Frame) -> Message {
        self.format.decode_message(&frame.payload).unwrap()
    }
}

fn serve(
    dispatcher: Arc<Dispatcher>,
    format: WireFormat,
) -> (Peer, JoinHandle<duplex_rpc::Result<()>>) {
    let (client, server) = duplex(64 * 1024);
    let task = tokio::spawn(Connection::new(dispatcher).wire_format(format).run(server));
    let peer = Peer {
        io: client,
        buffer: FrameBuffer::new(),
        ready: VecDeque::new(),
        format,
    };
    (peer, task)
}

fn client_message(kind: &str) -> Message {
    Message::new("Client", kind)
}

#[tokio::test]
async fn test_command_round_trip() {
    for format in [WireFormat::MsgPack, WireFormat::Json] {
        let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
        let (mut peer, _task) = serve(dispatcher, format);

        peer.request(
            frame_type::REQUEST_RESPONSE,
            1,
            "command",
            Some(client_message("Request-Response")),
        )
        .await;

        let reply = peer.recv().await;
        assert_eq!(reply.stream_id(), 1);
        assert_eq!(reply.frame_type(), frame_type::PAYLOAD);
        assert!(reply.is_next() && reply.is_complete());

        let message = peer.decode(&reply);
        assert_eq!(message.origin(), "Server");
        assert_eq!(message.interaction_type(), "Request-Response");
        assert_eq!(message.index(), None);
    }
}

#[tokio::test]
async fn test_notify_sends_no_response() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher, WireFormat::MsgPack);

    peer.request(frame_type::REQUEST_FNF, 1, "notify", Some(client_message("Fire-And-Forget")))
        .await;
    peer.request(
        frame_type::REQUEST_RESPONSE,
        3,
        "command",
        Some(client_message("Request-Response")),
    )
    .await;

    // The first frame back belongs to the command, not the notification.
    let reply = peer.recv().await;
    assert_eq!(reply.stream_id(), 3);
}

#[tokio::test]
async fn test_unknown_route_rejected() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher, WireFormat::MsgPack);

    peer.request(
        frame_type::REQUEST_RESPONSE,
        9,
        "bogus",
        Some(client_message("Request-Response")),
    )
    .await;

    let reply = peer.recv().await;
    assert_eq!(reply.frame_type(), frame_type::ERROR);
    assert_eq!(reply.stream_id(), 9);
    let (code, message) = reply.error_parts().unwrap();
    assert_eq!(code, error_codes::REJECTED);
    assert!(message.contains("bogus"));
}

#[tokio::test(start_paused = true)]
async fn test_request_type_must_match_route() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher.clone(), WireFormat::MsgPack);

    let mismatches = [
        (frame_type::REQUEST_RESPONSE, 1, "stream"),
        (frame_type::REQUEST_STREAM, 3, "command"),
        (frame_type::REQUEST_CHANNEL, 5, "stream"),
        (frame_type::REQUEST_RESPONSE, 7, "notify"),
    ];
    for (request_type, stream_id, route) in mismatches {
        peer.request(request_type, stream_id, route, Some(client_message("Mismatch")))
            .await;

        let reply = peer.recv().await;
        assert_eq!(reply.stream_id(), stream_id);
        assert_eq!(reply.frame_type(), frame_type::ERROR);
        assert_eq!(reply.error_parts().unwrap().0, error_codes::INVALID);
    }

    // Fire-and-forget never answers, even when misaddressed.
    peer.request(frame_type::REQUEST_FNF, 9, "stream", Some(client_message("Mismatch")))
        .await;
    peer.request(
        frame_type::REQUEST_RESPONSE,
        11,
        "command",
        Some(client_message("Request-Response")),
    )
    .await;
    assert_eq!(peer.recv().await.stream_id(), 11);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(dispatcher.scheduler().active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_active_stream_id_rejected() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher.clone(), WireFormat::MsgPack);

    peer.request(frame_type::REQUEST_STREAM, 1, "stream", Some(client_message("Stream")))
        .await;
    peer.request(frame_type::REQUEST_STREAM, 1, "stream", Some(client_message("Stream")))
        .await;

    let reply = peer.recv().await;
    assert_eq!(reply.stream_id(), 1);
    assert_eq!(reply.frame_type(), frame_type::ERROR);
    assert!(reply.error_parts().unwrap().1.contains("already active"));

    // The original stream keeps running.
    let element = peer.recv().await;
    assert!(element.is_next());
    assert_eq!(peer.decode(&element).index(), Some(0));
    assert_eq!(dispatcher.scheduler().active_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reused_stream_id_can_be_cancelled() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher.clone(), WireFormat::MsgPack);

    peer.request(frame_type::REQUEST_STREAM, 1, "stream", Some(client_message("Stream")))
        .await;
    let first = peer.recv().await;
    assert_eq!(peer.decode(&first).index(), Some(0));

    // Cancel and reopen the same ID in one write.
    let body = peer.format.encode_message(&client_message("Stream")).unwrap();
    let reopen = Frame::request(frame_type::REQUEST_STREAM, 1, "stream", &body).unwrap();
    peer.send_all(&[Frame::cancel(1), reopen]).await;

    // The new stream starts again from index 0.
    let element = peer.recv().await;
    assert_eq!(element.stream_id(), 1);
    assert_eq!(peer.decode(&element).index(), Some(0));
    assert_eq!(dispatcher.scheduler().active_count(), 1);

    peer.send(Frame::cancel(1)).await;
    peer.request(
        frame_type::REQUEST_RESPONSE,
        3,
        "command",
        Some(client_message("Request-Response")),
    )
    .await;
    assert_eq!(peer.recv().await.stream_id(), 3);
    assert_eq!(dispatcher.scheduler().active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_side_cancel_reported() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher.clone(), WireFormat::MsgPack);

    peer.request(frame_type::REQUEST_STREAM, 1, "stream", Some(client_message("Stream")))
        .await;
    assert!(peer.recv().await.is_next());

    assert_eq!(dispatcher.scheduler().cancel_all(), 1);

    let frame = peer.recv().await;
    assert_eq!(frame.stream_id(), 1);
    assert_eq!(frame.frame_type(), frame_type::ERROR);
    assert_eq!(frame.error_parts().unwrap().0, error_codes::CANCELED);
}

#[tokio::test(start_paused = true)]
async fn test_stream_until_cancelled() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher.clone(), WireFormat::MsgPack);

    let start = Instant::now();
    peer.request(frame_type::REQUEST_STREAM, 1, "stream", Some(client_message("Stream")))
        .await;

    for expected in 0..3u64 {
        let frame = peer.recv().await;
        assert_eq!(frame.stream_id(), 1);
        assert!(frame.is_next() && !frame.is_complete());

        let message = peer.decode(&frame);
        assert_eq!(message.interaction_type(), "Stream");
        assert_eq!(message.index(), Some(expected));
    }
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(dispatcher.scheduler().active_count(), 1);

    peer.send(Frame::cancel(1)).await;
    peer.request(
        frame_type::REQUEST_RESPONSE,
        3,
        "command",
        Some(client_message("Request-Response")),
    )
    .await;

    // Nothing more arrives for the cancelled stream, not even COMPLETE.
    let reply = peer.recv().await;
    assert_eq!(reply.stream_id(), 3);
    assert_eq!(dispatcher.scheduler().active_count(), 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    peer.request(
        frame_type::REQUEST_RESPONSE,
        5,
        "command",
        Some(client_message("Request-Response")),
    )
    .await;
    assert_eq!(peer.recv().await.stream_id(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_stream_completes() {
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .stream_interval(Duration::from_millis(100))
            .stream_limit(2)
            .build()
            .unwrap(),
    );
    let (mut peer, _task) = serve(dispatcher, WireFormat::MsgPack);

    peer.request(frame_type::REQUEST_STREAM, 1, "stream", Some(client_message("Stream")))
        .await;

    let first = peer.recv().await;
    let second = peer.recv().await;
    assert_eq!(peer.decode(&first).index(), Some(0));
    assert_eq!(peer.decode(&second).index(), Some(1));

    let done = peer.recv().await;
    assert!(done.is_complete() && !done.is_next());
}

#[tokio::test(start_paused = true)]
async fn test_channel_relays_in_order() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher.clone(), WireFormat::MsgPack);

    let start = Instant::now();
    peer.request(frame_type::REQUEST_CHANNEL, 7, "channel", Some(client_message("Channel")))
        .await;
    peer.send_element(7, client_message("Channel")).await;
    peer.send_element(7, client_message("Channel")).await;
    peer.send(Frame::complete(7)).await;

    for expected in 0..3u64 {
        let frame = peer.recv().await;
        assert_eq!(frame.stream_id(), 7);
        assert!(frame.is_next());

        let message = peer.decode(&frame);
        assert_eq!(message.origin(), "Server");
        assert_eq!(message.interaction_type(), "Channel");
        assert_eq!(message.index(), Some(expected));
    }
    assert!(start.elapsed() >= Duration::from_secs(1));

    let done = peer.recv().await;
    assert!(done.is_complete());
    assert_eq!(dispatcher.scheduler().active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_channel_without_first_element() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher, WireFormat::Json);

    peer.request(frame_type::REQUEST_CHANNEL, 2, "channel", None).await;
    peer.send(Frame::complete(2)).await;

    let done = peer.recv().await;
    assert_eq!(done.stream_id(), 2);
    assert!(done.is_complete() && !done.is_next());
}

#[tokio::test(start_paused = true)]
async fn test_channel_upstream_error() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, _task) = serve(dispatcher, WireFormat::MsgPack);

    peer.request(frame_type::REQUEST_CHANNEL, 4, "channel", Some(client_message("Channel")))
        .await;
    peer.send(Frame::error(4, error_codes::APPLICATION_ERROR, "boom"))
        .await;

    // The pending element is dropped; the failure arrives first.
    let frame = peer.recv().await;
    assert_eq!(frame.stream_id(), 4);
    assert_eq!(frame.frame_type(), frame_type::ERROR);

    let (code, message) = frame.error_parts().unwrap();
    assert_eq!(code, error_codes::APPLICATION_ERROR);
    assert!(message.contains("Upstream failure"));
    assert!(message.contains("boom"));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_subscriptions() {
    let dispatcher = Arc::new(Dispatcher::builder().build().unwrap());
    let (mut peer, task) = serve(dispatcher.clone(), WireFormat::MsgPack);

    peer.request(frame_type::REQUEST_STREAM, 1, "stream", Some(client_message("Stream")))
        .await;
    peer.request(frame_type::REQUEST_CHANNEL, 3, "channel", None).await;

    let first = peer.recv().await;
    assert_eq!(first.stream_id(), 1);
    assert_eq!(dispatcher.scheduler().active_count(), 2);

    drop(peer);
    task.await.unwrap().unwrap();
    assert_eq!(dispatcher.scheduler().active_count(), 0);
}
