//! Integration tests for the close handshake.
//!
//! The far end is a bare [`UdpChannel`] driven by hand, so each test decides
//! exactly which frames the session sees and when.

use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use reliable_udp::{
    Channel, ChannelError, FrameType, Packet, Session, SessionConfig, SessionError, SessionState,
    TimerConfig, UdpChannel,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> UdpChannel {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    UdpChannel::bind(addr).await.expect("bind failed")
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        timers: TimerConfig {
            retransmit_timeout: Duration::from_millis(40),
            close_grace: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(1),
        },
        ..SessionConfig::default()
    }
}

/// Next frame arriving at `chan`, or `None` if nothing shows up in `within`.
async fn next_frame(chan: &UdpChannel, within: Duration) -> Option<Packet> {
    match tokio::time::timeout(within, chan.recv_from()).await {
        Ok(Ok((bytes, _))) => Some(Packet::decode(&bytes).expect("session sent a bad frame")),
        _ => None,
    }
}

async fn receive(session: &mut Session) -> Result<Vec<u8>, SessionError> {
    tokio::time::timeout(Duration::from_secs(2), session.receive())
        .await
        .expect("receive timed out")
}

/// A session whose peer is a raw channel under the test's control.
async fn session_with_raw_peer() -> (Session, UdpChannel) {
    let raw = ephemeral().await;
    let session = Session::with_channel(ephemeral().await, raw.local_addr(), fast_config())
        .expect("open session");
    (session, raw)
}

// ---------------------------------------------------------------------------
// Active close
// ---------------------------------------------------------------------------

/// `close` must not complete until the FIN is acknowledged; afterwards the
/// loop is gone and nothing the peer sends is acknowledged.
#[tokio::test]
async fn close_waits_for_fin_ack_then_goes_silent() {
    let (mut session, raw) = session_with_raw_peer().await;
    let session_addr = session.local_addr();

    {
        let close = session.close();
        tokio::pin!(close);

        // Unacknowledged: FIN keeps being retransmitted and close hangs.
        assert!(
            tokio::time::timeout(Duration::from_millis(150), &mut close)
                .await
                .is_err(),
            "close finished without a FIN ACK"
        );
        let fin = next_frame(&raw, Duration::from_secs(1))
            .await
            .expect("no FIN seen");
        assert_eq!(fin.kind, FrameType::Fin);
        assert_eq!(fin.seq, 0, "FIN carries next_seq");

        raw.send_to(&Packet::ack(0).encode(), session_addr)
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(3), close)
            .await
            .expect("close did not finish after FIN ACK")
            .expect("close failed");
    }

    assert_eq!(session.state(), SessionState::Closed);

    // Drain any FIN retransmissions still in the socket buffer.
    while next_frame(&raw, Duration::from_millis(50)).await.is_some() {}

    raw.send_to(&Packet::data(0, b"too late".to_vec()).encode(), session_addr)
        .await
        .unwrap();
    assert!(
        next_frame(&raw, Duration::from_millis(300)).await.is_none(),
        "closed session still acknowledges DATA"
    );
}

/// The FIN uses the next unsent sequence number without consuming it.
#[tokio::test]
async fn fin_sequence_follows_data() {
    let (mut session, raw) = session_with_raw_peer().await;
    let session_addr = session.local_addr();

    let peer = async {
        for expected in 0..2u32 {
            let frame = next_frame(&raw, Duration::from_secs(2))
                .await
                .expect("no DATA");
            assert_eq!(frame.kind, FrameType::Data);
            assert_eq!(frame.seq, expected);
            raw.send_to(&Packet::ack(frame.seq).encode(), session_addr)
                .await
                .unwrap();
        }
        let fin = next_frame(&raw, Duration::from_secs(2))
            .await
            .expect("no FIN");
        assert_eq!(fin.kind, FrameType::Fin);
        assert_eq!(fin.seq, 2);
        raw.send_to(&Packet::ack(fin.seq).encode(), session_addr)
            .await
            .unwrap();
    };
    let local = async {
        session.send(b"one").await.expect("send one");
        session.send(b"two").await.expect("send two");
        session.close().await.expect("close");
    };

    tokio::time::timeout(Duration::from_secs(10), async { tokio::join!(peer, local) })
        .await
        .expect("exchange timed out");

    assert_eq!(session.send_sequence(), 2);
}

#[tokio::test]
async fn operations_after_close_report_bad_state() {
    let (mut session, raw) = session_with_raw_peer().await;
    let session_addr = session.local_addr();

    let peer = async {
        let fin = next_frame(&raw, Duration::from_secs(2)).await.expect("no FIN");
        raw.send_to(&Packet::ack(fin.seq).encode(), session_addr)
            .await
            .unwrap();
    };
    let (_, closed) = tokio::join!(peer, session.close());
    closed.expect("close");

    assert!(matches!(
        session.send(b"x").await,
        Err(SessionError::BadState(SessionState::Closed))
    ));
    assert!(matches!(
        session.receive().await,
        Err(SessionError::BadState(SessionState::Closed))
    ));
    session.close().await.expect("repeat close is a no-op");
}

/// Channel whose pending receive cannot be interrupted.
struct Unstoppable(UdpChannel);

impl Channel for Unstoppable {
    fn send_to(
        &self,
        bytes: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send {
        self.0.send_to(bytes, dest)
    }

    fn recv_from(
        &self,
    ) -> impl Future<Output = Result<(Vec<u8>, SocketAddr), ChannelError>> + Send {
        self.0.recv_from()
    }

    fn stop_receiving(&self) {}

    fn local_addr(&self) -> SocketAddr {
        self.0.local_addr()
    }
}

/// A receive loop that ignores the stop request is abandoned after
/// `shutdown_timeout`; `close` still succeeds.
#[tokio::test]
async fn close_completes_when_loop_cannot_be_stopped() {
    let raw = ephemeral().await;
    let config = SessionConfig {
        timers: TimerConfig {
            retransmit_timeout: Duration::from_millis(40),
            close_grace: Duration::ZERO,
            shutdown_timeout: Duration::from_millis(200),
        },
        ..SessionConfig::default()
    };
    let mut session =
        Session::with_channel(Unstoppable(ephemeral().await), raw.local_addr(), config)
            .expect("open session");
    let session_addr = session.local_addr();

    let peer = async {
        let fin = next_frame(&raw, Duration::from_secs(2)).await.expect("no FIN");
        assert_eq!(fin.kind, FrameType::Fin);
        raw.send_to(&Packet::ack(fin.seq).encode(), session_addr)
            .await
            .unwrap();
    };
    let started = Instant::now();
    let ((), closed) = tokio::time::timeout(Duration::from_secs(3), async {
        tokio::join!(peer, session.close())
    })
    .await
    .expect("close hung on a loop that would not stop");

    closed.expect("close");
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(session.state(), SessionState::Closed);
}

// ---------------------------------------------------------------------------
// Passive close
// ---------------------------------------------------------------------------

/// The peer's FIN ends the stream only after every earlier fragment.
#[tokio::test]
async fn peer_fin_yields_eof_after_pending_data() {
    let (mut session, raw) = session_with_raw_peer().await;
    let session_addr = session.local_addr();

    // FIN first, then the two fragments it follows.
    for pkt in [
        Packet::fin(2),
        Packet::data(1, b"second".to_vec()),
        Packet::data(0, b"first".to_vec()),
    ] {
        raw.send_to(&pkt.encode(), session_addr).await.unwrap();
    }

    let mut acked = Vec::new();
    for _ in 0..3 {
        let ack = next_frame(&raw, Duration::from_secs(2))
            .await
            .expect("missing ACK");
        assert_eq!(ack.kind, FrameType::Ack);
        acked.push(ack.seq);
    }
    acked.sort_unstable();
    assert_eq!(acked, vec![0, 1, 2]);

    assert_eq!(receive(&mut session).await.unwrap(), b"first");
    assert_eq!(receive(&mut session).await.unwrap(), b"second");
    assert!(matches!(receive(&mut session).await, Err(SessionError::Eof)));
    assert!(session.peer_closed());
    // End of stream is sticky.
    assert!(matches!(receive(&mut session).await, Err(SessionError::Eof)));
}

/// A retransmitted FIN is acknowledged again.
#[tokio::test]
async fn duplicate_fin_acknowledged_each_time() {
    let (session, raw) = session_with_raw_peer().await;
    let session_addr = session.local_addr();

    for _ in 0..2 {
        raw.send_to(&Packet::fin(0).encode(), session_addr)
            .await
            .unwrap();
        let ack = next_frame(&raw, Duration::from_secs(2))
            .await
            .expect("FIN not acknowledged");
        assert_eq!(ack, Packet::ack(0));
    }
    assert!(session.peer_closed());
}
