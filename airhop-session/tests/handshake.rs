use airhop_core::{PROTOCOL_VERSION, Role, TransferMode};
use airhop_session::{
    SessionError, SessionOptions,
    codec::{read_u64, write_u64},
    handshake::{handshake, negotiate_version},
};
use tokio::io::duplex;

fn options_with_version(protocol_version: u64) -> SessionOptions {
    SessionOptions {
        protocol_version,
        ..SessionOptions::default()
    }
}

async fn run_pair(
    host_mode: TransferMode,
    host_version: u64,
    joiner_mode: TransferMode,
    joiner_version: u64,
) -> (Result<(), SessionError>, Result<(), SessionError>) {
    let (mut host_io, mut joiner_io) = duplex(1024);
    let host_options = options_with_version(host_version);
    let joiner_options = options_with_version(joiner_version);
    tokio::join!(
        handshake(&mut host_io, Role::Hosting, host_mode, &host_options),
        handshake(&mut joiner_io, Role::Joining, joiner_mode, &joiner_options),
    )
}

#[tokio::test]
async fn complementary_modes_with_equal_versions_proceed() {
    let (host, joiner) = run_pair(
        TransferMode::Receive,
        PROTOCOL_VERSION,
        TransferMode::Send,
        PROTOCOL_VERSION,
    )
    .await;
    host.expect("host handshake");
    joiner.expect("joiner handshake");
}

#[tokio::test]
async fn same_mode_aborts_both_sides() {
    for mode in [TransferMode::Send, TransferMode::Receive] {
        let (host, joiner) = run_pair(mode, PROTOCOL_VERSION, mode, PROTOCOL_VERSION).await;
        assert!(
            matches!(host, Err(SessionError::ModeConflict(m)) if m == mode),
            "host: {host:?}"
        );
        assert!(
            matches!(joiner, Err(SessionError::ModeConflict(m)) if m == mode),
            "joiner: {joiner:?}"
        );
    }
}

#[tokio::test]
async fn differing_versions_abort_both_sides() {
    for (host_version, joiner_version) in [(7, 8), (8, 7), (8, 12)] {
        let (host, joiner) = run_pair(
            TransferMode::Receive,
            host_version,
            TransferMode::Send,
            joiner_version,
        )
        .await;
        assert!(
            matches!(host, Err(SessionError::VersionIncompatible { .. })),
            "host {host_version} vs {joiner_version}: {host:?}"
        );
        assert!(
            matches!(joiner, Err(SessionError::VersionIncompatible { .. })),
            "joiner {joiner_version} vs {host_version}: {joiner:?}"
        );
    }
}

#[tokio::test]
async fn newer_side_honours_older_peer_approval() {
    let (mut ours, mut theirs) = duplex(64);
    let older_peer = tokio::spawn(async move {
        write_u64(&mut theirs, 7).await.expect("peer version");
        let announced = read_u64(&mut theirs).await.expect("read our version");
        // An older build that accepts newer peers says yes.
        write_u64(&mut theirs, 1).await.expect("verdict");
        announced
    });

    let peer = negotiate_version(&mut ours, 8).await.expect("approved");
    assert_eq!(peer, 7);
    assert_eq!(older_peer.await.expect("peer task"), 8);
}

#[tokio::test]
async fn newer_side_honours_older_peer_rejection() {
    let (mut ours, mut theirs) = duplex(64);
    tokio::spawn(async move {
        write_u64(&mut theirs, 3).await.expect("peer version");
        read_u64(&mut theirs).await.expect("read our version");
        write_u64(&mut theirs, 0).await.expect("verdict");
    });

    let err = negotiate_version(&mut ours, 8).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::VersionIncompatible { local: 8, peer: 3 }
    ));
}

#[tokio::test]
async fn peer_hanging_up_mid_handshake_is_connection_closed() {
    let (mut ours, theirs) = duplex(64);
    drop(theirs);
    let err = handshake(
        &mut ours,
        Role::Joining,
        TransferMode::Send,
        &SessionOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SessionError::ConnectionClosed));
}
