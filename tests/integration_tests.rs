//! End-to-end tests over real TCP connections

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use mailsink::{Email, SmtpServer};

/// Bind an ephemeral port and run the server on a background task
async fn start_test_server(server: SmtpServer) -> (SocketAddr, mpsc::UnboundedReceiver<Email>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        server.start_with_listener(listener, tx).await.unwrap();
    });

    (addr, rx)
}

async fn start_default_server() -> (SocketAddr, mpsc::UnboundedReceiver<Email>) {
    start_test_server(SmtpServer::new("localhost")).await
}

/// Read one reply line (the server writes each reply in a single burst)
async fn read_reply(stream: &mut TcpStream) -> String {
    let mut buffer = [0u8; 256];
    let count = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buffer))
        .await
        .expect("reply should arrive before the test gives up")
        .expect("read should succeed");
    String::from_utf8_lossy(&buffer[..count]).into_owned()
}

/// Send one command and wait for the reply
async fn send_command(stream: &mut TcpStream, command: &str) -> String {
    stream.write_all(command.as_bytes()).await.unwrap();
    read_reply(stream).await
}

/// Read until the peer closes; whatever arrives first is returned
async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut collected = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut collected))
        .await
        .expect("server should close the connection")
        .expect("read should succeed");
    collected
}

#[tokio::test]
async fn happy_helo_path() {
    let (addr, mut rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let greeting = read_reply(&mut stream).await;
    assert!(greeting.starts_with("220 localhost"));
    assert!(greeting.ends_with("\r\n"));

    assert_eq!(
        send_command(&mut stream, "HELO client.example\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(
        send_command(&mut stream, "MAIL FROM:<a@x>\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(
        send_command(&mut stream, "RCPT TO:<b@y>\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(send_command(&mut stream, "DATA\r\n").await, "354 localhost\r\n");
    assert_eq!(
        send_command(&mut stream, "hi\r\n.\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(send_command(&mut stream, "QUIT\r\n").await, "221 localhost\r\n");

    // Server closes after the QUIT acknowledgement.
    assert!(read_until_close(&mut stream).await.is_empty());

    let email = rx.recv().await.unwrap();
    assert_eq!(email.from, "a@x");
    assert_eq!(email.to, vec!["b@y"]);
    assert_eq!(email.data, "hi");
}

#[tokio::test]
async fn ehlo_path_gets_a_single_line_reply() {
    let (addr, mut rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    assert_eq!(
        send_command(&mut stream, "EHLO client.example\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(
        send_command(&mut stream, "MAIL FROM:<a@x>\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(
        send_command(&mut stream, "RCPT TO:<b@y>\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(send_command(&mut stream, "DATA\r\n").await, "354 localhost\r\n");
    assert_eq!(
        send_command(&mut stream, "hello\r\n.\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(send_command(&mut stream, "QUIT\r\n").await, "221 localhost\r\n");

    let email = rx.recv().await.unwrap();
    assert_eq!(email.data, "hello");
}

#[tokio::test]
async fn unknown_verb_closes_without_a_reply() {
    let (addr, _rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    stream.write_all(b"FOOO\r\n").await.unwrap();
    assert!(read_until_close(&mut stream).await.is_empty());
}

#[tokio::test]
async fn lowercase_verbs_are_accepted() {
    let (addr, _rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    assert_eq!(
        send_command(&mut stream, "helo client.example\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(
        send_command(&mut stream, "mail from:<a@x>\r\n").await,
        "250 localhost\r\n"
    );
}

#[tokio::test]
async fn out_of_order_rcpt_closes_without_a_reply() {
    let (addr, _rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    assert_eq!(
        send_command(&mut stream, "HELO x\r\n").await,
        "250 localhost\r\n"
    );

    stream.write_all(b"RCPT TO:<b@y>\r\n").await.unwrap();
    assert!(read_until_close(&mut stream).await.is_empty());
}

#[tokio::test]
async fn malformed_mail_closes_without_a_reply() {
    let (addr, _rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    assert_eq!(
        send_command(&mut stream, "HELO x\r\n").await,
        "250 localhost\r\n"
    );

    stream.write_all(b"MAIL FROM:a@x\r\n").await.unwrap();
    assert!(read_until_close(&mut stream).await.is_empty());
}

#[tokio::test]
async fn read_timeout_terminates_an_idle_connection() {
    let server = SmtpServer::new("localhost").timeouts(1, 1, 1);
    let (addr, _rx) = start_test_server(server).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    // Send nothing; the read timer should fire and close the socket.
    let started = std::time::Instant::now();
    assert!(read_until_close(&mut stream).await.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(900));

    // The server survives and keeps serving fresh connections.
    let mut next = TcpStream::connect(addr).await.unwrap();
    assert!(read_reply(&mut next).await.starts_with("220 "));
}

#[tokio::test]
async fn capacity_cap_refuses_the_excess_socket() {
    let server = SmtpServer::new("localhost").max_connections(1);
    let (addr, _rx) = start_test_server(server).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    assert!(read_reply(&mut first).await.starts_with("220 "));

    let mut second = TcpStream::connect(addr).await.unwrap();
    assert!(
        read_until_close(&mut second).await.is_empty(),
        "the excess socket should be shut down without a greeting"
    );

    // The first connection continues normally.
    assert_eq!(
        send_command(&mut first, "HELO x\r\n").await,
        "250 localhost\r\n"
    );
}

#[tokio::test]
async fn command_length_boundaries() {
    let (addr, _rx) = start_default_server().await;

    // Length 1024 is accepted on its content.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;
    let mut longest = String::from("HELO ");
    longest.push_str(&"a".repeat(1024 - longest.len() - 2));
    longest.push_str("\r\n");
    assert_eq!(longest.len(), 1024);
    assert_eq!(send_command(&mut stream, &longest).await, "250 localhost\r\n");

    // Length 1025 is rejected.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;
    let mut too_long = String::from("HELO ");
    too_long.push_str(&"a".repeat(1025 - too_long.len() - 2));
    too_long.push_str("\r\n");
    assert_eq!(too_long.len(), 1025);
    stream.write_all(too_long.as_bytes()).await.unwrap();
    assert!(read_until_close(&mut stream).await.is_empty());

    // Length 3 is rejected as too short.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;
    stream.write_all(b"QU\r").await.unwrap();
    assert!(read_until_close(&mut stream).await.is_empty());
}

#[tokio::test]
async fn empty_reverse_path_is_accepted() {
    let (addr, mut rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    assert_eq!(
        send_command(&mut stream, "HELO x\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(
        send_command(&mut stream, "MAIL FROM:<>\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(
        send_command(&mut stream, "RCPT TO:<b@y>\r\n").await,
        "250 localhost\r\n"
    );
    assert_eq!(send_command(&mut stream, "DATA\r\n").await, "354 localhost\r\n");
    assert_eq!(
        send_command(&mut stream, "x\r\n.\r\n").await,
        "250 localhost\r\n"
    );

    let email = rx.recv().await.unwrap();
    assert_eq!(email.from, "");
}

#[tokio::test]
async fn read_timeout_during_body_kills_the_connection_without_250() {
    let server = SmtpServer::new("localhost").timeouts(1, 1, 1);
    let (addr, mut rx) = start_test_server(server).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    send_command(&mut stream, "HELO x\r\n").await;
    send_command(&mut stream, "MAIL FROM:<a@x>\r\n").await;
    send_command(&mut stream, "RCPT TO:<b@y>\r\n").await;
    assert_eq!(send_command(&mut stream, "DATA\r\n").await, "354 localhost\r\n");

    // Body without a terminator, then silence until the timer fires.
    stream.write_all(b"partial body\r\n").await.unwrap();
    assert!(
        read_until_close(&mut stream).await.is_empty(),
        "no 250 may arrive for an unterminated body"
    );
    assert!(rx.try_recv().is_err(), "no message may be handed off");
}

#[tokio::test]
async fn body_terminator_is_found_across_chunks() {
    let (addr, mut rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    send_command(&mut stream, "HELO x\r\n").await;
    send_command(&mut stream, "MAIL FROM:<a@x>\r\n").await;
    send_command(&mut stream, "RCPT TO:<b@y>\r\n").await;
    assert_eq!(send_command(&mut stream, "DATA\r\n").await, "354 localhost\r\n");

    // Split the terminator over three writes with pauses so each lands
    // in its own read.
    stream.write_all(b"split body\r").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(b"\n.").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(b"\r\n").await.unwrap();

    assert_eq!(read_reply(&mut stream).await, "250 localhost\r\n");

    let email = rx.recv().await.unwrap();
    assert_eq!(email.data, "split body");
}

#[tokio::test]
async fn multiple_recipients_are_recorded() {
    let (addr, mut rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    send_command(&mut stream, "HELO client.local\r\n").await;
    send_command(&mut stream, "MAIL FROM:<sender@example.com>\r\n").await;
    send_command(&mut stream, "RCPT TO:<recipient1@example.com>\r\n").await;
    send_command(&mut stream, "RCPT TO:<recipient2@example.com>\r\n").await;
    send_command(&mut stream, "DATA\r\n").await;
    send_command(&mut stream, "Subject: Multiple Recipients\r\n\r\nhello\r\n.\r\n").await;
    send_command(&mut stream, "QUIT\r\n").await;

    let email = rx.recv().await.unwrap();
    assert_eq!(email.from, "sender@example.com");
    assert_eq!(email.to.len(), 2);
    assert!(email.has_recipient("recipient1@example.com"));
    assert!(email.has_recipient("recipient2@example.com"));
    assert_eq!(email.get_subject(), Some("Multiple Recipients"));
    assert_eq!(email.get_body(), Some("hello"));
}

#[tokio::test]
async fn only_quit_is_honoured_after_the_body() {
    let (addr, mut rx) = start_default_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_reply(&mut stream).await;

    send_command(&mut stream, "HELO x\r\n").await;
    send_command(&mut stream, "MAIL FROM:<a@x>\r\n").await;
    send_command(&mut stream, "RCPT TO:<b@y>\r\n").await;
    send_command(&mut stream, "DATA\r\n").await;
    assert_eq!(
        send_command(&mut stream, "hi\r\n.\r\n").await,
        "250 localhost\r\n"
    );

    // A second transaction on the same connection is rejected.
    stream.write_all(b"MAIL FROM:<c@z>\r\n").await.unwrap();
    assert!(read_until_close(&mut stream).await.is_empty());

    // The first message was still handed off.
    assert_eq!(rx.recv().await.unwrap().data, "hi");
}
