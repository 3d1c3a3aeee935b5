use std::env;

use tokio::sync::mpsc;
use tracing::{error, info};

use mailsink::{Email, SmtpServer};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8425".to_string());
    let hostname = env::args().nth(2).unwrap_or_else(|| "localhost".to_string());

    info!("starting mailsink SMTP server on {addr} as {hostname}");

    let (tx, mut rx) = mpsc::unbounded_channel::<Email>();

    tokio::spawn(async move {
        let mut count: u64 = 0;
        while let Some(email) = rx.recv().await {
            count += 1;
            info!(
                "received email #{count} from: {} to: {:?}",
                email.from, email.to
            );
            if let Some(subject) = email.get_subject() {
                info!("  subject: {subject}");
            }
        }
    });

    let server = SmtpServer::new(&hostname);
    if let Err(e) = server.start(&addr, tx).await {
        error!("failed to start server: {e}");
        std::process::exit(1);
    }
}
