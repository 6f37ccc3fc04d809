//! Poll a serial device with a line-based query and print the replies.
//!
//! Usage: `cargo run --example serial_poll -- /dev/ttyUSB0 [baud] [query]`.
//! Without arguments the available ports are listed.

use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use commlink::transport::available_ports;
use commlink::{
    FramerConfig, MailboxConfig, MessageBody, RetryPolicy, Session, SessionConfig, SerialConfig,
    Tasklet, TaskletConfig, mailbox,
};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const RUN_FOR: Duration = Duration::from_secs(10);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish(),
    )?;

    let mut args = env::args().skip(1);
    let Some(port) = args.next() else {
        println!("available ports:");
        for port in available_ports()? {
            println!("  {port}");
        }
        return Ok(());
    };
    let baud = args.next().map(|raw| raw.parse()).transpose()?.unwrap_or(115_200);
    let query = args.next().unwrap_or_else(|| "*IDN?".to_owned());

    let (poster, mut inbox) = mailbox(MailboxConfig::default());
    let config = SessionConfig::new("serial", FramerConfig::lines())
        .with_request_timeout(Duration::from_millis(300))
        .with_retry(RetryPolicy::new(3, Duration::from_millis(50)));
    let session = Arc::new(
        Session::new(SerialConfig::new(port).with_baud_rate(baud), config)?
            .with_mailbox(poster.clone()),
    );

    let tasklet = Tasklet::new(TaskletConfig::default(), poster)?;
    let polled = Arc::clone(&session);
    tasklet.schedule(POLL_INTERVAL, move |ctx| {
        // Reconnect cadence is ours to choose: try again on every tick.
        if !polled.is_connected() && polled.connect().is_err() {
            return;
        }
        let body = match polled.request(query.as_bytes(), None) {
            Ok(frame) => MessageBody::Data(frame.into_payload()),
            Err(err) => MessageBody::Error((&err).into()),
        };
        ctx.post(body);
    });

    let started = Instant::now();
    while started.elapsed() < RUN_FOR {
        if let Some(message) = inbox.drain_one(Duration::from_millis(100)) {
            match message.into_body() {
                MessageBody::Data(reply) => println!("<- {}", String::from_utf8_lossy(&reply)),
                MessageBody::Error(fault) => eprintln!("!! {fault}"),
                MessageBody::Status(state) => println!("-- {state}"),
                MessageBody::Custom(_) => {}
            }
        }
    }

    tasklet.shutdown();
    session.disconnect();
    Ok(())
}
