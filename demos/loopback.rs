//! Loopback demo: a simulated instrument on localhost, polled by a tasklet,
//! with a "UI loop" draining the mailbox every tick.
//!
//! Run with `RUST_LOG=commlink=debug cargo run --example loopback`.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use commlink::transport::AcceptorConfig;
use commlink::{
    FramerConfig, MailboxConfig, MessageBody, OverflowPolicy, Session, SessionConfig,
    TaskletConfig, Tasklet, TcpAcceptor, TcpConfig, mailbox,
};

const TICK: Duration = Duration::from_millis(50);
const RUN_FOR: Duration = Duration::from_secs(2);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish(),
    )?;

    let acceptor = TcpAcceptor::bind(AcceptorConfig::new("127.0.0.1:0".parse()?))?;
    let addr = acceptor.local_addr();
    let instrument = thread::spawn(move || -> commlink::Result<()> {
        let config = SessionConfig::new("instrument", FramerConfig::lines());
        let device = Session::new(acceptor, config)?;
        device.connect()?;
        let (poster, mut inbox) = mailbox(MailboxConfig::default());
        let device = device.into_async(poster)?;
        let mut volts = 11.5_f64;
        while device.is_connected() {
            if let Some(message) = inbox.drain_one(Duration::from_millis(100)) {
                if let MessageBody::Data(request) = message.into_body() {
                    volts += 0.125;
                    let reply = match &request[..] {
                        b"MEAS:VOLT?" => format!("{volts:.3}"),
                        _ => "ERR unknown command".to_owned(),
                    };
                    device.send(reply.as_bytes())?;
                }
            }
        }
        Ok(())
    });

    let (poster, mut inbox) =
        mailbox(MailboxConfig::bounded(256, OverflowPolicy::DropOldest));
    let session = Arc::new(
        Session::new(TcpConfig::from(addr), SessionConfig::new("meter", FramerConfig::lines()))?
            .with_mailbox(poster.clone()),
    );
    session.connect()?;

    let tasklet = Tasklet::new(TaskletConfig::new("poller", 1), poster)?;
    let polled = Arc::clone(&session);
    tasklet.schedule(Duration::from_millis(200), move |ctx| {
        let body = match polled.request(b"MEAS:VOLT?", None) {
            Ok(frame) => MessageBody::Data(frame.into_payload()),
            Err(err) => MessageBody::Error((&err).into()),
        };
        ctx.post(body);
    });

    // Stand-in for a UI event loop: never blocks, drains once per tick.
    let started = Instant::now();
    while started.elapsed() < RUN_FOR {
        for message in inbox.drain_all() {
            match message.body() {
                MessageBody::Data(payload) => {
                    println!("[{}] reading {}", message.source(), String::from_utf8_lossy(payload));
                }
                MessageBody::Status(state) => println!("[{}] {state}", message.source()),
                MessageBody::Error(fault) => println!("[{}] error {fault}", message.source()),
                MessageBody::Custom(custom) => {
                    println!("[{}] custom #{}", message.source(), custom.tag());
                }
            }
        }
        thread::sleep(TICK);
    }

    tasklet.shutdown();
    session.disconnect();
    instrument.join().map_err(|_| "instrument thread panicked")??;

    let stats = commlink::metrics::snapshot();
    println!(
        "frames sent={} received={} requests={} avg latency={:?}us",
        stats.frames_sent,
        stats.frames_received,
        stats.requests,
        stats.avg_request_latency_us()
    );
    Ok(())
}
