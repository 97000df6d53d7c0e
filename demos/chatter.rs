//! Publish and receive a topic across two processes.
//!
//! Start a listener, then a talker, in two terminals:
//!
//! ```text
//! cargo run --example chatter -- listen
//! cargo run --example chatter -- talk
//! ```
//!
//! Set `RUST_LOG=topiclink=debug` to see connections being built.

use std::thread;
use std::time::Duration;
use topiclink::impl_rkyv_codec;
use topiclink::prelude::*;
use tracing_subscriber::EnvFilter;

const TOPIC: &str = "/demo/chatter";

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Clone, Debug, Default)]
struct Chatter {
    seq: u64,
    text: String,
}

impl_rkyv_codec!(Chatter);

fn talk(node: &Node) -> Result<()> {
    let publisher = node.advertise::<Chatter>(TOPIC, AdvertiseOptions::latched())?;
    for seq in 0.. {
        let msg = Chatter {
            seq,
            text: format!("hello #{seq}"),
        };
        match publisher.publish(&msg) {
            Ok(()) => println!("sent {}", msg.text),
            Err(e) => println!("dropped #{seq}: {e}"),
        }
        thread::sleep(Duration::from_millis(500));
    }
    Ok(())
}

fn listen(node: &Node) -> Result<()> {
    let subscriber = node.subscribe::<Chatter, _>(TOPIC, |msg| {
        println!("heard #{}: {}", msg.seq, msg.text);
    })?;

    loop {
        subscriber.dispatch();
        thread::sleep(Duration::from_millis(50));
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    topiclink::observability::init_metrics();
    let node = Node::new(TransportConfig::default());

    match std::env::args().nth(1).as_deref() {
        Some("talk") => talk(&node),
        Some("listen") => listen(&node),
        _ => {
            eprintln!("usage: chatter <talk|listen>");
            Ok(())
        }
    }
}
