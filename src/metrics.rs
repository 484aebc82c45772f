use lazy_static::lazy_static;
use log::{error, info};
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};
use rouille::{router, Request, Response};
use std::thread;

lazy_static! {
    pub static ref PACKETS_SENT: IntCounter = register_int_counter!(
        "wolgate_packets_sent_total",
        "Magic packet datagrams written to a target."
    )
    .unwrap();
    pub static ref DATAGRAMS_RECEIVED: IntCounter = register_int_counter!(
        "wolgate_datagrams_received_total",
        "Datagrams read by the proxy daemon."
    )
    .unwrap();
    pub static ref DATAGRAMS_DISCARDED: IntCounterVec = register_int_counter_vec!(
        "wolgate_datagrams_discarded_total",
        "Datagrams the proxy daemon dropped without relaying.",
        &["reason"]
    )
    .unwrap();
    pub static ref RELAYS: IntCounter = register_int_counter!(
        "wolgate_relays_total",
        "Wakeups relayed by the proxy daemon."
    )
    .unwrap();
}

pub fn render() -> Result<String, prometheus::Error> {
    let metrics = prometheus::gather();
    let encoder = prometheus::TextEncoder::new();
    encoder.encode_to_string(&metrics)
}

fn varz(request: &Request) -> Response {
    router!(request,
        (GET) (/varz) => {
            match render() {
                Ok(body) => Response::text(body),
                Err(e) => Response::text(e.to_string()).with_status_code(500),
            }
        },
        _ => Response::empty_404()
    )
}

/// Serves `/varz` on a background thread.
pub fn serve(addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || match rouille::Server::new(&addr, varz) {
        Ok(server) => {
            info!("Serving metrics on http://{}/varz", server.server_addr());
            server.run();
        }
        Err(err) => error!("{}: metrics server failed: {}", addr, err),
    })
}
