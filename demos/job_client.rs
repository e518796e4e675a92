//! Job client - submit one job to an aerobio server and print its progress.
//!
//! This example demonstrates:
//! - Building a client with a `DispatchTable` of per-operation handlers
//! - Sending a keyword-tagged job message from the app task
//! - Stopping the connection from inside a handler
//!
//! # Running
//!
//! ```text
//! cargo run --example job_client -- run phase0 exp-17 ws://localhost:7070/ws
//! ```
//!
//! Set `RUST_LOG=aerobio_client=debug` to watch the window bookkeeping.

use aerobio_client::{
    Client, ConnectionHandle, DispatchTable, Keyword, Operation, Value,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "ws://localhost:7070/ws";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(cmd), Some(action), Some(eid)) = (args.next(), args.next(), args.next()) else {
        eprintln!("usage: job_client <cmd> <action> <eid> [url]");
        std::process::exit(2);
    };
    let url = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());

    let table = DispatchTable::new()
        .on(Operation::Msg, |conn: &ConnectionHandle, payload: Value| {
            println!("{payload}");
            // The server tags its final report with :done.
            if payload.get("done").is_some() {
                conn.stop_with("job finished");
            }
        })
        .on(Operation::BpWait, |_: &ConnectionHandle, payload: Value| {
            println!("waiting on server window: {payload}");
        })
        .on(Operation::Close, |_: &ConnectionHandle, payload: Value| {
            println!("server closed the connection: {payload}");
        })
        .on(Operation::Stop, |conn: &ConnectionHandle, payload: Value| {
            println!("connection {} stopped: {payload}", conn.id());
        });

    let client = Client::builder()
        .url(url)
        .dispatcher(table)
        .app_task(move |conn| async move {
            let data = Value::map()
                .kw("cmd", cmd.as_str())
                .kw("action", action.as_str())
                .kw("eid", eid.as_str())
                .build();
            let job = Value::map()
                .kw("op", Keyword::new(&cmd))
                .kw("data", data)
                .build();
            if let Err(e) = conn.send_msg(job).await {
                eprintln!("job not sent: {e}");
            }
        })
        .connect()
        .await?;

    client.wait_for_shutdown().await?;
    Ok(())
}
