use std::sync::Arc;

use rask::serve::Server;
use rask::transaction::Transaction;

fn handler(txn: &mut Transaction) {
    let body = b"hello from rask";
    match txn.write_body_start(body.len() as u64, "text/plain") {
        Ok(mut writer) => {
            let _ = writer.write(body);
            let _ = writer.close();
        }
        Err(err) => eprintln!("failed to write response: {err}"),
    }
}

fn main() {
    let mut server = Server::start(4, Arc::new(handler)).expect("failed to start server");
    println!("listening on {}", server.local_addr());

    // Serve until interrupted.
    let _ = std::io::stdin().lines().next();
    server.shutdown();
}
