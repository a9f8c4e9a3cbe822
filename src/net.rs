use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use tracing::error;

use crate::worker::WorkerSession;
use crate::{critical, Result};

/// Connection events delivered by the acceptor to the server core.
///
/// Messages from one connection are delivered in arrival order; different
/// connections run on independent reader threads.
pub trait SessionEvents: Send + Sync {
    /// A connection was accepted; returns the registered session
    fn on_connect(&self, stream: TcpStream, addr: SocketAddr) -> Result<Arc<WorkerSession>>;
    /// One whole line arrived, CR/LF stripped. An error is fatal to the
    /// process (the event log is gone)
    fn on_message(&self, session: &Arc<WorkerSession>, line: &str) -> Result<()>;
    /// The connection ended: peer close, read error or server-side close
    fn on_close(&self, session: &Arc<WorkerSession>) -> Result<()>;
}

/// Accepts worker connections forever, one reader thread per connection
pub fn serve<H: SessionEvents + 'static>(listener: TcpListener, handler: Arc<H>) {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                let handler = handler.clone();
                let spawned = thread::Builder::new()
                    .name("conn-reader".into())
                    .spawn(move || session_loop(stream, addr, handler));
                if let Err(e) = spawned {
                    error!(%addr, %e, "error spawning reader thread");
                }
            }
            Err(e) => {
                error!(%e, "error accepting connection");
                thread::sleep(std::time::Duration::from_millis(100));
            }
        }
    }
}

fn session_loop<H: SessionEvents>(stream: TcpStream, addr: SocketAddr, handler: Arc<H>) {
    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            error!(%addr, %e, "error splitting connection");
            return;
        }
    };
    let session = match handler.on_connect(write_half, addr) {
        Ok(session) => session,
        Err(e) => critical(&format!("connection setup failed: {}", e)),
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let message = line.trim_end_matches(['\r', '\n']);
                if message.is_empty() {
                    continue;
                }
                if let Err(e) = handler.on_message(&session, message) {
                    critical(&format!("event log failure: {}", e));
                }
            }
        }
    }
    if let Err(e) = handler.on_close(&session) {
        critical(&format!("event log failure: {}", e));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SessionEvents for Recorder {
        fn on_connect(&self, stream: TcpStream, addr: SocketAddr) -> Result<Arc<WorkerSession>> {
            self.events.lock().push("connect".to_owned());
            Ok(Arc::new(WorkerSession::new(0, stream, addr)))
        }
        fn on_message(&self, _session: &Arc<WorkerSession>, line: &str) -> Result<()> {
            self.events.lock().push(format!("message {}", line));
            Ok(())
        }
        fn on_close(&self, _session: &Arc<WorkerSession>) -> Result<()> {
            self.events.lock().push("close".to_owned());
            Ok(())
        }
    }

    #[test]
    fn test_line_delivery_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let recorder = Arc::new(Recorder::default());
        let handler = recorder.clone();
        thread::spawn(move || serve(listener, handler));

        let mut peer = TcpStream::connect(addr).unwrap();
        peer.write_all(b"Info A sp\r\n\nSelfPlay 10 (x)\n").unwrap();
        peer.flush().unwrap();
        drop(peer);

        // the reader thread drains the connection, then reports the close
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while recorder.events.lock().last().map(String::as_str) != Some("close") {
            assert!(std::time::Instant::now() < deadline, "reader did not finish");
            thread::sleep(Duration::from_millis(10));
        }
        let events = recorder.events.lock();
        assert_eq!(
            *events,
            vec![
                "connect".to_owned(),
                "message Info A sp".to_owned(),
                "message SelfPlay 10 (x)".to_owned(),
                "close".to_owned(),
            ]
        );
    }
}
