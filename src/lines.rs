//! Line reader
//!
//! Turns any byte stream into a lazy sequence of text lines. The read loop
//! runs on its own thread and hands each line over a rendezvous channel, so
//! the reader never runs more than one line ahead of the consumer.

use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;
use tracing::debug;

/// Lines produced by [`read_lines`]
///
/// Each item keeps its trailing `\n`. Bytes that are not valid UTF-8 come
/// through as U+FFFD. The sequence ends at end of stream or on the first
/// read error; it cannot be restarted.
pub struct Lines {
    rx: Receiver<String>,
}

impl Iterator for Lines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.rx.recv().ok()
    }
}

/// Start reading `reader` line by line
pub fn read_lines<R>(reader: R) -> Lines
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(0);

    thread::spawn(move || pump(BufReader::new(reader), tx));

    Lines { rx }
}

fn pump<R: BufRead>(mut reader: R, tx: SyncSender<String>) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) if buf.last() != Some(&b'\n') => {
                // Unterminated tail: the stream ended mid-line.
                debug!("Dropping {} trailing bytes without line terminator", buf.len());
                return;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("Line reader stopped: {}", e);
                return;
            }
        }
    }
}
